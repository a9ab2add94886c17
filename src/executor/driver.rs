use async_trait::async_trait;

use crate::errors::SeeTapResult;
use crate::perception::types::RawNode;

/// Ordinary action failure is a value, not an error type: the message is fed
/// back into the next analysis prompt. For `launch_app` the message may carry
/// name suggestions for the model to try.
pub type DriverOutcome = Result<(), String>;

/// The device backend supplied by the host. One implementation may walk an
/// OS accessibility tree, another may shell privileged input-injection and
/// UI-dump commands over an inter-process channel; the engine cannot tell
/// the difference.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Current screen as encoded image bytes (PNG or JPEG).
    async fn capture_screen(&self) -> SeeTapResult<Vec<u8>>;

    /// Raw UI-tree dump for the current screen, in tree traversal order.
    async fn capture_ui_tree(&self) -> SeeTapResult<Vec<RawNode>>;

    async fn tap(&self, x: i32, y: i32) -> DriverOutcome;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32) -> DriverOutcome;

    async fn long_press(&self, x: i32, y: i32, duration_ms: u32) -> DriverOutcome;

    async fn type_text(&self, text: &str) -> DriverOutcome;

    async fn press_back(&self) -> DriverOutcome;

    async fn press_home(&self) -> DriverOutcome;

    async fn press_enter(&self) -> DriverOutcome;

    async fn launch_app(&self, name: &str) -> DriverOutcome;
}
