use serde::{Deserialize, Serialize};

/// Executable intents a model reply can carry. Coordinates are device pixels;
/// raw model coordinates go through [`crate::model::ScreenSize`] before an
/// `Action` is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap { x: i32, y: i32 },
    TapMark { mark_id: u32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u32 },
    LongPress { x: i32, y: i32, duration_ms: u32 },
    Input { text: String },
    Enter,
    Back,
    Home,
    Wait { ms: u64 },
    Launch { app_name: String },
    Done { message: String },
    AskUser { reason: String, suggestion: String },
}

pub const DEFAULT_SWIPE_MS: u32 = 300;
pub const DEFAULT_LONG_PRESS_MS: u32 = 1000;
pub const DEFAULT_WAIT_MS: u64 = 1000;

impl Action {
    /// True for the two actions that end or suspend the step loop; these are
    /// never batched with side-effecting actions.
    pub fn is_terminal_or_pausing(&self) -> bool {
        matches!(self, Action::Done { .. } | Action::AskUser { .. })
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Tap { x, y } => write!(f, "Tap ({x}, {y})"),
            Action::TapMark { mark_id } => write!(f, "Tap mark [{mark_id}]"),
            Action::Swipe { x1, y1, x2, y2, .. } => {
                write!(f, "Swipe ({x1},{y1}) -> ({x2},{y2})")
            }
            Action::LongPress { x, y, .. } => write!(f, "Long press ({x}, {y})"),
            Action::Input { text } => write!(f, "Input: {text}"),
            Action::Enter => write!(f, "Enter"),
            Action::Back => write!(f, "Back"),
            Action::Home => write!(f, "Home"),
            Action::Wait { ms } => write!(f, "Wait {ms}ms"),
            Action::Launch { app_name } => write!(f, "Launch app: {app_name}"),
            Action::Done { message } => write!(f, "Task complete: {message}"),
            Action::AskUser { reason, .. } => write!(f, "Ask user: {reason}"),
        }
    }
}

/// One parsed model reply. Built by the response parser, consumed once by the
/// task executor, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResponse {
    /// First action, kept for single-action legacy replies.
    pub primary_action: Action,
    /// All actions in source order.
    pub actions: Vec<Action>,
    /// Short status line for a live progress display.
    pub status_text: String,
    /// Model reasoning, when the reply carried a think block.
    pub thinking_text: Option<String>,
    /// Truncated raw reply, for diagnostics.
    pub raw_text: String,
}

impl AIResponse {
    /// `actions` when non-empty, else the singleton primary action.
    pub fn all_actions(&self) -> Vec<Action> {
        if self.actions.is_empty() {
            vec![self.primary_action.clone()]
        } else {
            self.actions.clone()
        }
    }
}

/// Terminal outcome of one task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskResult {
    Success { message: String },
    Failed { error: String },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_actions_falls_back_to_primary() {
        let resp = AIResponse {
            primary_action: Action::Back,
            actions: vec![],
            status_text: String::new(),
            thinking_text: None,
            raw_text: String::new(),
        };
        assert_eq!(resp.all_actions(), vec![Action::Back]);
    }

    #[test]
    fn all_actions_prefers_list() {
        let resp = AIResponse {
            primary_action: Action::Back,
            actions: vec![Action::Home, Action::Enter],
            status_text: String::new(),
            thinking_text: None,
            raw_text: String::new(),
        };
        assert_eq!(resp.all_actions(), vec![Action::Home, Action::Enter]);
    }

    #[test]
    fn terminal_actions_are_flagged() {
        assert!(Action::Done { message: "ok".into() }.is_terminal_or_pausing());
        assert!(Action::AskUser { reason: "pin".into(), suggestion: String::new() }
            .is_terminal_or_pausing());
        assert!(!Action::Tap { x: 1, y: 1 }.is_terminal_or_pausing());
    }
}
