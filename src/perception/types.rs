use serde::{Deserialize, Serialize};

/// Pixel-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }
}

/// One node of a raw UI-tree dump, as delivered by the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    pub clickable: bool,
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub accessibility_label: Option<String>,
    #[serde(default)]
    pub element_kind: Option<String>,
}

/// One interactive region of a captured snapshot. Mark ids are 1-based and
/// unique only within a single capture cycle; the full set is rebuilt from
/// scratch every cycle and ids must never resolve against an older capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIElement {
    pub mark_id: u32,
    pub bounds: Bounds,
    pub text: Option<String>,
    pub accessibility_label: Option<String>,
    pub element_kind: Option<String>,
}

impl UIElement {
    /// Centroid in pixel space; derived, not stored.
    pub fn center(&self) -> (i32, i32) {
        self.bounds.center()
    }
}
