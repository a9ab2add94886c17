pub mod marker;
pub mod types;

pub use marker::{draw_marks, find_by_mark, mark_elements};
pub use types::{Bounds, RawNode, UIElement};
