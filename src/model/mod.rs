pub mod action;
pub mod coords;

pub use action::{AIResponse, Action, TaskResult};
pub use coords::ScreenSize;
