//! TUI module for terminal user interfaces

mod progress;

pub use progress::{finish_behind_view, ProgressApp};
