//! Coordinator and the view model it maintains

pub mod commands;
pub mod coordinator;
pub mod input;
pub mod queries;
pub mod search;
pub mod viewport;

pub use commands::Intent;
pub use coordinator::{Coordinator, CoordinatorOptions, Overlay, OverlayKind, StatusLine};
pub use input::{InputMode, InputState, Prompt};
pub use queries::{Filter, Row, RowKey, SortMode};
