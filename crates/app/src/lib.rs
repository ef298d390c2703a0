//! GitaGrip application library
//!
//! Adapters, background services and the terminal UI. The binary in
//! `main.rs` is the composition root.

pub mod adapters;
pub mod cli;
pub mod logging;
pub mod services;
pub mod tui;
