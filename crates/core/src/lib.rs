//! GitaGrip Core - domain types, the event bus, the stores and the
//! coordinator that turns events and user intents into a view model.
//!
//! Nothing in this crate spawns git or touches the terminal; those live in
//! adapters behind the ports defined here.

pub mod app;
pub mod bus;
pub mod domain;
pub mod error;
pub mod ports;
pub mod store;

// Re-exports for ergonomics
pub use bus::{EventBus, Subscription};
pub use domain::*;
pub use error::*;
