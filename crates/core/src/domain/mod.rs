pub mod repo;
pub mod events;
pub mod probe;

// Re-exports for convenience
pub use repo::*;
pub use events::*;
