//! Thread-safe in-memory stores shared between the services and the coordinator

pub mod repos;
pub mod groups;

pub use repos::RepoStore;
pub use groups::GroupStore;
