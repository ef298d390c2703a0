//! Implementations of the core ports: the `git` subprocess runner, the
//! filesystem walker and the `.gitagrip.toml` store

pub mod discovery;
pub mod git;
pub mod persistence;
