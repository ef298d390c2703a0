use std::path::PathBuf;
use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("scan already in progress")]
    ScanInProgress,

    #[error("Repository not found: {}", path.display())]
    RepositoryNotFound { path: PathBuf },

    #[error("Group not found: {name}")]
    GroupNotFound { name: String },

    #[error("Group '{name}' already exists")]
    DuplicateGroup { name: String },

    #[error("Invalid group name: '{name}'")]
    InvalidGroupName { name: String },

    #[error("Failed to parse {what}: '{input}'")]
    Parse { what: String, input: String },

    #[error("Port error: {source}")]
    Port { source: anyhow::Error },
}

pub type Result<T> = std::result::Result<T, CoreError>;
