use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for contents operations
#[derive(Error, Debug)]
pub enum ContentsError {
    #[error("No mount point matches path: {0}")]
    NoMatchingMount(String),

    #[error("Cannot move items across mount points ({from_mount:?} -> {to_mount:?})")]
    CrossMount { from_mount: String, to_mount: String },

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Checkpoint {checkpoint_id} does not exist for {path}")]
    CheckpointNotFound { checkpoint_id: String, path: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Read-only backend")]
    ReadOnly,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ContentsError {
    /// HTTP status a hosting server should answer with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ContentsError::NoMatchingMount(_) => 404,
            ContentsError::CrossMount { .. } => 400,
            ContentsError::NotFound(_) => 404,
            ContentsError::AlreadyExists(_) => 409,
            ContentsError::NotADirectory(_) => 400,
            ContentsError::NotEmpty(_) => 400,
            ContentsError::InvalidPath(_) => 400,
            ContentsError::InvalidModel(_) => 400,
            ContentsError::CheckpointNotFound { .. } => 404,
            ContentsError::NotSupported(_) => 501,
            ContentsError::ReadOnly => 403,
            ContentsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => 404,
                io::ErrorKind::PermissionDenied => 403,
                io::ErrorKind::AlreadyExists => 409,
                _ => 500,
            },
            ContentsError::Backend(_) => 500,
            ContentsError::Config(_) => 500,
        }
    }

    /// Whether the error means the addressed item is missing
    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }
}

impl From<ConfigError> for ContentsError {
    fn from(e: ConfigError) -> Self {
        ContentsError::Config(e.to_string())
    }
}

/// Result type alias for contents operations
pub type Result<T> = std::result::Result<T, ContentsError>;
