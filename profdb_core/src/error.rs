//! Error types for profile operations

use thiserror::Error;

/// Result type for profile operations
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Errors that can occur while building, loading, merging or saving a profile
#[derive(Error, Debug)]
pub enum ProfileError {
    /// Load attempted into a container that already holds data
    #[error("Refusing to overwrite a non-empty profile")]
    WouldOverwrite,

    /// Magic or version bytes do not match this build's format
    #[error("Version mismatch: {0}")]
    VersionMismatch(String),

    /// Structural violation in the data being parsed or merged
    #[error("Bad profile data: {0}")]
    BadData(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error at the transport boundary
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`ProfileError`], used by callers that only
/// need to decide between retrying, clearing, or giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileErrorKind {
    WouldOverwrite,
    IoError,
    VersionMismatch,
    BadData,
}

impl ProfileError {
    pub(crate) fn bad_data(message: impl Into<String>) -> Self {
        ProfileError::BadData(message.into())
    }

    /// Collapse this error onto the load/merge status taxonomy
    pub fn kind(&self) -> ProfileErrorKind {
        match self {
            ProfileError::WouldOverwrite => ProfileErrorKind::WouldOverwrite,
            ProfileError::VersionMismatch(_) => ProfileErrorKind::VersionMismatch,
            ProfileError::Io(_) => ProfileErrorKind::IoError,
            ProfileError::BadData(_)
            | ProfileError::Config(_)
            | ProfileError::Yaml(_)
            | ProfileError::Json(_) => ProfileErrorKind::BadData,
        }
    }
}
