//! Error types for Regvault

use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum RegvaultError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Change not found: {0}")]
    ChangeNotFound(String),

    #[error("File '{path}' not found in version '{version}'")]
    FileNotFoundInVersion { path: String, version: String },

    #[error("Review service error: {0}")]
    ReviewCommunication(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Working tree corrupt: {0}")]
    WorkingTreeCorrupt(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Version '{0}' has no pending change and is read-only")]
    HeadVersionReadOnly(String),

    #[error("Version '{0}' is merged or abandoned")]
    VersionClosed(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegvaultError {
    pub fn file_not_found(path: impl Into<String>, version: impl Into<String>) -> Self {
        RegvaultError::FileNotFoundInVersion {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Machine-readable code for the HTTP layer
    pub fn code(&self) -> &'static str {
        match self {
            RegvaultError::Git(_) => "GIT_ERROR",
            RegvaultError::Io(_) => "IO_ERROR",
            RegvaultError::Serialization(_) => "SERIALIZATION_ERROR",
            RegvaultError::ChangeNotFound(_) => "CHANGE_NOT_FOUND",
            RegvaultError::FileNotFoundInVersion { .. } => "FILE_NOT_FOUND",
            RegvaultError::ReviewCommunication(_) => "REVIEW_COMMUNICATION_ERROR",
            RegvaultError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            RegvaultError::WorkingTreeCorrupt(_) => "WORKING_TREE_CORRUPT",
            RegvaultError::Encoding(_) => "FILE_ENCODING_EXCEPTION",
            RegvaultError::HeadVersionReadOnly(_) => "HEAD_VERSION_READ_ONLY",
            RegvaultError::VersionClosed(_) => "VERSION_CLOSED",
            RegvaultError::InvalidPath(_) => "INVALID_PATH",
            RegvaultError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Status class the HTTP layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            RegvaultError::ChangeNotFound(_) | RegvaultError::FileNotFoundInVersion { .. } => 404,
            RegvaultError::Encoding(_) | RegvaultError::InvalidPath(_) => 400,
            RegvaultError::HeadVersionReadOnly(_) | RegvaultError::VersionClosed(_) => 409,
            _ => 500,
        }
    }
}

/// Serializable error response for the HTTP layer
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<&RegvaultError> for ErrorResponse {
    fn from(error: &RegvaultError) -> Self {
        let details = match error {
            RegvaultError::FileNotFoundInVersion { path, .. } => Some(path.clone()),
            RegvaultError::ChangeNotFound(id) => Some(id.clone()),
            _ => None,
        };

        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

impl From<RegvaultError> for ErrorResponse {
    fn from(error: RegvaultError) -> Self {
        ErrorResponse::from(&error)
    }
}

impl serde::Serialize for RegvaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

/// Result type alias for Regvault operations
pub type Result<T> = std::result::Result<T, RegvaultError>;
