//! Error types for kg-features

use thiserror::Error;

/// Errors that can occur while loading a dataset or querying embeddings
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Missing, unreadable or malformed dataset file
    #[error("Data load error: {0}")]
    DataLoad(String),

    /// URI or ID not present in an index or model table
    #[error("Not found: {0}")]
    NotFound(String),

    /// Degenerate or mismatched array shapes
    #[error("Shape error: {0}")]
    Shape(String),

    /// Unrecognised name passed by a caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation with no defined behavior yet
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeatureError {
    /// Create a data load error
    pub fn data_load(msg: impl Into<String>) -> Self {
        Self::DataLoad(msg.into())
    }

    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    /// Create a shape error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

/// Result type for kg-features operations
pub type Result<T> = std::result::Result<T, FeatureError>;
