//! Error Handling Module
//!
//! Defines the error type shared by every layer of the salt segmentation
//! library. Uses thiserror for ergonomic error definitions; the binary wraps
//! these in `anyhow` with extra context.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for salt cross-validation operations
#[derive(Error, Debug)]
pub enum SaltError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error loading or decoding an image or mask
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Error reading or writing a CSV file
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error with dataset contents (ids, folds, pseudo-label lists)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with model construction or tensor extraction
    #[error("Model error: {0}")]
    Model(String),

    /// Error during a training or validation pass
    #[error("Training error: {0}")]
    Training(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Two buffers that must line up do not
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Error saving or loading a checkpoint
    #[error("Checkpoint error at '{0}': {1}")]
    Checkpoint(PathBuf, String),
}

impl SaltError {
    /// Build a shape mismatch error from anything printable
    pub fn shape_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<serde_json::Error> for SaltError {
    fn from(err: serde_json::Error) -> Self {
        SaltError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SaltError {
    fn from(err: toml::de::Error) -> Self {
        SaltError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SaltError {
    fn from(err: toml::ser::Error) -> Self {
        SaltError::Serialization(err.to_string())
    }
}

/// Convenience Result type for salt cross-validation operations
pub type Result<T> = std::result::Result<T, SaltError>;

/// Extension trait for adding dataset context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| SaltError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SaltError::Dataset(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SaltError::Dataset(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| SaltError::Dataset(f()))
    }
}
