//! Error types for layercache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache, its stores and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Key is absent from a store (non-fatal, triggers tier fallthrough)
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes accepted by the store than requested
    #[error("Short write: expected {expected} bytes to be written, but only {written} were")]
    ShortWrite { expected: usize, written: usize },

    /// Construction-time misconfiguration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transformer or format registry rejected the input or target format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Transformer failed on otherwise supported input
    #[error("Transform failed: {0}")]
    Transform(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] on `key`
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Returns true if this error means the key is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_helpers() {
        let err = Error::not_found("img");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Key not found: img");

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(!io.is_not_found());
    }

    #[test]
    fn test_short_write_message() {
        let err = Error::ShortWrite {
            expected: 10,
            written: 4,
        };
        assert_eq!(
            err.to_string(),
            "Short write: expected 10 bytes to be written, but only 4 were"
        );
    }
}
