//! Error types for cmix-ap
//!
//! Only control-side operations return these. The real-time render path
//! never propagates errors: it degrades to silence and logs.

use thiserror::Error;

/// Main error type for cmix-ap module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio output device or stream errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid or unloadable timeline
    #[error("Timeline error: {0}")]
    Timeline(String),

    /// Byte length or offset that would split a sample
    #[error("Misaligned audio data: {0}")]
    Misaligned(String),

    /// Operation on an engine after destroy()
    #[error("Audio engine has been destroyed")]
    EngineDestroyed,

    /// Bounded wait on the backend expired
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Errors from cmix-common
    #[error(transparent)]
    Common(#[from] cmix_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeline JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type using cmix-ap Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Timeout("flush".to_string()).to_string(),
            "Timed out waiting for flush"
        );
        assert_eq!(
            Error::EngineDestroyed.to_string(),
            "Audio engine has been destroyed"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
