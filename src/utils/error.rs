use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// A single capture frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Unknown model, missing column, invalid parameter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A model fit/predict or the conversion pipeline failed
    #[error("Processing error: {0}")]
    Processing(String),

    /// Persisting a job status change failed
    #[error("Status update error: {0}")]
    StatusTransition(String),

    /// The queue no longer accepts work
    #[error("Queue is stopped")]
    QueueStopped,

    /// A record was not found in the history store
    #[error("History record not found: {0}")]
    NotFound(String),

    /// Error from the HTTP client while fetching a capture
    #[error("Fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Error from pcap library
    #[error("PCAP error: {0}")]
    Pcap(#[from] pcap::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AppError::configuration("unknown model: lstm");
        assert_eq!(err.to_string(), "Configuration error: unknown model: lstm");

        let err = AppError::StatusTransition("store offline".into());
        assert_eq!(err.to_string(), "Status update error: store offline");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pcap");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Io(_)));
    }
}
