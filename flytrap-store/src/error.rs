use thiserror::Error;

/// Errors raised by the envelope store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded database rejected an operation.
    #[error("Database error: {0}")]
    Db(#[from] sled::Error),

    /// An envelope could not be serialized for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A day argument was not a valid `YYYYMMDD` date.
    #[error("Invalid day bucket: {0}")]
    InvalidDay(String),

    /// I/O error outside of sled itself (permissions tightening).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::InvalidDay("2024-13-99".to_string());
        assert_eq!(err.to_string(), "Invalid day bucket: 2024-13-99");
    }
}
