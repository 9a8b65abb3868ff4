//! Error types for the SMTP front end: connection I/O and TLS upgrades.

use std::io;

use thiserror::Error;

/// Errors that can occur during connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error during connection operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The per-command read deadline expired.
    #[error("Read deadline expired")]
    Timeout,

    /// Connection was closed by peer mid-transaction.
    #[error("Connection closed by peer")]
    Closed,

    /// A request line exceeded the wire limit without a terminator.
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Formatting error while preparing a reply.
    #[error("Reply formatting error: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Errors that can occur during TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    /// I/O error during TLS operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// STARTTLS issued on a channel that is already encrypted.
    #[error("Connection is already TLS")]
    AlreadyTls,

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Specialized `Result` type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Specialized `Result` type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;
