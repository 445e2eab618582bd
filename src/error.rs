//! Error types for the balancer

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the balancer
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Broker errors
    #[error("Broker connection refused: {0}")]
    BrokerRefused(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Broker consumer stream closed")]
    ConsumerClosed,

    #[error("Publish not confirmed by broker: {0}")]
    PublishNacked(String),

    // Message errors
    #[error("Message decode error: {0}")]
    Decode(String),

    // Node errors
    #[error("Node error: {0}")]
    Node(String),

    #[error("Native top-up of {amount} to {address} failed")]
    TopUpFailed { address: String, amount: Decimal },

    #[error("Transfer of {amount} from {address} to the admin wallet failed")]
    TransferFailed { address: String, amount: Decimal },

    // Account API errors
    #[error("Account API error: {0}")]
    AccountApi(String),

    // Alerting errors
    #[error("Notification failed: {0}")]
    Notification(String),

    // Storage errors
    #[error("Deferred storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is the expected "connection refused" raised while
    /// the broker is still starting up
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Error::BrokerRefused(_))
    }

    /// Check if this error comes from infrastructure rather than from an
    /// operation the node reported as failed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BrokerRefused(_)
                | Error::Broker(_)
                | Error::ConsumerClosed
                | Error::Node(_)
                | Error::AccountApi(_)
        )
    }
}

// Conversion from broker errors
impl From<lapin::Error> for Error {
    fn from(e: lapin::Error) -> Self {
        match &e {
            lapin::Error::IOError(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                Error::BrokerRefused(e.to_string())
            }
            _ => Error::Broker(e.to_string()),
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
