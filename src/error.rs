//! Error types for the bridge coordinator

use crate::events::EventKind;

use ethers::types::Address;
use thiserror::Error;

/// Main error type for the bridge coordinator
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("chain connection error: {0}")]
    ChainConnection(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("signer not authorized for address {requested}")]
    Unauthorized { requested: Address },

    #[error("transaction submission failed: {0}")]
    SubmissionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{kind} subscription failed: {message}")]
    SubscriptionFailed { kind: EventKind, message: String },

    #[error("account refresh failed: {0}")]
    RefreshFailed(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("timeout waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// A fatal error tears down the whole coordinator; everything else is
    /// either returned to the caller or logged and retried on the next event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::SubscriptionFailed { .. })
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_subscription_failures_are_fatal() {
        let fatal = BridgeError::SubscriptionFailed {
            kind: EventKind::Transfer,
            message: "stream closed".into(),
        };
        assert!(fatal.is_fatal());

        assert!(!BridgeError::InvalidAmount("missing").is_fatal());
        assert!(!BridgeError::RefreshFailed("rpc down".into()).is_fatal());
        assert!(!BridgeError::Timeout { operation: "submit" }.is_fatal());
    }

    #[test]
    fn submission_failure_preserves_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer hung up");
        let err = BridgeError::SubmissionFailed(Box::new(cause));
        assert!(err.to_string().contains("peer hung up"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
