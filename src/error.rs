//! Error types for the Swapline Relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Order rejected: {0}")]
    Validation(String),

    #[error("Chain call failed on chain {chain_id}: {message}")]
    ChainCall { chain_id: u64, message: String },

    #[error("Escrow {address} on chain {chain_id} does not match committed order parameters")]
    VerificationMismatch { chain_id: u64, address: String },

    #[error("Recovery failed for order {order_id}: {message}")]
    RecoveryFailure { order_id: String, message: String },

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Order {order_id} not found")]
    OrderNotFound { order_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if the error is transient chain trouble worth one more attempt
    /// before the order routes into recovery
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::ChainCall { .. } | RelayerError::Timeout { .. }
        )
    }

    /// Check if error should trigger an operator alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::RecoveryFailure { .. } | RelayerError::Wallet(_)
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
