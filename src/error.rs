//! # Error Types for Satlock
//!
//! Error taxonomy for script compilation, spend construction, chain
//! queries and escrow lifecycle transitions.

use thiserror::Error;

/// Main error type for all escrow operations
#[derive(Debug, Error)]
pub enum EscrowError {
    /// Malformed compile-time script input (bad key length, bad height).
    /// Never retried; the caller must fix the input.
    #[error("Invalid script parameter: {message}")]
    InvalidScriptParam { message: String },

    /// Output value would fall below the dust threshold (or go negative)
    /// after subtracting the fee
    #[error("Insufficient funds: {required} sats required, {available} sats available")]
    InsufficientFunds { required: u64, available: u64 },

    /// Finalize attempted before the required signer(s) completed.
    /// Retryable once more signatures arrive.
    #[error("Missing signatures: have {have}, need {need}")]
    MissingSignature { have: usize, need: usize },

    /// The external signing capability was cancelled by its user.
    /// Leaves the escrow in its prior status; retryable.
    #[error("Signing request declined by user")]
    UserDeclined,

    /// The external signing capability could not be reached
    #[error("Signer unavailable: {message}")]
    SignerUnavailable { message: String },

    /// Any chain-query failure. Polling retries on the next cycle;
    /// state is never advanced on failure.
    #[error("Chain API unavailable: {message}")]
    ChainUnavailable { message: String },

    /// Node-level rejection of a finalized transaction, surfaced with
    /// the node's rejection reason
    #[error("Broadcast rejected: {reason}")]
    BroadcastRejected { reason: String },

    /// Invalid state transitions in the escrow lifecycle
    #[error("Invalid escrow state transition from {current} to {requested}")]
    InvalidStateTransition { current: String, requested: String },

    /// Address parsing and validation errors
    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    /// PSBT construction errors
    #[error("PSBT error: {source}")]
    Psbt {
        #[from]
        source: bitcoin::psbt::Error,
    },

    /// File I/O operations
    #[error("File operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON processing error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Generic operation failures with context
    #[error("Operation failed: {operation} - {message}")]
    OperationFailed { operation: String, message: String },
}

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;

impl EscrowError {
    /// Create an invalid-script-parameter error with a message
    pub fn invalid_script(message: impl Into<String>) -> Self {
        Self::InvalidScriptParam {
            message: message.into(),
        }
    }

    /// Create a chain-unavailable error with a message
    pub fn chain(message: impl Into<String>) -> Self {
        Self::ChainUnavailable {
            message: message.into(),
        }
    }

    /// Create an operation failed error
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable (signatures pending, user
    /// cancellation, or transient network issues)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EscrowError::ChainUnavailable { .. }
                | EscrowError::SignerUnavailable { .. }
                | EscrowError::MissingSignature { .. }
                | EscrowError::UserDeclined
        )
    }

    /// Check if this error indicates bad caller input that must be fixed
    /// rather than retried
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EscrowError::InvalidScriptParam { .. }
                | EscrowError::InvalidAddress { .. }
                | EscrowError::InsufficientFunds { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let script_err = EscrowError::invalid_script("pubkey must be 33 or 65 bytes");
        assert!(matches!(script_err, EscrowError::InvalidScriptParam { .. }));
        assert!(script_err.is_structural());

        let op_err = EscrowError::operation("broadcast", "connection refused");
        assert!(matches!(op_err, EscrowError::OperationFailed { .. }));
    }

    #[test]
    fn test_error_classification() {
        assert!(EscrowError::chain("timeout").is_retryable());
        assert!(EscrowError::UserDeclined.is_retryable());
        assert!(EscrowError::MissingSignature { have: 1, need: 2 }.is_retryable());

        let dust = EscrowError::InsufficientFunds {
            required: 546,
            available: 400,
        };
        assert!(dust.is_structural());
        assert!(!dust.is_retryable());
    }
}
