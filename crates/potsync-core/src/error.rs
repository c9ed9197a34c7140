//! Error types for Potsync

use thiserror::Error;

/// Main error type for Potsync operations
///
/// Validation failures are deliberately absent: records that fail the shape
/// contract are filtered out of query results and never surfaced to callers.
#[derive(Error, Debug)]
pub enum PotSyncError {
    /// Decryption capability unavailable or ciphertext rejected
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Decoded value violates a fixed format contract (e.g. the 64-hex-char
    /// device secret); no coercion is attempted
    #[error("Format error: {0}")]
    Format(String),

    /// A relay query exceeded its deadline
    #[error("Query timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the deadline fired
        elapsed_ms: u64,
    },

    /// Signing or relay write failed; no local state was changed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Relay query or subscription failed
    #[error("Relay error: {0}")]
    Relay(String),

    /// Signer capability error (key material, signing)
    #[error("Signer error: {0}")]
    Signer(String),

    /// Referenced entity does not exist on the relay
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias using PotSyncError
pub type PotSyncResult<T> = Result<T, PotSyncError>;
