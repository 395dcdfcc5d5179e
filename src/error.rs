//! Error types for QuorumKV
//!
//! Provides a unified error type for routing, backend exchanges and quorum
//! execution.

use thiserror::Error;

/// Result type alias using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Unified error type for QuorumKV operations
#[derive(Debug, Error)]
pub enum ProxyError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend answered with an error status, or with a status the
    /// command does not allow.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    // -------------------------------------------------------------------------
    // Backend Connection Errors
    // -------------------------------------------------------------------------
    /// A recent dial to this host failed; no new dial until the window ends.
    #[error("wait for retry: {addr} silenced for another {retry_in_ms}ms")]
    SilenceWindow { addr: String, retry_in_ms: u64 },

    #[error("Exchange with {addr} timed out after {timeout_ms}ms")]
    Timeout { addr: String, timeout_ms: u64 },

    #[error("Host closed: {0}")]
    HostClosed(String),

    // -------------------------------------------------------------------------
    // Quorum Errors
    // -------------------------------------------------------------------------
    #[error("{op} quorum not met: {succeeded} succeeded, {required} required")]
    QuorumNotMet {
        op: &'static str,
        succeeded: usize,
        required: usize,
    },

    #[error("Client closed")]
    ClientClosed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    /// True for errors that only mean "try again later" (dial backoff).
    ///
    /// These are reported as a soft signal and never count toward marking a
    /// host dead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::SilenceWindow { .. })
    }

    /// True when the error is a quorum shortfall rather than a single host failure
    pub fn is_quorum_failure(&self) -> bool {
        matches!(self, ProxyError::QuorumNotMet { .. })
    }
}
