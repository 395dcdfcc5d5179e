//! Feedback messages
//!
//! Observations posted by the request path and applied by the router's
//! single feedback worker.

use std::time::SystemTime;

use crate::error::ProxyError;

/// Kinds of failed backend interaction, each with its own score penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Host is in its dial silence window
    Retryable,
    /// Protocol violation, unexpected status, I/O failure or timeout on a read
    Hard,
    /// Hard failure of a set
    HardWrite,
    /// Hard failure of a delete
    HardDelete,
}

impl ErrorClass {
    /// Score penalty in microseconds
    pub fn penalty(self) -> f64 {
        match self {
            ErrorClass::Retryable => 3_000.0,
            ErrorClass::Hard => 10_000.0,
            ErrorClass::HardWrite => 10_000.0,
            ErrorClass::HardDelete => 10_000.0,
        }
    }

    pub fn is_retryable(self) -> bool {
        self == ErrorClass::Retryable
    }

    /// Classify an error, using `hard` for everything that is not retryable
    pub fn of(error: &ProxyError, hard: ErrorClass) -> ErrorClass {
        if error.is_retryable() {
            ErrorClass::Retryable
        } else {
            hard
        }
    }
}

/// What was observed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Round trip in microseconds
    Latency(f64),
    Error(ErrorClass),
}

/// One observed backend interaction
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub addr: String,
    pub shard: usize,
    pub signal: Signal,
    pub at: SystemTime,
}
