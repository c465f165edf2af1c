//! Error types for call execution and batch dispatch
//!
//! The taxonomy mirrors where a failure originates:
//! - Physical transport failures (fatal for the enclosing chunk)
//! - Response decoding failures
//! - Invalid dispatch configuration (raised before any I/O)
//! - Interceptor scope misuse
//! - Capture/replay protocol violations by a call closure
//! - Individual calls reported as failed by an aggregator

use std::fmt;

use alloy::primitives::Bytes;
use thiserror::Error;

use crate::utils::error_utils::RevertReason;

/// Top-level error type returned by the executor and the dispatcher
#[derive(Debug, Error)]
pub enum CallError {
    /// The physical request failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Response bytes could not be decoded into the expected type
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Dispatch parameters were rejected before any request was made
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The interceptor lock discipline was violated
    #[error("Interceptor misuse: {0}")]
    ConcurrencyMisuse(#[from] ConcurrencyMisuseError),

    /// A call closure broke the capture/replay contract
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The aggregator reported the call at `index` as failed
    #[error("Call #{index} failed: {reason}")]
    CallFailed {
        /// Position of the call in the dispatched list
        index: usize,
        reason: FailureReason,
    },

    /// Error raised by user code inside a call closure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Physical request failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// JSON-RPC or connection level failure
    #[error("RPC request failed: {0}")]
    Rpc(String),

    /// The request itself reverted
    #[error("Request reverted: {}", display_reason(.reason))]
    Reverted {
        reason: Option<RevertReason>,
        data: Bytes,
    },

    /// Local execution halted (out of gas, invalid opcode, ...)
    #[error("Execution halted: {0}")]
    Halted(String),

    /// Local EVM rejected the transaction before execution
    #[error("EVM error: {0}")]
    Evm(String),
}

/// Malformed response bytes for a method
#[derive(Debug, Error)]
#[error("Failed to decode result of {method}: {reason}")]
pub struct DecodeError {
    /// Solidity signature of the method, e.g. `decimals()`
    pub method: String,
    pub reason: String,
}

/// Dispatch parameters rejected eagerly
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Batch size must be positive")]
    ZeroBatchSize,

    #[error("Chunk concurrency must be positive")]
    ZeroConcurrency,
}

/// Violations of the interceptor scoping rules
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConcurrencyMisuseError {
    /// A scoped handle tried to open another scope on the same executor
    #[error("Nested interceptor scope on the same executor (scope {scope})")]
    NestedScope { scope: u64 },

    /// A scoped handle was used after its scope ended
    #[error("Executor handle bound to scope {scope} used outside of it")]
    StaleHandle { scope: u64 },

    /// The slot was occupied when a scope tried to install its interceptor
    #[error("Interceptor slot already owned by scope {owner}")]
    SlotOccupied { owner: u64 },

    /// The slot no longer belonged to the scope restoring it
    #[error("Interceptor slot of scope {scope} was replaced by {found:?}")]
    SlotReplaced { scope: u64, found: Option<u64> },
}

/// Capture/replay contract violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The same origin index issued two requests during capture
    #[error("Call #{index} issued more than one request during capture")]
    DuplicateCapture { index: usize },

    /// The replayed call encoded a different payload than the captured one
    #[error("Call #{index} encoded a different payload on replay")]
    NonDeterministicPayload { index: usize },

    /// The same origin index requested twice during replay
    #[error("Call #{index} issued more than one request during replay")]
    MultipleRequests { index: usize },

    /// No replay response was registered for the request
    #[error("No replay response registered for call {index:?}")]
    MissingResponse { index: Option<usize> },

    /// Not every call of a chunk reached the request seam in time
    #[error("Capture timed out after {captured} of {expected} calls")]
    CaptureTimeout { captured: usize, expected: usize },

    /// The call completed without ever issuing a request
    #[error("Call #{index} completed without issuing a request")]
    NoRequestIssued { index: usize },
}

/// Why an aggregator-reported call failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The call reverted, with a decoded reason when one was returned
    Reverted(Option<RevertReason>),
    /// The call succeeded but returned no data
    EmptyReturnData,
    /// The call lies beyond the aggregator's truncation boundary
    NotExecuted,
    /// The call ran out of its gas allowance
    OutOfGas,
    /// The aggregator returned a status this crate does not know
    UnknownStatus(u64),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reverted(reason) => write!(f, "reverted: {}", display_reason(reason)),
            Self::EmptyReturnData => write!(f, "empty return data"),
            Self::NotExecuted => write!(f, "not executed (beyond aggregator truncation)"),
            Self::OutOfGas => write!(f, "out of gas"),
            Self::UnknownStatus(code) => write!(f, "unknown aggregator status {code}"),
        }
    }
}

/// Initialization errors of the simulated EVM
#[derive(Debug, Error)]
pub enum InitError {
    /// Invalid or malformed RPC URL
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    /// Database setup errors
    #[error("Database initialization failed: {0}")]
    Database(String),

    /// Chain ID retrieval errors
    #[error("Failed to get chain ID: {0}")]
    ChainId(String),

    /// Aggregator deployment into the simulated state failed
    #[error("Aggregator deployment failed: {0}")]
    Deployment(String),
}

fn display_reason(reason: &Option<RevertReason>) -> String {
    match reason {
        Some(reason) => reason.to_string(),
        None => "no reason".to_string(),
    }
}

impl CallError {
    /// Whether this error is an aggregator-reported failure of a single call
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::CallFailed { .. })
    }

    /// Whether the error concerns one call only
    ///
    /// These are the errors `allow_failure` turns into a `None` result;
    /// anything else aborts the whole dispatch. A replayed call that
    /// requests twice or encodes a different payload only spoils its own
    /// result.
    pub fn is_call_local(&self) -> bool {
        matches!(
            self,
            Self::CallFailed { .. }
                | Self::Decode(_)
                | Self::Other(_)
                | Self::Protocol(
                    ProtocolError::MultipleRequests { .. }
                        | ProtocolError::NonDeterministicPayload { .. }
                )
        )
    }
}
