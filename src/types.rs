//! Core types for call execution and batch dispatch
//!
//! This module defines the data flowing through the pipeline:
//! - Contract calls and their method descriptors
//! - Requests harvested during capture
//! - Raw per-call outcomes reported by aggregators
//! - Dispatch configuration

use std::{fmt, time::Duration};

pub use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigurationError, DecodeError};

/// Default maximum number of calls aggregated into one request
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Identity of a contract method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Solidity signature, e.g. `balanceOf(address)`
    pub signature: &'static str,
    /// First four bytes of the signature hash
    pub selector: [u8; 4],
}

impl MethodDescriptor {
    /// Descriptor of a `sol!`-generated call type
    pub fn of<C: SolCall>() -> Self {
        Self {
            signature: C::SIGNATURE,
            selector: C::SELECTOR,
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature)
    }
}

/// Where a request goes and which method it invokes
///
/// This is the type-erased part of a [`ContractCall`] that transports and
/// interceptors see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTarget {
    pub address: Address,
    pub method: MethodDescriptor,
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.method)
    }
}

/// One read-only invocation of a contract method
///
/// Immutable once built and consumed by a single execution. The method
/// descriptor comes from the call type `C`, the arguments are the fields of
/// `C` itself.
#[derive(Debug, Clone)]
pub struct ContractCall<C> {
    target: Address,
    args: C,
}

impl<C: SolCall> ContractCall<C> {
    pub fn new(target: Address, args: C) -> Self {
        Self { target, args }
    }

    pub fn target(&self) -> CallTarget {
        CallTarget {
            address: self.target,
            method: MethodDescriptor::of::<C>(),
        }
    }

    pub fn args(&self) -> &C {
        &self.args
    }

    /// ABI-encoded calldata (selector followed by arguments)
    ///
    /// Pure: encoding the same call twice yields identical bytes, which
    /// replay relies on.
    pub fn encode(&self) -> Bytes {
        self.args.abi_encode().into()
    }

    /// Decode raw response bytes into the method's return type
    pub fn decode_result(&self, raw: &[u8]) -> Result<C::Return, DecodeError> {
        C::abi_decode_returns(raw).map_err(|e| DecodeError {
            method: C::SIGNATURE.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A request recorded by the capture interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    pub target: CallTarget,
    /// Encoded calldata
    pub payload: Bytes,
    /// Position of the originating call within its chunk
    pub index: usize,
}

/// Outcome of one aggregated sub-call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResult {
    pub success: bool,
    pub data: Bytes,
}

impl RawResult {
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self {
            success: true,
            data: data.into(),
        }
    }

    pub fn failure(data: impl Into<Bytes>) -> Self {
        Self {
            success: false,
            data: data.into(),
        }
    }

    /// Successful with non-empty return data
    pub fn is_usable(&self) -> bool {
        self.success && !self.data.is_empty()
    }
}

/// Per-call status reported by size-limited aggregators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    Success,
    Reverted,
    OutOfGas,
    /// Any code not listed above
    Unknown(u64),
}

impl CallStatus {
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Success,
            0 => Self::Reverted,
            2 => Self::OutOfGas,
            other => Self::Unknown(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Dispatch configuration
///
/// Supplies builder defaults and the knobs that `dispatch` itself does not
/// take as arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of calls per aggregator request
    pub batch_size: usize,
    /// Degrade individual failures to `None` instead of aborting
    pub allow_failure: bool,
    /// Number of chunks allowed in flight at once
    pub chunk_concurrency: usize,
    /// Upper bound for a chunk's capture phase, in milliseconds
    pub capture_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            allow_failure: false,
            chunk_concurrency: 1,
            capture_timeout_ms: None,
        }
    }
}

impl DispatchConfig {
    pub fn capture_timeout(&self) -> Option<Duration> {
        self.capture_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values that would make dispatch meaningless
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize);
        }
        if self.chunk_concurrency == 0 {
            return Err(ConfigurationError::ZeroConcurrency);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{primitives::address, sol};

    sol! {
        function balanceOf(address owner) external view returns (uint256);
    }

    #[test]
    fn test_contract_call_encoding_is_stable() {
        let owner = address!("28C6c06298d514Db089934071355E5743bf21d60");
        let call = ContractCall::new(Address::ZERO, balanceOfCall { owner });

        let first = call.encode();
        assert_eq!(first, call.encode());
        assert_eq!(&first[..4], &balanceOfCall::SELECTOR);
        assert_eq!(first.len(), 4 + 32);
        assert_eq!(call.target().method.signature, "balanceOf(address)");
    }

    #[test]
    fn test_decode_result_reports_method() {
        let call = ContractCall::new(Address::ZERO, balanceOfCall { owner: Address::ZERO });
        let err = call.decode_result(&[0x01, 0x02]).unwrap_err();
        assert_eq!(err.method, "balanceOf(address)");

        let mut word = [0u8; 32];
        word[31] = 7;
        assert_eq!(call.decode_result(&word).unwrap(), U256::from(7));
    }

    #[test]
    fn test_raw_result_usability() {
        assert!(RawResult::success(vec![1u8]).is_usable());
        assert!(!RawResult::success(Bytes::new()).is_usable());
        assert!(!RawResult::failure(vec![1u8]).is_usable());
    }

    #[test]
    fn test_call_status_codes() {
        assert_eq!(CallStatus::from_code(1), CallStatus::Success);
        assert_eq!(CallStatus::from_code(0), CallStatus::Reverted);
        assert_eq!(CallStatus::from_code(2), CallStatus::OutOfGas);
        assert_eq!(CallStatus::from_code(9), CallStatus::Unknown(9));
    }

    #[test]
    fn test_dispatch_config_defaults_and_validation() {
        let config: DispatchConfig = serde_json::from_str(r#"{ "batch_size": 50 }"#).unwrap();
        assert_eq!(config.batch_size, 50);
        assert!(!config.allow_failure);
        assert_eq!(config.chunk_concurrency, 1);
        assert_eq!(config.capture_timeout(), None);

        let zero = DispatchConfig { batch_size: 0, ..Default::default() };
        assert_eq!(zero.validate(), Err(ConfigurationError::ZeroBatchSize));

        let idle = DispatchConfig { chunk_concurrency: 0, ..Default::default() };
        assert_eq!(idle.validate(), Err(ConfigurationError::ZeroConcurrency));
    }
}
