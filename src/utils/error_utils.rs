//! Revert payload decoding
//!
//! Aggregators report a failed sub-call as raw revert bytes. This module turns
//! those bytes into a [`RevertReason`] so dispatch failures can say *why* a call
//! failed instead of carrying an opaque blob:
//! - `Error(string)` reverts (selector `0x08c379a0`)
//! - `Panic(uint256)` compiler panics (selector `0x4e487b71`)
//! - any other 4-byte selector, kept as a custom error

use std::fmt;

use alloy::{
    primitives::{Bytes, FixedBytes},
    sol_types::{Panic, Revert, SolError},
};

/// Decoded reason of a reverted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    /// `require`/`revert` with a message
    Message(String),
    /// Solidity panic with its numeric code
    Panic(u64),
    /// Custom error, identified by selector only
    Custom {
        selector: FixedBytes<4>,
        data: Bytes,
    },
}

impl RevertReason {
    /// Decode revert output bytes
    ///
    /// Returns `None` for empty output (a bare `revert()`) or output too short
    /// to carry a selector. Malformed `Error(string)`/`Panic(uint256)` bodies
    /// also yield `None` rather than a misleading custom error.
    pub fn decode(output: &[u8]) -> Option<Self> {
        if output.len() < 4 {
            return None;
        }
        let (selector, body) = output.split_at(4);

        if selector == Revert::SELECTOR {
            return Revert::abi_decode(output)
                .ok()
                .map(|revert| Self::Message(revert.reason));
        }
        if selector == Panic::SELECTOR {
            return Panic::abi_decode(output)
                .ok()
                .map(|panic| Self::Panic(panic.code.saturating_to::<u64>()));
        }

        Some(Self::Custom {
            selector: FixedBytes::from_slice(selector),
            data: Bytes::copy_from_slice(body),
        })
    }

    /// Human readable meaning of a Solidity panic code
    pub fn panic_description(code: u64) -> &'static str {
        match code {
            0x00 => "generic compiler panic",
            0x01 => "assertion failed",
            0x11 => "arithmetic overflow",
            0x12 => "division by zero",
            0x21 => "invalid enum value",
            0x22 => "invalid storage byte array",
            0x31 => "pop on empty array",
            0x32 => "array index out of bounds",
            0x41 => "out of memory",
            0x51 => "call to zero-initialized function",
            _ => "unknown panic code",
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Panic(code) => write!(f, "panic 0x{code:x} ({})", Self::panic_description(*code)),
            Self::Custom { selector, data } => {
                write!(f, "custom error {selector} ({} bytes of data)", data.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::hex::decode;

    #[test]
    fn test_decode_error_string() {
        // "Insufficient balance" encoded as Error(string)
        let output = decode(
            "08c379a0\
             0000000000000000000000000000000000000000000000000000000000000020\
             0000000000000000000000000000000000000000000000000000000000000014\
             496e73756666696369656e742062616c616e6365000000000000000000000000",
        )
        .unwrap();

        let reason = RevertReason::decode(&output);
        assert_eq!(reason, Some(RevertReason::Message("Insufficient balance".to_string())));
        assert_eq!(reason.unwrap().to_string(), "Insufficient balance");

        // Selector without a body is not a valid Error(string)
        assert_eq!(RevertReason::decode(&decode("08c379a0").unwrap()), None);
    }

    #[test]
    fn test_decode_panic_codes() {
        for (code, description) in [
            (0x01u8, "assertion failed"),
            (0x11, "arithmetic overflow"),
            (0x12, "division by zero"),
            (0x32, "array index out of bounds"),
            (0xff, "unknown panic code"),
        ] {
            let mut output = Panic::SELECTOR.to_vec();
            output.extend_from_slice(&[0u8; 31]);
            output.push(code);

            let reason = RevertReason::decode(&output).unwrap();
            assert_eq!(reason, RevertReason::Panic(code as u64));
            assert!(reason.to_string().contains(description));
        }
    }

    #[test]
    fn test_decode_custom_and_short() {
        assert_eq!(RevertReason::decode(&[]), None);
        assert_eq!(RevertReason::decode(&[0x08, 0xc3, 0x79]), None);

        let reason = RevertReason::decode(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap();
        match reason {
            RevertReason::Custom { selector, data } => {
                assert_eq!(selector, FixedBytes::from([0xde, 0xad, 0xbe, 0xef]));
                assert_eq!(data, Bytes::from(vec![0x01]));
            }
            other => panic!("unexpected reason: {other:?}"),
        }

        // Panic selector with a truncated word
        assert_eq!(RevertReason::decode(&[0x4e, 0x48, 0x7b, 0x71, 0x00]), None);
    }
}
