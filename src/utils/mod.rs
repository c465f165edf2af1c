//! Helpers built on top of the executor and the dispatcher
//!
//! - [`erc20_utils`]: typed ERC20 reads and batched token metadata
//! - [`error_utils`]: revert reason decoding

/// ERC20 token read helpers
pub mod erc20_utils;

/// Revert payload decoding
pub mod error_utils;
