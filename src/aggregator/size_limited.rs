//! Size-limited aggregator (QuickCall `execute`)
//!
//! Every sub-call gets the same gas allowance and return size cap. The
//! contract reports a status per call and leaves the result of a failed call
//! empty.

use alloy::primitives::{Address, U256};

use super::{payloads_of, targets_of, AggregateOutcome, Aggregator};
use crate::{
    errors::CallError,
    executor::Executor,
    transport::Transport,
    types::{CallStatus, CapturedRequest},
};

mod abi {
    use alloy::sol;

    sol! {
        interface ISizeLimitedMulticall {
            function execute(uint256 gasLimit, uint256 sizeLimit, address[] memory addrs, bytes[] memory datas)
                external
                view
                returns (uint256 blockNumber, uint256[] memory statuses, bytes[] memory results);
        }
    }
}

pub use abi::ISizeLimitedMulticall::{executeCall, executeReturn};

/// Gas shared by all calls of one aggregated request
pub const DEFAULT_GAS_CAP: u64 = 150_000_000;

/// Maximum return data size per call, in bytes
pub const DEFAULT_SIZE_LIMIT: u64 = 10_240;

/// Aggregates through QuickCall-style `execute(gasLimit, sizeLimit, addrs, datas)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimitedMulticall {
    address: Address,
    gas_cap: u64,
    size_limit: u64,
}

impl SizeLimitedMulticall {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            gas_cap: DEFAULT_GAS_CAP,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }

    pub fn with_gas_cap(mut self, gas_cap: u64) -> Self {
        self.gas_cap = gas_cap;
        self
    }

    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Gas allowance of each call when `calls` are aggregated together
    pub fn per_call_gas(&self, calls: usize) -> u64 {
        self.gas_cap / calls.max(1) as u64
    }
}

impl Aggregator for SizeLimitedMulticall {
    fn name(&self) -> &'static str {
        "size-limited"
    }

    async fn aggregate<T: Transport>(
        &self,
        executor: &Executor<T>,
        requests: &[CapturedRequest],
    ) -> Result<AggregateOutcome, CallError> {
        let call = executeCall {
            gasLimit: U256::from(self.per_call_gas(requests.len())),
            sizeLimit: U256::from(self.size_limit),
            addrs: targets_of(requests),
            datas: payloads_of(requests),
        };

        let response = executor.execute(self.address, call).await?;
        Ok(AggregateOutcome::SizeLimited {
            block_number: response.blockNumber.saturating_to(),
            statuses: response
                .statuses
                .iter()
                .map(|status| CallStatus::from_code(status.saturating_to()))
                .collect(),
            results: response.results,
        })
    }
}
