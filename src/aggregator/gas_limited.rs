//! Gas-limited aggregator (1inch `multicallWithGasLimitation`)
//!
//! The contract stops executing once its remaining gas drops below
//! `gasBuffer` and reports how far it got. Calls past `lastSuccessIndex`
//! were never attempted.

use alloy::primitives::{Address, U256};
use tracing::debug;

use super::{AggregateOutcome, Aggregator};
use crate::{
    errors::CallError, executor::Executor, transport::Transport, types::CapturedRequest,
};

mod abi {
    use alloy::sol;

    sol! {
        #[derive(Debug, PartialEq, Eq)]
        struct GasLimitedCall {
            address to;
            bytes data;
        }

        interface IGasLimitedMulticall {
            function multicallWithGasLimitation(GasLimitedCall[] memory calls, uint256 gasBuffer)
                external
                view
                returns (bytes[] memory results, uint256 lastSuccessIndex);
        }
    }
}

pub use abi::{
    GasLimitedCall,
    IGasLimitedMulticall::{multicallWithGasLimitationCall, multicallWithGasLimitationReturn},
};

/// Gas left untouched by the aggregator before it stops
pub const DEFAULT_GAS_BUFFER: u64 = 3_000_000;

/// Aggregates through `multicallWithGasLimitation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimitedMulticall {
    address: Address,
    gas_buffer: u64,
}

impl GasLimitedMulticall {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            gas_buffer: DEFAULT_GAS_BUFFER,
        }
    }

    pub fn with_gas_buffer(mut self, gas_buffer: u64) -> Self {
        self.gas_buffer = gas_buffer;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn gas_buffer(&self) -> u64 {
        self.gas_buffer
    }
}

impl Aggregator for GasLimitedMulticall {
    fn name(&self) -> &'static str {
        "gas-limited"
    }

    async fn aggregate<T: Transport>(
        &self,
        executor: &Executor<T>,
        requests: &[CapturedRequest],
    ) -> Result<AggregateOutcome, CallError> {
        let calls = requests
            .iter()
            .map(|request| GasLimitedCall {
                to: request.target.address,
                data: request.payload.clone(),
            })
            .collect();
        let call = multicallWithGasLimitationCall {
            calls,
            gasBuffer: U256::from(self.gas_buffer),
        };

        let response = executor.execute(self.address, call).await?;
        let last_success_index: usize = response.lastSuccessIndex.saturating_to();
        if last_success_index.saturating_add(1) < requests.len() {
            debug!(
                last_success_index,
                calls = requests.len(),
                "Aggregator ran out of gas budget"
            );
        }

        Ok(AggregateOutcome::GasLimited {
            results: response.results,
            last_success_index,
        })
    }
}
