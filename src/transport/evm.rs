//! Transport executing requests on a local simulated EVM

use alloy::primitives::{address, Address, Bytes};
use revm::database::Database;
use tokio::sync::Mutex;

use super::Transport;
use crate::{errors::TransportError, evm::SimulatedEvm, types::CallTarget};

/// Sender of simulated read calls; never commits, so its nonce stays 0
pub const SIMULATION_CALLER: Address = address!("00000000000000000000000000000000000ca11e");

/// Default gas allowance per simulated request
pub const DEFAULT_SIMULATION_GAS: u64 = 300_000_000;

/// Runs every request as a non-committing call on a [`SimulatedEvm`]
///
/// The simulation state is behind an async mutex: requests are executed one
/// at a time, in arrival order. Each execution is synchronous, so no EVM
/// lives across an `.await`.
pub struct EvmTransport<DB: Database> {
    evm: Mutex<SimulatedEvm<DB>>,
    caller: Address,
    gas_limit: u64,
}

impl<DB: Database> EvmTransport<DB> {
    pub fn new(evm: SimulatedEvm<DB>) -> Self {
        Self {
            evm: Mutex::new(evm),
            caller: SIMULATION_CALLER,
            gas_limit: DEFAULT_SIMULATION_GAS,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_caller(mut self, caller: Address) -> Self {
        self.caller = caller;
        self
    }

    /// Give back the wrapped EVM
    pub fn into_inner(self) -> SimulatedEvm<DB> {
        self.evm.into_inner()
    }
}

impl<DB> Transport for EvmTransport<DB>
where
    DB: Database + Send + 'static,
    DB::Error: Send,
{
    async fn request(&self, target: &CallTarget, payload: Bytes) -> Result<Bytes, TransportError> {
        let mut evm = self.evm.lock().await;
        evm.call_readonly(self.caller, target.address, payload, self.gas_limit)
    }
}
