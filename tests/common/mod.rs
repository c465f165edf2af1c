//! In-memory chain shared by the integration tests
//!
//! `MockChain` answers plain read calls from a table of
//! (target, calldata) -> reply and understands the three aggregator ABIs,
//! executing their sub-calls against the same table. Every physical request
//! is counted.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use alloy::{
    primitives::{address, Address, Bytes, U256},
    sol,
    sol_types::{Revert, SolCall, SolError},
};
use multicall_batcher::{
    aggregator::{
        gas_limited::{multicallWithGasLimitationCall, multicallWithGasLimitationReturn},
        multicall3::{aggregate3Call, Call3Result},
        size_limited::{executeCall, executeReturn},
    },
    errors::TransportError,
    transport::Transport,
    types::CallTarget,
    utils::error_utils::RevertReason,
};

pub const WBNB: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
pub const CAKE: Address = address!("0E09FaBB73Bd3Ade0a17ECC321fD13a19e81cE82");
pub const NOT_A_TOKEN: Address = address!("000000000000000000000000000000000000dEaD");
pub const HOLDER: Address = address!("28C6c06298d514Db089934071355E5743bf21d60");

pub const GAS_LIMITED_ADDRESS: Address = address!("0000000000000000000000000000000000001111");
pub const SIZE_LIMITED_ADDRESS: Address = address!("000000000000000000000000000000000000c411");

sol! {
    function name() external view returns (string);
    function symbol() external view returns (string);
    function decimals() external view returns (uint8);
    function totalSupply() external view returns (uint256);
    function balanceOf(address owner) external view returns (uint256);
}

/// What a sub-call does when executed
#[derive(Debug, Clone)]
pub enum Reply {
    Return(Bytes),
    Revert(Bytes),
    OutOfGas,
}

#[derive(Default)]
pub struct MockChain {
    replies: Mutex<HashMap<(Address, Bytes), Reply>>,
    requests: AtomicUsize,
    direct_requests: AtomicUsize,
    fail_transport: AtomicBool,
    /// Number of sub-calls the gas-limited aggregator gets through
    gas_budget: Mutex<Option<usize>>,
    /// Extra results appended by `aggregate3`
    extra_results: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding WBNB and CAKE metadata plus one WBNB balance
    pub fn with_tokens() -> Self {
        let chain = Self::new();
        chain.token(WBNB, "Wrapped BNB", "WBNB", 18, U256::from(10u64).pow(U256::from(23)));
        chain.token(CAKE, "PancakeSwap Token", "Cake", 18, U256::from(1_000_000u64));
        chain.returns(WBNB, balanceOfCall { owner: HOLDER }, &U256::from(42u64));
        chain
    }

    pub fn token(&self, address: Address, name: &str, symbol: &str, decimals: u8, supply: U256) {
        self.returns(address, nameCall {}, &name.to_string());
        self.returns(address, symbolCall {}, &symbol.to_string());
        self.returns(address, decimalsCall {}, &decimals);
        self.returns(address, totalSupplyCall {}, &supply);
    }

    pub fn returns<C: SolCall>(&self, target: Address, call: C, value: &C::Return) {
        self.reply(target, call, Reply::Return(C::abi_encode_returns(value).into()));
    }

    pub fn returns_raw<C: SolCall>(&self, target: Address, call: C, raw: impl Into<Bytes>) {
        self.reply(target, call, Reply::Return(raw.into()));
    }

    pub fn reverts<C: SolCall>(&self, target: Address, call: C, message: &str) {
        let data = Revert {
            reason: message.to_string(),
        }
        .abi_encode();
        self.reply(target, call, Reply::Revert(data.into()));
    }

    pub fn out_of_gas<C: SolCall>(&self, target: Address, call: C) {
        self.reply(target, call, Reply::OutOfGas);
    }

    fn reply<C: SolCall>(&self, target: Address, call: C, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert((target, call.abi_encode().into()), reply);
    }

    pub fn set_transport_failure(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    pub fn set_gas_budget(&self, calls: Option<usize>) {
        *self.gas_budget.lock().unwrap() = calls;
    }

    pub fn set_extra_results(&self, extra: usize) {
        self.extra_results.store(extra, Ordering::SeqCst);
    }

    /// Physical requests received, aggregated or not
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Physical requests that were not aggregator calls
    pub fn direct_requests(&self) -> usize {
        self.direct_requests.load(Ordering::SeqCst)
    }

    fn execute(&self, target: Address, data: &Bytes) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .get(&(target, data.clone()))
            .cloned()
            .unwrap_or(Reply::Revert(Bytes::new()))
    }

    fn aggregate3(&self, call: aggregate3Call) -> Bytes {
        let mut results: Vec<Call3Result> = call
            .calls
            .iter()
            .map(|sub| match self.execute(sub.target, &sub.callData) {
                Reply::Return(data) => Call3Result {
                    success: true,
                    returnData: data,
                },
                Reply::Revert(data) => Call3Result {
                    success: false,
                    returnData: data,
                },
                Reply::OutOfGas => Call3Result {
                    success: false,
                    returnData: Bytes::new(),
                },
            })
            .collect();
        for _ in 0..self.extra_results.load(Ordering::SeqCst) {
            results.push(Call3Result {
                success: true,
                returnData: Bytes::from(vec![0xff; 32]),
            });
        }
        aggregate3Call::abi_encode_returns(&results).into()
    }

    fn gas_limited(&self, call: multicallWithGasLimitationCall) -> Bytes {
        let budget = self.gas_budget.lock().unwrap().unwrap_or(call.calls.len());
        let executed = budget.min(call.calls.len());
        let results = call
            .calls
            .iter()
            .enumerate()
            .map(|(i, sub)| match self.execute(sub.to, &sub.data) {
                Reply::Return(data) | Reply::Revert(data) if i < executed => data,
                _ => Bytes::new(),
            })
            .collect();
        let response = multicallWithGasLimitationReturn {
            results,
            lastSuccessIndex: U256::from(executed.saturating_sub(1)),
        };
        multicallWithGasLimitationCall::abi_encode_returns(&response).into()
    }

    fn size_limited(&self, call: executeCall) -> Bytes {
        let (statuses, results) = call
            .addrs
            .iter()
            .zip(call.datas.iter())
            .map(|(target, data)| match self.execute(*target, data) {
                Reply::Return(data) => (U256::from(1), data),
                Reply::Revert(_) => (U256::ZERO, Bytes::new()),
                Reply::OutOfGas => (U256::from(2), Bytes::new()),
            })
            .unzip();
        let response = executeReturn {
            blockNumber: U256::from(1_000u64),
            statuses,
            results,
        };
        executeCall::abi_encode_returns(&response).into()
    }
}

impl Transport for MockChain {
    async fn request(&self, target: &CallTarget, payload: Bytes) -> Result<Bytes, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(TransportError::Rpc("connection reset by peer".to_string()));
        }

        let selector = target.method.selector;
        if selector == aggregate3Call::SELECTOR {
            let call = aggregate3Call::abi_decode(&payload).map_err(decode_error)?;
            return Ok(self.aggregate3(call));
        }
        if selector == multicallWithGasLimitationCall::SELECTOR {
            let call = multicallWithGasLimitationCall::abi_decode(&payload).map_err(decode_error)?;
            return Ok(self.gas_limited(call));
        }
        if selector == executeCall::SELECTOR {
            let call = executeCall::abi_decode(&payload).map_err(decode_error)?;
            return Ok(self.size_limited(call));
        }

        self.direct_requests.fetch_add(1, Ordering::SeqCst);
        match self.execute(target.address, &payload) {
            Reply::Return(data) => Ok(data),
            Reply::Revert(data) => Err(TransportError::Reverted {
                reason: RevertReason::decode(&data),
                data,
            }),
            Reply::OutOfGas => Err(TransportError::Halted("OutOfGas".to_string())),
        }
    }
}

fn decode_error(e: alloy::sol_types::Error) -> TransportError {
    TransportError::Rpc(format!("mock chain could not decode aggregate call: {e}"))
}

/// Opt-in test logging, controlled by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
