//! Construction of simulated EVM instances
//!
//! - [`create_memory_evm`]: empty in-memory state, no network access
//! - [`create_fork_evm`]: state fetched lazily from an RPC endpoint (HTTP or WS)
//!
//! Both apply simulation-friendly settings: no EIP-3607 sender check, no
//! contract size limit, no block gas limit, no base fee and no balance check.

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::AnyNetwork,
    providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
};
use revm::{
    context::{BlockEnv, CfgEnv},
    database::{AlloyDB, CacheDB, Database, EmptyDB, WrapDatabaseAsync},
};

use super::SimulatedEvm;
use crate::errors::InitError;

/// State lazily loaded from a remote node through alloy
pub type ForkDb = CacheDB<WrapDatabaseAsync<AlloyDB<AnyNetwork, DynProvider<AnyNetwork>>>>;

/// Simulated EVM over forked remote state
pub type ForkEvm = SimulatedEvm<ForkDb>;

/// Simulated EVM over empty in-memory state
pub type MemoryEvm = SimulatedEvm<CacheDB<EmptyDB>>;

/// Chain id used for in-memory simulation
pub const MEMORY_CHAIN_ID: u64 = 1;

/// Create a simulated EVM with empty state
pub fn create_memory_evm() -> MemoryEvm {
    build_simulated(CacheDB::new(EmptyDB::default()), MEMORY_CHAIN_ID, None)
}

/// Create a simulated EVM whose state is forked from `rpc_url`
///
/// `block_number` pins the fork; `None` forks from the latest block. Requires
/// a multi-threaded tokio runtime because remote state is fetched from inside
/// synchronous EVM execution.
pub async fn create_fork_evm(
    rpc_url: &str,
    block_number: Option<u64>,
) -> Result<ForkEvm, InitError> {
    let provider = connect(rpc_url).await?;
    let chain_id = provider
        .get_chain_id()
        .await
        .map_err(|e| InitError::ChainId(e.to_string()))?;

    let block_id = match block_number {
        Some(number) => BlockId::Number(BlockNumberOrTag::Number(number)),
        None => BlockId::latest(),
    };
    let alloy_db = WrapDatabaseAsync::new(AlloyDB::new(provider, block_id)).ok_or_else(|| {
        InitError::Database("a multi-threaded tokio runtime is required to fork state".to_string())
    })?;

    Ok(build_simulated(CacheDB::new(alloy_db), chain_id, block_number))
}

async fn connect(rpc_url: &str) -> Result<DynProvider<AnyNetwork>, InitError> {
    if rpc_url.starts_with("http") {
        let url = rpc_url
            .parse()
            .map_err(|_| InitError::InvalidRpcUrl(rpc_url.to_string()))?;
        Ok(ProviderBuilder::new()
            .network::<AnyNetwork>()
            .connect_http(url)
            .erased())
    } else {
        let provider = ProviderBuilder::new()
            .network::<AnyNetwork>()
            .connect_ws(WsConnect::new(rpc_url))
            .await
            .map_err(|e| InitError::InvalidRpcUrl(format!("{rpc_url}: {e}")))?;
        Ok(provider.erased())
    }
}

fn build_simulated<DB: Database>(
    db: DB,
    chain_id: u64,
    block_number: Option<u64>,
) -> SimulatedEvm<DB> {
    let mut block = BlockEnv::default();
    if let Some(number) = block_number {
        block.number = number;
    }

    let mut cfg: CfgEnv = CfgEnv::default();
    cfg.chain_id = chain_id;
    cfg.disable_eip3607 = true;
    cfg.limit_contract_code_size = None;
    cfg.disable_block_gas_limit = true;
    cfg.disable_base_fee = true;
    cfg.disable_balance_check = true;

    SimulatedEvm::new(db, cfg, block)
}
