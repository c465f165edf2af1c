//! Local EVM used as a read-call backend
//!
//! `SimulatedEvm` runs revm's `MainnetEvm` so read calls and aggregator
//! requests can run without a JSON-RPC node, either against empty in-memory
//! state or against state lazily forked from a remote chain. It is consumed
//! through [`EvmTransport`](crate::transport::EvmTransport).
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use multicall_batcher::{evm::create_fork_evm, transport::EvmTransport, Executor};
//!
//! let evm = create_fork_evm("https://eth.llamarpc.com", None).await?;
//! let executor = Executor::new(EvmTransport::new(evm));
//! # Ok(())
//! # }
//! ```

use alloy::primitives::{Address, Bytes, TxKind};
use revm::{
    context::{BlockEnv, CfgEnv, Context, TxEnv},
    context_interface::result::ExecutionResult,
    database::{Database, DatabaseCommit},
    handler::{MainBuilder, MainContext, MainnetContext},
    inspector::NoOpInspector,
    ExecuteCommitEvm, ExecuteEvm, MainnetEvm,
};
use tracing::debug;

use crate::{
    aggregator::multicall3::MULTICALL3_INIT_CODE,
    errors::{InitError, TransportError},
    utils::error_utils::RevertReason,
};

pub mod builder;

pub use builder::{create_fork_evm, create_memory_evm, ForkDb, ForkEvm, MemoryEvm};

/// State and environment of a read-only revm simulation
///
/// Only the database and the cfg/block environment are kept; a mainnet EVM
/// borrowing them is built for every execution and dropped before returning.
/// revm's EVM is not `Send`, this wrapper is whenever `DB` is.
pub struct SimulatedEvm<DB> {
    db: DB,
    cfg: CfgEnv,
    block: BlockEnv,
}

impl<DB: Database> SimulatedEvm<DB> {
    pub fn new(db: DB, cfg: CfgEnv, block: BlockEnv) -> Self {
        Self { db, cfg, block }
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut DB {
        &mut self.db
    }

    pub fn cfg(&self) -> &CfgEnv {
        &self.cfg
    }

    pub fn block(&self) -> &BlockEnv {
        &self.block
    }

    pub fn into_db(self) -> DB {
        self.db
    }

    fn evm(&mut self) -> MainnetEvm<MainnetContext<&mut DB>, NoOpInspector> {
        let mut ctx = Context::mainnet().with_db(&mut self.db);
        ctx.cfg = self.cfg.clone();
        ctx.block = self.block.clone();
        ctx.build_mainnet_with_inspector(NoOpInspector)
    }

    /// Execute a call without committing any state change
    ///
    /// Reverts carry the decoded reason; halts (out of gas, invalid opcode)
    /// and pre-execution rejections are reported as transport failures.
    pub fn call_readonly(
        &mut self,
        caller: Address,
        to: Address,
        data: Bytes,
        gas_limit: u64,
    ) -> Result<Bytes, TransportError> {
        let tx = TxEnv::builder()
            .caller(caller)
            .kind(TxKind::Call(to))
            .data(data)
            .gas_limit(gas_limit)
            .nonce(0)
            .build_fill();

        let outcome = self
            .evm()
            .transact(tx)
            .map_err(|e| TransportError::Evm(e.to_string()))?;

        match outcome.result {
            ExecutionResult::Success { output, .. } => Ok(output.into_data()),
            ExecutionResult::Revert { output, .. } => Err(TransportError::Reverted {
                reason: RevertReason::decode(&output),
                data: output,
            }),
            ExecutionResult::Halt { reason, .. } => {
                Err(TransportError::Halted(format!("{reason:?}")))
            }
        }
    }
}

impl<DB: Database + DatabaseCommit> SimulatedEvm<DB> {
    /// Deploy a Multicall3 aggregator into the simulated state
    ///
    /// For chains (or empty in-memory state) without a deployed aggregator.
    /// The deployment is committed, so later reads see the contract.
    pub fn deploy_multicall3(&mut self) -> Result<Address, InitError> {
        let init_code: Bytes = MULTICALL3_INIT_CODE
            .parse()
            .map_err(|e| InitError::Deployment(format!("invalid init code: {e}")))?;

        let tx = TxEnv {
            kind: TxKind::Create,
            data: init_code,
            ..Default::default()
        };
        let result = self
            .evm()
            .transact_commit(tx)
            .map_err(|e| InitError::Deployment(e.to_string()))?;

        match result {
            ExecutionResult::Success { output, .. } => match output.address() {
                Some(address) => {
                    debug!(%address, "Deployed Multicall3 into simulated state");
                    Ok(*address)
                }
                None => Err(InitError::Deployment(
                    "deployment did not return a contract address".to_string(),
                )),
            },
            ExecutionResult::Revert { output, .. } => Err(InitError::Deployment(format!(
                "deployment reverted: {output}"
            ))),
            ExecutionResult::Halt { reason, .. } => Err(InitError::Deployment(format!(
                "deployment halted: {reason:?}"
            ))),
        }
    }
}
