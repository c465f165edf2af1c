//! On-chain aggregators collapsing many read calls into one request
//!
//! Three contract families are supported, each with its own truncation and
//! failure semantics:
//!
//! | Variant | Request | Outcome |
//! |---|---|---|
//! | [`Multicall3`] | `aggregate3` | one `(success, data)` per call |
//! | [`GasLimitedMulticall`] | `multicallWithGasLimitation` | results plus `lastSuccessIndex`; the suffix never ran |
//! | [`SizeLimitedMulticall`] | `execute(gasLimit, sizeLimit, ...)` | per-call status codes and results |
//!
//! Aggregators only report what the contract returned, as an
//! [`AggregateOutcome`]. Turning that into per-call results is the
//! dispatcher's job.

use std::future::Future;

use alloy::primitives::{Address, Bytes};

use crate::{
    errors::CallError,
    executor::Executor,
    transport::Transport,
    types::{CallStatus, CapturedRequest, RawResult},
};

pub mod gas_limited;
pub mod multicall3;
pub mod size_limited;

pub use gas_limited::GasLimitedMulticall;
pub use multicall3::{Multicall3, MULTICALL3_ADDRESS};
pub use size_limited::SizeLimitedMulticall;

/// Executes a list of captured requests as a single aggregated call
///
/// `requests` are ordered by origin index. Implementations must issue
/// exactly one request through `executor`, which is an unbound handle, so
/// the aggregated call goes to the transport.
pub trait Aggregator: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn aggregate<T: Transport>(
        &self,
        executor: &Executor<T>,
        requests: &[CapturedRequest],
    ) -> impl Future<Output = Result<AggregateOutcome, CallError>> + Send;
}

/// Raw outcome of one aggregated call, in the shape of its contract family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// One result per request
    Standard(Vec<RawResult>),
    /// Results valid up to and including `last_success_index`
    GasLimited {
        results: Vec<Bytes>,
        last_success_index: usize,
    },
    /// One status and result per request
    SizeLimited {
        block_number: u64,
        statuses: Vec<CallStatus>,
        results: Vec<Bytes>,
    },
}

impl AggregateOutcome {
    /// Number of entries the contract returned
    pub fn len(&self) -> usize {
        match self {
            Self::Standard(results) => results.len(),
            Self::GasLimited { results, .. } => results.len(),
            Self::SizeLimited { statuses, .. } => statuses.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn targets_of(requests: &[CapturedRequest]) -> Vec<Address> {
    requests.iter().map(|request| request.target.address).collect()
}

pub(crate) fn payloads_of(requests: &[CapturedRequest]) -> Vec<Bytes> {
    requests.iter().map(|request| request.payload.clone()).collect()
}
