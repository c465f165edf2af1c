//! Batch dispatcher: capture, aggregate, replay
//!
//! Calls are ordinary async closures over an [`Executor`]. The dispatcher
//! splits them into chunks of at most `batch_size` and, for every chunk:
//!
//! 1. runs all calls concurrently under a capture scope, each with a handle
//!    tagged by its position, until every call has either recorded its
//!    request or finished on its own
//! 2. submits the recorded requests, ordered by position, as one aggregated
//!    request through the [`Aggregator`]
//! 3. normalizes the aggregator's outcome into one result per call
//! 4. re-runs every call whose result is usable under a replay scope, where
//!    its request resolves immediately with that result
//!
//! Outputs keep the order of the input regardless of which call finished
//! first, and chunks are concatenated in input order.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use alloy::primitives::Bytes;
use futures::{
    future::{join_all, BoxFuture},
    stream::{self, FuturesUnordered},
    FutureExt, StreamExt, TryStreamExt,
};
use tracing::{debug, trace, warn};

use crate::{
    aggregator::{AggregateOutcome, Aggregator},
    errors::{CallError, ConfigurationError, FailureReason, ProtocolError},
    executor::{CaptureLog, Executor, Interceptor, ReplayTable},
    transport::Transport,
    types::{CallStatus, CapturedRequest, DispatchConfig},
    utils::error_utils::RevertReason,
};

pub mod builder;

pub use builder::{MulticallBuilder, PreparedMulticall};

/// Future produced by one invocation of a [`BatchCall`]
pub type CallFuture<V> = BoxFuture<'static, Result<V, CallError>>;

/// A call the dispatcher can run more than once
///
/// Every invocation must encode the same request: the dispatcher runs the
/// closure once to capture its request and again to decode the result.
pub type BatchCall<T, V> = Arc<dyn Fn(Executor<T>) -> CallFuture<V> + Send + Sync>;

/// Wrap an async closure into a [`BatchCall`]
pub fn batch_call<T, V, F, Fut>(call: F) -> BatchCall<T, V>
where
    F: Fn(Executor<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, CallError>> + Send + 'static,
{
    Arc::new(move |executor| call(executor).boxed())
}

/// Dispatches batches of calls through one executor and one aggregator
pub struct MulticallDispatcher<T, A> {
    executor: Executor<T>,
    aggregator: Arc<A>,
    config: DispatchConfig,
}

impl<T, A> Clone for MulticallDispatcher<T, A> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            aggregator: Arc::clone(&self.aggregator),
            config: self.config.clone(),
        }
    }
}

impl<T: Transport, A: Aggregator> MulticallDispatcher<T, A> {
    pub fn new(executor: Executor<T>, aggregator: A) -> Self {
        Self {
            executor: executor.unbound(),
            aggregator: Arc::new(aggregator),
            config: DispatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Start a fluent batch with this dispatcher's configured defaults
    pub fn builder<V: Send + 'static>(&self) -> MulticallBuilder<T, A, V> {
        MulticallBuilder::new(self.clone())
    }

    /// Run `calls` in aggregated chunks of at most `batch_size`
    ///
    /// Returns one entry per call, in input order. With `allow_failure`, a
    /// call the aggregator reports as failed (or whose result does not
    /// decode) yields `None`; without it, the first such call aborts the
    /// dispatch. Transport failures of the aggregated request always abort.
    pub async fn dispatch<V: Send + 'static>(
        &self,
        calls: &[BatchCall<T, V>],
        batch_size: usize,
        allow_failure: bool,
    ) -> Result<Vec<Option<V>>, CallError> {
        if batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize.into());
        }
        if self.config.chunk_concurrency == 0 {
            return Err(ConfigurationError::ZeroConcurrency.into());
        }
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            calls = calls.len(),
            batch_size,
            allow_failure,
            aggregator = self.aggregator.name(),
            "Dispatching multicall"
        );

        let mut chunks: Vec<BoxFuture<'_, Result<Vec<Option<V>>, CallError>>> = Vec::new();
        for (chunk, slice) in calls.chunks(batch_size).enumerate() {
            chunks.push(
                self.run_chunk(chunk, chunk * batch_size, slice, allow_failure)
                    .boxed(),
            );
        }
        let outputs: Vec<Vec<Option<V>>> = stream::iter(chunks)
            .buffered(self.config.chunk_concurrency)
            .try_collect()
            .await?;

        Ok(outputs.into_iter().flatten().collect())
    }

    async fn run_chunk<V: Send + 'static>(
        &self,
        chunk: usize,
        offset: usize,
        calls: &[BatchCall<T, V>],
        allow_failure: bool,
    ) -> Result<Vec<Option<V>>, CallError> {
        debug!(chunk, calls = calls.len(), "Capturing chunk");
        let (captured, completed) = self.capture(calls).await?;

        let mut failures: BTreeMap<usize, CallError> = BTreeMap::new();
        for (index, result) in completed {
            match result {
                Err(e) => {
                    failures.insert(index, e);
                }
                Ok(_) if !captured.iter().any(|request| request.index == index) => {
                    failures.insert(
                        index,
                        ProtocolError::NoRequestIssued {
                            index: offset + index,
                        }
                        .into(),
                    );
                }
                Ok(_) => {}
            }
        }
        let requests: Vec<CapturedRequest> = captured
            .into_iter()
            .filter(|request| request.index < calls.len() && !failures.contains_key(&request.index))
            .collect();
        debug!(chunk, captured = requests.len(), "Capture harvested");

        if let Some(error) = take_fatal(&mut failures, allow_failure) {
            return Err(error);
        }

        let mut ready: BTreeMap<usize, (Bytes, Bytes)> = BTreeMap::new();
        if !requests.is_empty() {
            debug!(
                chunk,
                calls = requests.len(),
                aggregator = self.aggregator.name(),
                "Submitting aggregated request"
            );
            let outcome = self.aggregator.aggregate(&self.executor, &requests).await?;
            let normalized = normalize_outcome(outcome, requests.len());
            for (request, result) in requests.into_iter().zip(normalized) {
                match result {
                    Ok(response) => {
                        ready.insert(request.index, (request.payload, response));
                    }
                    Err(reason) => {
                        failures.insert(
                            request.index,
                            CallError::CallFailed {
                                index: offset + request.index,
                                reason,
                            },
                        );
                    }
                }
            }
        }

        if let Some(error) = take_fatal(&mut failures, allow_failure) {
            return Err(error);
        }
        for (index, error) in &failures {
            debug!(index = offset + index, error = %error, "Call failure absorbed");
        }

        let mut outputs: Vec<Option<V>> = (0..calls.len()).map(|_| None).collect();
        if ready.is_empty() {
            return Ok(outputs);
        }

        let table = ReplayTable::new();
        let indices: Vec<usize> = ready.keys().copied().collect();
        for (index, (payload, response)) in ready {
            table.insert(index, payload, response);
        }
        let replayed = self
            .executor
            .with_interceptor(Interceptor::Replay(table), |scoped| {
                join_all(indices.iter().map(|&index| {
                    let call = (*calls[index])(scoped.tagged(index));
                    async move { (index, call.await) }
                }))
            })
            .await?;

        for (index, result) in replayed {
            match result {
                Ok(value) => outputs[index] = Some(value),
                Err(e) if allow_failure && e.is_call_local() => {
                    debug!(index = offset + index, error = %e, "Call failure absorbed");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(chunk, "Chunk finished");
        Ok(outputs)
    }

    /// Run `calls` under a capture scope until each has recorded its request
    /// or completed, then cancel whatever is still suspended
    async fn capture<V: Send + 'static>(
        &self,
        calls: &[BatchCall<T, V>],
    ) -> Result<(Vec<CapturedRequest>, Vec<(usize, Result<V, CallError>)>), CallError> {
        let log = CaptureLog::new();
        let expected = calls.len();
        let timeout = self.config.capture_timeout();

        let settled = self
            .executor
            .with_interceptor(Interceptor::Capture(log.clone()), |scoped| {
                let log = log.clone();
                async move {
                    let mut pending: FuturesUnordered<_> = calls
                        .iter()
                        .enumerate()
                        .map(|(index, call)| {
                            let call = (**call)(scoped.tagged(index));
                            async move { (index, call.await) }
                        })
                        .collect();

                    let settle = settle_capture(&log, &mut pending, expected);
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, settle).await.map_err(|_| {
                            ProtocolError::CaptureTimeout {
                                captured: log.len(),
                                expected,
                            }
                        }),
                        None => Ok(settle.await),
                    }
                }
            })
            .await??;

        Ok((log.harvest(), settled))
    }
}

/// Remove and return the lowest-index failure that must abort the dispatch
fn take_fatal(failures: &mut BTreeMap<usize, CallError>, allow_failure: bool) -> Option<CallError> {
    let index = failures
        .iter()
        .find(|(_, error)| !allow_failure || !error.is_call_local())
        .map(|(index, _)| *index)?;
    failures.remove(&index)
}

/// Wait until every call of a chunk has been captured or has completed
async fn settle_capture<F, V>(
    log: &CaptureLog,
    pending: &mut FuturesUnordered<F>,
    expected: usize,
) -> Vec<(usize, Result<V, CallError>)>
where
    F: Future<Output = (usize, Result<V, CallError>)>,
{
    let mut completed = Vec::new();
    let mut done = vec![false; expected];
    loop {
        let mut settled = done.clone();
        for request in log.harvest() {
            if let Some(slot) = settled.get_mut(request.index) {
                *slot = true;
            }
        }
        if settled.iter().all(|settled| *settled) || pending.is_empty() {
            return completed;
        }

        tokio::select! {
            Some((index, result)) = pending.next() => {
                trace!(index, "Call completed during capture");
                if let Some(slot) = done.get_mut(index) {
                    *slot = true;
                }
                completed.push((index, result));
            }
            _ = log.changed() => {}
        }
    }
}

/// Turn an aggregator outcome into one result per request
///
/// Entries the aggregator did not report, or reported past its truncation
/// boundary, are failures: a call is never assumed to have succeeded.
pub fn normalize_outcome(
    outcome: AggregateOutcome,
    expected: usize,
) -> Vec<Result<Bytes, FailureReason>> {
    match outcome {
        AggregateOutcome::Standard(results) => {
            if results.len() > expected {
                warn!(
                    returned = results.len(),
                    expected, "Aggregator returned extra results, ignoring them"
                );
            }
            let mut results = results.into_iter();
            (0..expected)
                .map(|_| match results.next() {
                    Some(result) if result.is_usable() => Ok(result.data),
                    Some(result) if result.success => Err(FailureReason::EmptyReturnData),
                    Some(result) => Err(FailureReason::Reverted(RevertReason::decode(&result.data))),
                    None => Err(FailureReason::NotExecuted),
                })
                .collect()
        }
        AggregateOutcome::GasLimited {
            results,
            last_success_index,
        } => {
            let prefix = last_success_index.saturating_add(1).min(results.len());
            if prefix < expected {
                debug!(prefix, expected, "Aggregator truncated the batch");
            }
            let mut results = results.into_iter().take(prefix);
            (0..expected)
                .map(|_| match results.next() {
                    Some(data) if !data.is_empty() => Ok(data),
                    Some(_) => Err(FailureReason::EmptyReturnData),
                    None => Err(FailureReason::NotExecuted),
                })
                .collect()
        }
        AggregateOutcome::SizeLimited {
            block_number,
            statuses,
            results,
        } => {
            trace!(block_number, "Size-limited aggregate executed");
            let mut statuses = statuses.into_iter();
            let mut results = results.into_iter();
            (0..expected)
                .map(|_| {
                    let data = results.next().unwrap_or_default();
                    match statuses.next() {
                        Some(CallStatus::Success) if !data.is_empty() => Ok(data),
                        Some(CallStatus::Success) => Err(FailureReason::EmptyReturnData),
                        Some(CallStatus::Reverted) => {
                            Err(FailureReason::Reverted(RevertReason::decode(&data)))
                        }
                        Some(CallStatus::OutOfGas) => Err(FailureReason::OutOfGas),
                        Some(CallStatus::Unknown(code)) => Err(FailureReason::UnknownStatus(code)),
                        None => Err(FailureReason::NotExecuted),
                    }
                })
                .collect()
        }
    }
}
