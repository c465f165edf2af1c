//! Fluent construction of a multicall batch

use std::{future::Future, ops::Range, sync::Arc};

use super::{batch_call, BatchCall, MulticallDispatcher};
use crate::{aggregator::Aggregator, errors::CallError, executor::Executor, transport::Transport};

/// Queues calls and dispatch parameters for one batch
///
/// `batch_size` and `allow_failure` start from the dispatcher's
/// [`DispatchConfig`](crate::types::DispatchConfig).
///
/// ```no_run
/// # use alloy::{primitives::Address, sol};
/// # use multicall_batcher::{aggregator::Aggregator, transport::Transport, CallError, MulticallDispatcher};
/// sol! {
///     function balanceOf(address owner) external view returns (uint256);
/// }
///
/// # async fn example<T: Transport, A: Aggregator>(
/// #     dispatcher: MulticallDispatcher<T, A>,
/// #     token: Address,
/// #     holders: Vec<Address>,
/// # ) -> Result<(), CallError> {
/// let holders = std::sync::Arc::new(holders);
/// let balances = dispatcher
///     .builder()
///     .call_range(0..holders.len(), move |executor, i| {
///         let owner = holders[i];
///         async move { executor.execute(token, balanceOfCall { owner }).await }
///     })
///     .allow_failure(true)
///     .execute()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct MulticallBuilder<T, A, V> {
    dispatcher: MulticallDispatcher<T, A>,
    calls: Vec<BatchCall<T, V>>,
    batch_size: usize,
    allow_failure: bool,
}

impl<T, A, V> MulticallBuilder<T, A, V>
where
    T: Transport,
    A: Aggregator,
    V: Send + 'static,
{
    pub fn new(dispatcher: MulticallDispatcher<T, A>) -> Self {
        let config = dispatcher.config();
        Self {
            batch_size: config.batch_size,
            allow_failure: config.allow_failure,
            dispatcher,
            calls: Vec::new(),
        }
    }

    /// Append one call
    pub fn call<F, Fut>(mut self, call: F) -> Self
    where
        F: Fn(Executor<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, CallError>> + Send + 'static,
    {
        self.calls.push(batch_call(call));
        self
    }

    /// Append one call per index of `range`, each receiving its index
    pub fn call_range<F, Fut>(self, range: Range<usize>, call: F) -> Self
    where
        F: Fn(Executor<T>, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, CallError>> + Send + 'static,
    {
        self.call_indices(range, call)
    }

    /// Append one call per index in `indices`, each receiving its index
    pub fn call_indices<I, F, Fut>(mut self, indices: I, call: F) -> Self
    where
        I: IntoIterator<Item = usize>,
        F: Fn(Executor<T>, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, CallError>> + Send + 'static,
    {
        let call = Arc::new(call);
        for index in indices {
            let call = Arc::clone(&call);
            self.calls
                .push(batch_call(move |executor| call(executor, index)));
        }
        self
    }

    /// Replace every queued call
    pub fn calls(mut self, calls: Vec<BatchCall<T, V>>) -> Self {
        self.calls = calls;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = allow_failure;
        self
    }

    /// Freeze the queued calls into a batch that can be executed repeatedly
    pub fn build(self) -> PreparedMulticall<T, A, V> {
        PreparedMulticall {
            dispatcher: self.dispatcher,
            calls: self.calls,
            batch_size: self.batch_size,
            allow_failure: self.allow_failure,
        }
    }

    pub async fn execute(self) -> Result<Vec<Option<V>>, CallError> {
        self.build().execute().await
    }
}

/// A built batch, bound to its dispatcher
pub struct PreparedMulticall<T, A, V> {
    dispatcher: MulticallDispatcher<T, A>,
    calls: Vec<BatchCall<T, V>>,
    batch_size: usize,
    allow_failure: bool,
}

impl<T, A, V> PreparedMulticall<T, A, V>
where
    T: Transport,
    A: Aggregator,
    V: Send + 'static,
{
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub async fn execute(&self) -> Result<Vec<Option<V>>, CallError> {
        self.dispatcher
            .dispatch(&self.calls, self.batch_size, self.allow_failure)
            .await
    }
}
