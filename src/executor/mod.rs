//! Call execution with a swappable request interceptor
//!
//! Every call runs the same pipeline: encode the arguments, hand the encoded
//! request to the active [`Interceptor`], decode the response. The executor
//! owns a single interceptor slot. [`Executor::with_interceptor`] installs an
//! interceptor for the duration of a scope, under a lock held for the whole
//! scope, and restores the previous one when the scope ends (including early
//! exit through an error or cancellation).
//!
//! Only handles passed into a scope are bound to it. Any other handle of the
//! same executor keeps sending requests through the transport, so unrelated
//! calls running concurrently with a scope are never captured or replayed by
//! it.
//!
//! ```no_run
//! # use alloy::{primitives::Address, sol};
//! # use multicall_batcher::{transport::Transport, CallError, Executor};
//! sol! {
//!     function decimals() external view returns (uint8);
//! }
//!
//! # async fn example<T: Transport>(executor: Executor<T>, token: Address) -> Result<(), CallError> {
//! let decimals = executor.execute(token, decimalsCall {}).await?;
//! # Ok(())
//! # }
//! ```

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use alloy::{primitives::Address, sol_types::SolCall};
use tracing::{debug, trace, warn};

use crate::{
    errors::{CallError, ConcurrencyMisuseError},
    transport::Transport,
    types::{Bytes, CallTarget, ContractCall},
};

pub mod interceptor;

pub use interceptor::{CaptureLog, Interceptor, ReplayTable};

tokio::task_local! {
    /// Scopes held by the current task, as (executor, scope) pairs
    static HELD_SCOPES: Vec<(usize, u64)>;
}

/// Handle for executing read calls through a transport
///
/// Cheap to clone; clones share the transport and the interceptor slot.
pub struct Executor<T> {
    shared: Arc<Shared<T>>,
    binding: Option<Binding>,
}

struct Shared<T> {
    transport: T,
    slot: Mutex<Slot>,
    scope_lock: tokio::sync::Mutex<()>,
    next_scope: AtomicU64,
}

#[derive(Default)]
struct Slot {
    owner: Option<u64>,
    interceptor: Interceptor,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    scope: u64,
    index: Option<usize>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            binding: self.binding,
        }
    }
}

impl<T> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Executor<T> {
    pub fn new(transport: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                slot: Mutex::default(),
                scope_lock: tokio::sync::Mutex::new(()),
                next_scope: AtomicU64::new(0),
            }),
            binding: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Scope this handle is bound to, if any
    pub fn scope(&self) -> Option<u64> {
        self.binding.map(|binding| binding.scope)
    }

    /// Origin index the requests of this handle are tagged with
    pub fn origin_index(&self) -> Option<usize> {
        self.binding.and_then(|binding| binding.index)
    }

    /// Same scope binding, requests tagged with `index`
    ///
    /// The dispatcher hands each call of a chunk its own tagged handle, so
    /// captured requests and replayed responses line up with call positions
    /// regardless of completion order. Has no effect on unbound handles.
    pub fn tagged(&self, index: usize) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            binding: self.binding.map(|binding| Binding {
                index: Some(index),
                ..binding
            }),
        }
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Handle of the same executor that always sends through the transport
    pub fn unbound(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            binding: None,
        }
    }

    /// Execute `args` against the contract at `target`
    pub async fn execute<C: SolCall>(&self, target: Address, args: C) -> Result<C::Return, CallError> {
        self.execute_call(&ContractCall::new(target, args)).await
    }

    /// Encode, send through the active interceptor, decode
    pub async fn execute_call<C: SolCall>(
        &self,
        call: &ContractCall<C>,
    ) -> Result<C::Return, CallError> {
        let raw = self.request(&call.target(), call.encode()).await?;
        Ok(call.decode_result(&raw)?)
    }

    /// The "send request" step
    ///
    /// Under capture the returned future never resolves: the request is
    /// recorded and the calling task stays suspended until it is dropped.
    pub async fn request(&self, target: &CallTarget, payload: Bytes) -> Result<Bytes, CallError> {
        match self.active_interceptor()? {
            Interceptor::PassThrough => Ok(self.shared.transport.request(target, payload).await?),
            Interceptor::Capture(log) => {
                let index = log.record(*target, payload, self.origin_index())?;
                trace!(index, %target, "Captured request");
                std::future::pending().await
            }
            Interceptor::Replay(table) => {
                let response = table.respond(self.origin_index(), &payload)?;
                trace!(index = ?self.origin_index(), %target, "Replayed response");
                Ok(response)
            }
        }
    }

    fn active_interceptor(&self) -> Result<Interceptor, ConcurrencyMisuseError> {
        let Some(binding) = self.binding else {
            return Ok(Interceptor::PassThrough);
        };
        let slot = self.shared.slot();
        if slot.owner != Some(binding.scope) {
            return Err(ConcurrencyMisuseError::StaleHandle {
                scope: binding.scope,
            });
        }
        Ok(slot.interceptor.clone())
    }

    /// Run `body` with `interceptor` installed
    ///
    /// The scope lock is held until `body` finishes, so scopes on the same
    /// executor run one after another. `body` receives a handle bound to the
    /// new scope; calls made through it (or its [`tagged`](Self::tagged)
    /// copies) are served by `interceptor`.
    ///
    /// Opening a scope on an executor whose scope the current task already
    /// holds fails with [`ConcurrencyMisuseError::NestedScope`], whether the
    /// handle is bound or not. Tasks spawned from inside a scope do not hold
    /// it and simply wait for the lock.
    pub async fn with_interceptor<F, Fut, R>(
        &self,
        interceptor: Interceptor,
        body: F,
    ) -> Result<R, CallError>
    where
        F: FnOnce(Executor<T>) -> Fut,
        Fut: Future<Output = R>,
    {
        if let Some(binding) = self.binding {
            if self.shared.slot().owner == Some(binding.scope) {
                return Err(ConcurrencyMisuseError::NestedScope {
                    scope: binding.scope,
                }
                .into());
            }
        }

        let mut held = HELD_SCOPES
            .try_with(|held| held.clone())
            .unwrap_or_default();
        if let Some(&(_, scope)) = held.iter().find(|(executor, _)| *executor == self.id()) {
            return Err(ConcurrencyMisuseError::NestedScope { scope }.into());
        }

        let _permit = self.shared.scope_lock.lock().await;
        let scope = self.shared.next_scope.fetch_add(1, Ordering::Relaxed) + 1;
        let kind = interceptor.name();
        let guard = SlotGuard::install(&self.shared, scope, interceptor)?;
        debug!(scope, interceptor = kind, "Entered interceptor scope");

        held.push((self.id(), scope));
        let body = body(Executor {
            shared: Arc::clone(&self.shared),
            binding: Some(Binding { scope, index: None }),
        });
        let output = HELD_SCOPES.scope(held, body).await;

        guard.restore()?;
        debug!(scope, "Left interceptor scope");
        Ok(output)
    }
}

/// Restores the slot when a scope ends, even if its future is dropped
struct SlotGuard<'a, T> {
    shared: &'a Shared<T>,
    scope: u64,
    previous: Option<Slot>,
}

impl<'a, T> SlotGuard<'a, T> {
    fn install(
        shared: &'a Shared<T>,
        scope: u64,
        interceptor: Interceptor,
    ) -> Result<Self, ConcurrencyMisuseError> {
        let mut slot = shared.slot();
        if let Some(owner) = slot.owner {
            return Err(ConcurrencyMisuseError::SlotOccupied { owner });
        }
        let previous = std::mem::replace(
            &mut *slot,
            Slot {
                owner: Some(scope),
                interceptor,
            },
        );
        Ok(Self {
            shared,
            scope,
            previous: Some(previous),
        })
    }

    fn restore(mut self) -> Result<(), ConcurrencyMisuseError> {
        self.put_back()
    }

    fn put_back(&mut self) -> Result<(), ConcurrencyMisuseError> {
        let Some(previous) = self.previous.take() else {
            return Ok(());
        };
        let mut slot = self.shared.slot();
        if slot.owner != Some(self.scope) {
            return Err(ConcurrencyMisuseError::SlotReplaced {
                scope: self.scope,
                found: slot.owner,
            });
        }
        *slot = previous;
        Ok(())
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if self.previous.is_some() {
            if let Err(e) = self.put_back() {
                warn!(error = %e, "Interceptor slot not restored");
            } else {
                debug!(scope = self.scope, "Interceptor scope cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProtocolError, TransportError};
    use alloy::sol;
    use std::sync::atomic::AtomicUsize;

    sol! {
        function decimals() external view returns (uint8);
    }

    /// Answers every request with the same word and counts requests
    struct FixedTransport {
        response: Bytes,
        requests: AtomicUsize,
    }

    impl FixedTransport {
        fn returning(value: u8) -> Self {
            Self {
                response: decimalsCall::abi_encode_returns(&value).into(),
                requests: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for FixedTransport {
        async fn request(&self, _: &CallTarget, _: Bytes) -> Result<Bytes, TransportError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_pass_through_uses_transport() {
        let executor = Executor::new(FixedTransport::returning(18));
        let decimals = executor.execute(Address::ZERO, decimalsCall {}).await.unwrap();
        assert_eq!(decimals, 18);
        assert_eq!(executor.transport().requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_scope_skips_transport() {
        let executor = Executor::new(FixedTransport::returning(18));
        let table = ReplayTable::constant(decimalsCall::abi_encode_returns(&6u8));

        let decimals = executor
            .with_interceptor(Interceptor::Replay(table), |scoped| async move {
                scoped.execute(Address::ZERO, decimalsCall {}).await
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(decimals, 6);
        assert_eq!(executor.transport().requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unbound_handle_bypasses_scope() {
        let executor = Executor::new(FixedTransport::returning(18));
        let outside = executor.clone();
        let table = ReplayTable::constant(decimalsCall::abi_encode_returns(&6u8));

        let (inside, outside) = executor
            .with_interceptor(Interceptor::Replay(table), |scoped| async move {
                let inside = scoped.execute(Address::ZERO, decimalsCall {}).await.unwrap();
                let outside = outside.execute(Address::ZERO, decimalsCall {}).await.unwrap();
                (inside, outside)
            })
            .await
            .unwrap();

        assert_eq!((inside, outside), (6, 18));
    }

    #[tokio::test]
    async fn test_capture_records_and_suspends() {
        let executor = Executor::new(FixedTransport::returning(18));
        let log = CaptureLog::new();

        let finished = executor
            .with_interceptor(Interceptor::Capture(log.clone()), |scoped| async move {
                let handle = scoped.tagged(4);
                let call = handle.execute(Address::ZERO, decimalsCall {});
                tokio::time::timeout(std::time::Duration::from_millis(20), call)
                    .await
                    .is_ok()
            })
            .await
            .unwrap();

        assert!(!finished);
        let captured = log.harvest();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].index, 4);
        assert_eq!(captured[0].payload.as_ref(), decimalsCall::SELECTOR.as_slice());
        assert_eq!(executor.transport().requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nested_scope_is_rejected() {
        let executor = Executor::new(FixedTransport::returning(18));

        let inner = executor
            .with_interceptor(Interceptor::PassThrough, |scoped| async move {
                scoped
                    .with_interceptor(Interceptor::PassThrough, |_| async {})
                    .await
            })
            .await
            .unwrap();

        assert!(matches!(
            inner,
            Err(CallError::ConcurrencyMisuse(ConcurrencyMisuseError::NestedScope { .. }))
        ));
    }

    #[tokio::test]
    async fn test_nested_scope_from_unbound_handle_is_rejected() {
        let executor = Executor::new(FixedTransport::returning(18));
        let same = executor.clone();
        let other = Executor::new(FixedTransport::returning(6));

        let scope = executor.with_interceptor(Interceptor::PassThrough, |_| async move {
            let nested = same
                .with_interceptor(Interceptor::PassThrough, |_| async {})
                .await;
            let independent = other
                .with_interceptor(Interceptor::PassThrough, |scoped| async move {
                    scoped.execute(Address::ZERO, decimalsCall {}).await
                })
                .await;
            (nested, independent)
        });
        let (nested, independent) = tokio::time::timeout(std::time::Duration::from_secs(1), scope)
            .await
            .expect("nested scope must fail instead of waiting for the lock")
            .unwrap();

        assert!(matches!(
            nested,
            Err(CallError::ConcurrencyMisuse(ConcurrencyMisuseError::NestedScope { scope: 1 }))
        ));
        assert_eq!(independent.unwrap().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_stale_handle_is_rejected() {
        let executor = Executor::new(FixedTransport::returning(18));
        let leaked = executor
            .with_interceptor(Interceptor::PassThrough, |scoped| async move { scoped })
            .await
            .unwrap();

        let err = leaked.execute(Address::ZERO, decimalsCall {}).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::ConcurrencyMisuse(ConcurrencyMisuseError::StaleHandle { .. })
        ));
        // A stale handle may still open a fresh scope
        assert!(leaked
            .with_interceptor(Interceptor::PassThrough, |_| async {})
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_scope_restores_slot() {
        let executor = Executor::new(FixedTransport::returning(18));
        let log = CaptureLog::new();

        let scope = executor.with_interceptor(Interceptor::Capture(log), |scoped| async move {
            scoped.execute(Address::ZERO, decimalsCall {}).await
        });
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), scope)
            .await
            .is_err());

        let table = ReplayTable::constant(decimalsCall::abi_encode_returns(&6u8));
        let decimals = executor
            .with_interceptor(Interceptor::Replay(table), |scoped| async move {
                scoped.execute(Address::ZERO, decimalsCall {}).await
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decimals, 6);
    }

    #[tokio::test]
    async fn test_replay_errors_surface_as_protocol_errors() {
        let executor = Executor::new(FixedTransport::returning(18));

        let result = executor
            .with_interceptor(Interceptor::Replay(ReplayTable::new()), |scoped| async move {
                scoped.tagged(0).execute(Address::ZERO, decimalsCall {}).await
            })
            .await
            .unwrap();

        assert!(matches!(
            result,
            Err(CallError::Protocol(ProtocolError::MissingResponse { index: Some(0) }))
        ));
    }
}
