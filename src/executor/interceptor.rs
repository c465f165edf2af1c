//! Interceptors for the "send request" step of the execution pipeline
//!
//! Exactly one interceptor is bound to an executor scope at a time:
//! - [`Interceptor::PassThrough`] sends the request through the transport
//! - [`Interceptor::Capture`] records the request in a [`CaptureLog`] and
//!   suspends the call forever
//! - [`Interceptor::Replay`] answers the request from a [`ReplayTable`]
//!   without any I/O

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::primitives::Bytes;
use tokio::sync::Notify;

use crate::{
    errors::ProtocolError,
    types::{CallTarget, CapturedRequest},
};

/// Behavior of the request step for calls running inside a scope
#[derive(Debug, Clone, Default)]
pub enum Interceptor {
    #[default]
    PassThrough,
    Capture(CaptureLog),
    Replay(ReplayTable),
}

impl Interceptor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass-through",
            Self::Capture(_) => "capture",
            Self::Replay(_) => "replay",
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append-only log of captured requests, shared by every call of a chunk
///
/// Entries are tagged with the origin index of the call that produced them,
/// so harvesting order never depends on which call reached the request step
/// first.
#[derive(Debug, Clone, Default)]
pub struct CaptureLog {
    inner: Arc<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    entries: Mutex<Vec<CapturedRequest>>,
    notify: Notify,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request
    ///
    /// Untagged requests are numbered in arrival order.
    pub fn record(
        &self,
        target: CallTarget,
        payload: Bytes,
        index: Option<usize>,
    ) -> Result<usize, ProtocolError> {
        let mut entries = lock(&self.inner.entries);
        let index = index.unwrap_or(entries.len());
        if entries.iter().any(|entry| entry.index == index) {
            return Err(ProtocolError::DuplicateCapture { index });
        }
        entries.push(CapturedRequest {
            target,
            payload,
            index,
        });
        drop(entries);

        self.inner.notify.notify_one();
        Ok(index)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        lock(&self.inner.entries).iter().any(|entry| entry.index == index)
    }

    /// Resolves after the next [`record`](Self::record)
    ///
    /// A record made while nobody waits is remembered, so a waiter that
    /// re-checks [`len`](Self::len) before waiting never misses one.
    pub async fn changed(&self) {
        self.inner.notify.notified().await;
    }

    /// Snapshot of the log ordered by origin index
    pub fn harvest(&self) -> Vec<CapturedRequest> {
        let mut entries = lock(&self.inner.entries).clone();
        entries.sort_by_key(|entry| entry.index);
        entries
    }
}

/// Pre-supplied responses for replayed calls
///
/// Each entry keeps the payload captured for its origin index: a replayed
/// call must encode exactly the same request, and may request only once.
#[derive(Debug, Clone, Default)]
pub struct ReplayTable {
    inner: Arc<ReplayState>,
}

#[derive(Debug, Default)]
struct ReplayState {
    entries: Mutex<HashMap<usize, ReplayEntry>>,
    constant: Option<Bytes>,
}

#[derive(Debug)]
struct ReplayEntry {
    payload: Bytes,
    response: Bytes,
    served: bool,
}

impl ReplayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table answering every request with `response`
    pub fn constant(response: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(ReplayState {
                entries: Mutex::default(),
                constant: Some(response.into()),
            }),
        }
    }

    /// Register the response for the call at `index`
    pub fn insert(&self, index: usize, payload: Bytes, response: Bytes) {
        lock(&self.inner.entries).insert(
            index,
            ReplayEntry {
                payload,
                response,
                served: false,
            },
        );
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer a request coming from the call at `index`
    pub fn respond(&self, index: Option<usize>, payload: &Bytes) -> Result<Bytes, ProtocolError> {
        let mut entries = lock(&self.inner.entries);
        if let Some(entry) = index.and_then(|index| entries.get_mut(&index)) {
            let index = index.unwrap_or_default();
            if entry.served {
                return Err(ProtocolError::MultipleRequests { index });
            }
            if entry.payload != *payload {
                return Err(ProtocolError::NonDeterministicPayload { index });
            }
            entry.served = true;
            return Ok(entry.response.clone());
        }

        self.inner
            .constant
            .clone()
            .ok_or(ProtocolError::MissingResponse { index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, MethodDescriptor};

    fn target() -> CallTarget {
        CallTarget {
            address: Address::ZERO,
            method: MethodDescriptor {
                signature: "decimals()",
                selector: [0x31, 0x3c, 0xe5, 0x67],
            },
        }
    }

    #[test]
    fn test_capture_harvest_is_index_ordered() {
        let log = CaptureLog::new();
        log.record(target(), Bytes::from(vec![2u8]), Some(2)).unwrap();
        log.record(target(), Bytes::from(vec![0u8]), Some(0)).unwrap();
        log.record(target(), Bytes::from(vec![1u8]), Some(1)).unwrap();

        let indices: Vec<_> = log.harvest().iter().map(|entry| entry.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(log.contains(1));
        assert_eq!(
            log.record(target(), Bytes::new(), Some(1)),
            Err(ProtocolError::DuplicateCapture { index: 1 })
        );
    }

    #[test]
    fn test_capture_untagged_uses_arrival_order() {
        let log = CaptureLog::new();
        assert_eq!(log.record(target(), Bytes::new(), None), Ok(0));
        assert_eq!(log.record(target(), Bytes::new(), None), Ok(1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_replay_serves_each_index_once() {
        let table = ReplayTable::new();
        let payload = Bytes::from(vec![0xaa]);
        table.insert(3, payload.clone(), Bytes::from(vec![0x01]));

        assert_eq!(table.respond(Some(3), &payload), Ok(Bytes::from(vec![0x01])));
        assert_eq!(
            table.respond(Some(3), &payload),
            Err(ProtocolError::MultipleRequests { index: 3 })
        );
        assert_eq!(
            table.respond(Some(4), &payload),
            Err(ProtocolError::MissingResponse { index: Some(4) })
        );
    }

    #[test]
    fn test_replay_rejects_changed_payload() {
        let table = ReplayTable::new();
        table.insert(0, Bytes::from(vec![0xaa]), Bytes::from(vec![0x01]));
        assert_eq!(
            table.respond(Some(0), &Bytes::from(vec![0xbb])),
            Err(ProtocolError::NonDeterministicPayload { index: 0 })
        );
    }

    #[test]
    fn test_constant_replay() {
        let table = ReplayTable::constant(vec![0x2a]);
        assert_eq!(table.respond(None, &Bytes::new()), Ok(Bytes::from(vec![0x2a])));
        assert_eq!(table.respond(Some(9), &Bytes::new()), Ok(Bytes::from(vec![0x2a])));
    }
}
