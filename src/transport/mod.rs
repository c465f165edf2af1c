//! Physical request transports
//!
//! A [`Transport`] performs the real "send request" step of the execution
//! pipeline. It is only reached when an executor runs with the pass-through
//! interceptor; capture and replay never touch it.
//!
//! - [`provider::ProviderTransport`]: `eth_call` over any alloy provider
//! - [`evm::EvmTransport`]: local execution on a [`SimulatedEvm`](crate::evm::SimulatedEvm)
//!
//! Retries, timeouts and endpoint selection belong to the transport stack
//! underneath; failures are surfaced as-is.

use std::{future::Future, sync::Arc};

use alloy::primitives::Bytes;

use crate::{errors::TransportError, types::CallTarget};

pub mod evm;
pub mod provider;

pub use evm::EvmTransport;
pub use provider::ProviderTransport;

/// Sends one encoded read call and returns the raw response bytes
pub trait Transport: Send + Sync + 'static {
    fn request(
        &self,
        target: &CallTarget,
        payload: Bytes,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn request(
        &self,
        target: &CallTarget,
        payload: Bytes,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send {
        (**self).request(target, payload)
    }
}
