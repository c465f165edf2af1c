//! JSON-RPC transport backed by an alloy provider

use std::marker::PhantomData;

use alloy::{
    eips::BlockId,
    network::{Ethereum, Network, TransactionBuilder},
    primitives::Bytes,
    providers::Provider,
    transports::TransportError as RpcTransportError,
};

use super::Transport;
use crate::{errors::TransportError, types::CallTarget, utils::error_utils::RevertReason};

/// Issues every request as an `eth_call` through `provider`
///
/// Works with any network the provider speaks (`Ethereum` by default,
/// `AnyNetwork` for chains with non-standard envelopes). Calls run against
/// `block` when pinned, otherwise against the node's latest block.
#[derive(Debug, Clone)]
pub struct ProviderTransport<P, N = Ethereum> {
    provider: P,
    block: Option<BlockId>,
    _network: PhantomData<fn() -> N>,
}

impl<P, N> ProviderTransport<P, N>
where
    N: Network,
    P: Provider<N>,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            block: None,
            _network: PhantomData,
        }
    }

    /// Pin every request to a fixed block
    pub fn at_block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P, N> Transport for ProviderTransport<P, N>
where
    N: Network,
    P: Provider<N> + 'static,
{
    async fn request(&self, target: &CallTarget, payload: Bytes) -> Result<Bytes, TransportError> {
        let tx = N::TransactionRequest::default()
            .with_to(target.address)
            .with_input(payload);

        let mut call = self.provider.call(tx);
        if let Some(block) = self.block {
            call = call.block(block);
        }
        call.await.map_err(|e| map_rpc_error(target, e))
    }
}

fn map_rpc_error(target: &CallTarget, error: RpcTransportError) -> TransportError {
    if let Some(data) = error.as_error_resp().and_then(|payload| payload.as_revert_data()) {
        return TransportError::Reverted {
            reason: RevertReason::decode(&data),
            data,
        };
    }
    TransportError::Rpc(format!("eth_call to {target} failed: {error}"))
}
