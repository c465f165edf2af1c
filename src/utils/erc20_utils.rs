//! ERC20 token read helpers
//!
//! The single-call helpers take an [`Executor`] handle, so they work the same
//! standalone (one `eth_call` each) and inside a dispatched batch closure
//! (captured and aggregated). [`get_token_infos`] batches the metadata of
//! many tokens into one dispatch.

use alloy::{
    primitives::{Address, U256},
    sol,
};
use serde::Serialize;

use crate::{
    aggregator::Aggregator,
    dispatcher::{batch_call, BatchCall, MulticallDispatcher},
    errors::CallError,
    executor::Executor,
    transport::Transport,
};

sol! {
    function name() external view returns (string);
    function symbol() external view returns (string);
    function decimals() external view returns (uint8);
    function balanceOf(address owner) external view returns (uint256);
    function totalSupply() external view returns (uint256);
}

/// Token metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

/// One metadata field, so calls with different return types share a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenField {
    Name(String),
    Symbol(String),
    Decimals(u8),
    TotalSupply(U256),
}

pub async fn name<T: Transport>(executor: &Executor<T>, token: Address) -> Result<String, CallError> {
    executor.execute(token, nameCall {}).await
}

pub async fn symbol<T: Transport>(executor: &Executor<T>, token: Address) -> Result<String, CallError> {
    executor.execute(token, symbolCall {}).await
}

pub async fn decimals<T: Transport>(executor: &Executor<T>, token: Address) -> Result<u8, CallError> {
    executor.execute(token, decimalsCall {}).await
}

pub async fn total_supply<T: Transport>(
    executor: &Executor<T>,
    token: Address,
) -> Result<U256, CallError> {
    executor.execute(token, totalSupplyCall {}).await
}

/// Token balance of `owner`, in the token's smallest unit
pub async fn balance_of<T: Transport>(
    executor: &Executor<T>,
    token: Address,
    owner: Address,
) -> Result<U256, CallError> {
    executor.execute(token, balanceOfCall { owner }).await
}

/// The four metadata calls of `token`, in [`TokenInfo`] field order
pub fn token_field_calls<T: Transport>(token: Address) -> [BatchCall<T, TokenField>; 4] {
    [
        batch_call(move |executor: Executor<T>| async move {
            name(&executor, token).await.map(TokenField::Name)
        }),
        batch_call(move |executor: Executor<T>| async move {
            symbol(&executor, token).await.map(TokenField::Symbol)
        }),
        batch_call(move |executor: Executor<T>| async move {
            decimals(&executor, token).await.map(TokenField::Decimals)
        }),
        batch_call(move |executor: Executor<T>| async move {
            total_supply(&executor, token).await.map(TokenField::TotalSupply)
        }),
    ]
}

/// Fetch name, symbol, decimals and total supply of every token
///
/// All `4 * tokens.len()` calls go through one dispatch, chunked by the
/// dispatcher's configured batch size. With `allow_failure`, a token whose
/// metadata is incomplete (a non-ERC20 contract, a reverting getter) yields
/// `None`; without it the first failing call aborts.
pub async fn get_token_infos<T, A>(
    dispatcher: &MulticallDispatcher<T, A>,
    tokens: &[Address],
    allow_failure: bool,
) -> Result<Vec<Option<TokenInfo>>, CallError>
where
    T: Transport,
    A: Aggregator,
{
    let calls: Vec<BatchCall<T, TokenField>> = tokens
        .iter()
        .flat_map(|token| token_field_calls(*token))
        .collect();
    let fields = dispatcher
        .dispatch(&calls, dispatcher.config().batch_size, allow_failure)
        .await?;

    Ok(tokens
        .iter()
        .zip(fields.chunks(4))
        .map(|(address, fields)| match fields {
            [
                Some(TokenField::Name(name)),
                Some(TokenField::Symbol(symbol)),
                Some(TokenField::Decimals(decimals)),
                Some(TokenField::TotalSupply(total_supply)),
            ] => Some(TokenInfo {
                address: *address,
                name: name.clone(),
                symbol: symbol.clone(),
                decimals: *decimals,
                total_supply: *total_supply,
            }),
            _ => None,
        })
        .collect())
}
