//! # Multicall Batcher
//!
//! Client-side batching of independent EVM read calls into few multicall
//! round trips.
//!
//! Calling code writes ordinary per-call reads against an [`Executor`]. The
//! [`MulticallDispatcher`] runs those calls twice: once under a capture
//! interceptor that records each encoded request without sending it, and
//! once under a replay interceptor that answers each request with its
//! sub-result from a single aggregated on-chain call.
//!
//! ## Core Features
//!
//! - **Transparent batching**
//!   - Calls are plain async closures, no batching-specific restructuring
//!   - Results returned in input order, whatever the completion order
//!   - Chunking by batch size, optional concurrent chunks
//!
//! - **Aggregators**
//!   - Multicall3 `aggregate3`
//!   - Gas-limited `multicallWithGasLimitation` with truncation handling
//!   - Size-limited `execute(gasLimit, sizeLimit, ...)` with per-call statuses
//!
//! - **Transports**
//!   - `eth_call` over any alloy provider
//!   - Local revm simulation, in-memory or forked
//!
//! ## Features
//!
//! - `rustls-tls`: Uses rustls as the TLS implementation instead of native-tls (OpenSSL).
//!
//!   ```toml
//!   [dependencies]
//!   multicall-batcher = { version = "0.3.0", default-features = false, features = ["rustls-tls"] }
//!   ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use alloy::{
//!     primitives::address,
//!     providers::{Provider, ProviderBuilder},
//! };
//! use multicall_batcher::{
//!     aggregator::Multicall3, transport::ProviderTransport, utils::erc20_utils, Executor,
//!     MulticallDispatcher,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = ProviderBuilder::new().connect_http("https://bsc-dataseed.bnbchain.org".parse()?);
//! let executor = Executor::new(ProviderTransport::new(provider.erased()));
//! let dispatcher = MulticallDispatcher::new(executor, Multicall3::default());
//!
//! let wbnb = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
//! let results = dispatcher
//!     .builder()
//!     .call(move |executor| async move {
//!         erc20_utils::name(&executor, wbnb).await
//!     })
//!     .call(move |executor| async move {
//!         erc20_utils::symbol(&executor, wbnb).await
//!     })
//!     .execute()
//!     .await?;
//! println!("{results:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Structure
//!
//! - `executor`: Call pipeline and lock-scoped interceptors
//! - `dispatcher`: Capture/aggregate/replay batching
//! - `aggregator`: On-chain multicall variants
//! - `transport`: Physical request backends
//! - `evm`: Simulated EVM backend
//! - `types`: Core data structures and configuration
//! - `errors`: Error types
//! - `utils`: ERC20 helpers and revert decoding

pub mod aggregator;
pub mod dispatcher;
pub mod errors;
pub mod evm;
pub mod executor;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export only the essential types and functions
pub use aggregator::{Aggregator, GasLimitedMulticall, Multicall3, SizeLimitedMulticall};
pub use dispatcher::{batch_call, BatchCall, MulticallBuilder, MulticallDispatcher};
pub use errors::CallError;
pub use executor::{Executor, Interceptor};
pub use transport::Transport;
pub use types::{ContractCall, DispatchConfig};
