//! # Priceverse RPC Surface
//!
//! Three services over the core (`PricesService@2.0.0`,
//! `ChartsService@2.0.0`, `HealthService@1.0.0`) behind one JSON envelope
//! `{id, version, timestamp, service, method, input}`. The services read
//! the canonical price cache and the repositories; nothing on this surface
//! writes pipeline state.
//!
//! Streaming (`streamPrices`) rides a bounded in-process broadcast fed
//! from the aggregator's Redis pub/sub channels; subscribers carry an
//! abort signal and an idle timeout.

pub mod charts;
pub mod envelope;
pub mod health;
pub mod prices;
pub mod server;
pub mod stream;
pub mod validation;

pub use charts::ChartsService;
pub use envelope::{RpcErrorBody, RpcRequest, RpcResponse, ENVELOPE_VERSION};
pub use health::{HealthService, HealthSource};
pub use prices::PricesService;
pub use server::{RpcContext, RpcServer};
pub use stream::{PriceBroadcaster, PriceStream};
