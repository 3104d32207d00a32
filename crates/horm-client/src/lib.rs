//! horm access client transport core
//!
//! This crate issues requests to the horm access service over pooled TCP
//! connections speaking the frame protocol of [`horm_common`].
//!
//! # Components
//!
//! - [`Context`]: deadline and cancellation of a call
//! - [`selector`]: endpoint to node resolution, pluggable per target scheme
//! - [`Pool`]: per-address connection pools with health checking
//! - [`Transport`]: one request/response exchange on a pooled connection
//! - [`Client`]: the invocation pipeline tying them together
//!
//! # Example
//!
//! ```rust,no_run
//! use horm_client::{Client, Context, ReqParam};
//! use horm_common::{CallerOptions, QueryMode, RequestHeader};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::default();
//! let ctx = Context::background();
//!
//! let head = RequestHeader::build(QueryMode::Single, &CallerOptions::default(), ctx.remaining());
//! let param = ReqParam {
//!     target: "ip://127.0.0.1:8180".to_string(),
//!     ..Default::default()
//! };
//!
//! let (rsp, body) = client.invoke(&ctx, &head, b"query", &param).await?;
//! println!("request {} answered with {} bytes", rsp.request_id, body.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod pool;
pub mod selector;
pub mod transport;

pub use client::{Client, ClientConfig, ReqParam};
pub use context::{Context, ContextError};
pub use pool::{
    Connection, ConnectionPool, HealthChecker, Pool, PoolConfig, PoolStats, PooledConnection, Probe,
};
pub use selector::{CallResult, Location, Node, NodeCell, SelectOptions, Selector, SelectorRegistry};
pub use transport::{RoundTrip, Transport};
