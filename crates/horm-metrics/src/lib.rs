//! horm client metrics
//!
//! This crate defines the counters emitted by the horm transport core and the
//! sink they are emitted into. The core only ever calls
//! [`MetricsSink::incr`]; where the numbers end up is up to the application.
//!
//! # Components
//!
//! - [`Counter`]: the fixed set of counter identities
//! - [`MetricsSink`]: trait implemented by counter backends
//! - [`CounterRegistry`]: lock-free in-memory sink with serializable snapshots
//! - [`NoopSink`]: discards everything
//!
//! # Usage Example
//!
//! ```rust
//! use horm_metrics::{Counter, CounterRegistry, MetricsSink};
//!
//! let registry = CounterRegistry::new();
//! registry.incr(Counter::NewConnection);
//! registry.incr(Counter::NewConnection);
//!
//! let snapshot = registry.snapshot();
//! assert_eq!(snapshot.get(Counter::NewConnection), 2);
//! ```
//!
//! # Thread Safety
//!
//! Sinks are shared as `Arc<dyn MetricsSink>` across every pool and call, so
//! implementations must be `Send + Sync`. [`CounterRegistry`] uses relaxed
//! atomics only.

mod registry;
mod sink;
mod snapshot;

pub use registry::{Counter, CounterRegistry};
pub use sink::{global, MetricsSink, NoopSink};
pub use snapshot::CounterSnapshot;
