use crate::snapshot::CounterSnapshot;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Counters emitted by the transport core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// A new connection was dialed.
    NewConnection,
    /// Acquiring a pooled connection failed.
    GetConnectionErr,
    /// A caller was refused because the pool was at `max_active`.
    PoolOverLimit,
    /// An idle connection was evicted after `idle_timeout`.
    IdleTimeout,
    /// A connection was evicted after `max_conn_lifetime`.
    LifetimeExceed,
    /// The liveness probe found a connection unusable.
    RemoteErr,
    /// The liveness probe found the peer had closed the connection.
    RemoteEof,
    /// A call was attempted with no codec configured.
    CodecEmpty,
    /// The selector failed to produce a node.
    SelectNodeFail,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::NewConnection,
        Counter::GetConnectionErr,
        Counter::PoolOverLimit,
        Counter::IdleTimeout,
        Counter::LifetimeExceed,
        Counter::RemoteErr,
        Counter::RemoteEof,
        Counter::CodecEmpty,
        Counter::SelectNodeFail,
    ];

    /// Stable metric name.
    pub fn name(self) -> &'static str {
        match self {
            Counter::NewConnection => "new_connection",
            Counter::GetConnectionErr => "get_connection_err",
            Counter::PoolOverLimit => "pool_over_limit",
            Counter::IdleTimeout => "idle_timeout",
            Counter::LifetimeExceed => "lifetime_exceed",
            Counter::RemoteErr => "remote_err",
            Counter::RemoteEof => "remote_eof",
            Counter::CodecEmpty => "codec_empty",
            Counter::SelectNodeFail => "select_node_fail",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free in-memory counter store.
///
/// Every counter is a single `AtomicU64` updated with relaxed ordering, so
/// increments from concurrent calls never contend on a lock. Snapshots are
/// not atomic across counters.
#[derive(Debug)]
pub struct CounterRegistry {
    counters: [AtomicU64; Counter::ALL.len()],
    started_ms: u64,
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            started_ms: now_millis(),
        }
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let now = now_millis();
        CounterSnapshot {
            counters: Counter::ALL
                .iter()
                .map(|c| (c.name().to_string(), self.get(*c)))
                .collect(),
            uptime_ms: now.saturating_sub(self.started_ms),
            timestamp_ms: now,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricsSink;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let registry = CounterRegistry::new();
        for counter in Counter::ALL {
            assert_eq!(registry.get(counter), 0, "{}", counter);
        }
    }

    #[test]
    fn test_incr_touches_only_its_counter() {
        let registry = CounterRegistry::new();
        registry.incr(Counter::RemoteEof);
        registry.add(Counter::PoolOverLimit, 3);

        assert_eq!(registry.get(Counter::RemoteEof), 1);
        assert_eq!(registry.get(Counter::PoolOverLimit), 3);
        assert_eq!(registry.get(Counter::RemoteErr), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(CounterRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.incr(Counter::NewConnection);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get(Counter::NewConnection), 8000);
    }

    #[test]
    fn test_reset() {
        let registry = CounterRegistry::new();
        registry.incr(Counter::CodecEmpty);
        registry.reset();
        assert_eq!(registry.get(Counter::CodecEmpty), 0);
    }

    #[test]
    fn test_names_are_unique() {
        let names: std::collections::HashSet<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), Counter::ALL.len());
        for (i, counter) in Counter::ALL.iter().enumerate() {
            assert_eq!(counter.index(), i);
        }
    }
}
