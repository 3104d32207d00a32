use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::conn::Connection;

/// Custom health check, called with the connection and whether this is the
/// fast check run on acquisition (`true`) or the full periodic check
/// (`false`). Returns `true` when the connection may be kept.
pub type HealthChecker = Arc<dyn Fn(&Connection, bool) -> bool + Send + Sync>;

/// Connection pool configuration.
///
/// Every `(network, address)` pair gets its own pool built from the same
/// configuration.
///
/// # Default Configuration
///
/// - `min_idle`: 0
/// - `max_idle`: 65536
/// - `max_active`: 0 (unbounded)
/// - `wait`: false
/// - `idle_timeout`: 50 seconds
/// - `max_conn_lifetime`: 0 (unbounded)
/// - `dial_timeout`: 200 milliseconds
/// - `force_close`: false
/// - `check_interval`: 3 seconds
///
/// # Example
///
/// ```rust
/// use horm_client::PoolConfig;
/// use std::time::Duration;
///
/// // At most 8 connections per address, callers queue for a free one.
/// let config = PoolConfig {
///     max_active: 8,
///     wait: true,
///     idle_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    /// Idle connections kept warm by the maintenance pass.
    pub min_idle: usize,
    /// Upper bound of the idle list; the oldest idle connection is closed
    /// when a release would exceed it.
    pub max_idle: usize,
    /// Upper bound of open connections, 0 means unbounded.
    pub max_active: usize,
    /// Queue for a free connection at `max_active` instead of failing fast.
    pub wait: bool,
    /// Idle connections unused for longer are closed by the maintenance pass,
    /// 0 disables the check.
    pub idle_timeout: Duration,
    /// Connections older than this are closed by the maintenance pass, 0
    /// disables the check.
    pub max_conn_lifetime: Duration,
    /// Dial timeout used when the caller has no deadline, 0 means none.
    pub dial_timeout: Duration,
    /// Close every connection on release instead of recycling it.
    pub force_close: bool,
    /// Period of the maintenance pass, 0 disables it.
    pub check_interval: Duration,
    /// Replaces the built-in health check.
    pub checker: Option<HealthChecker>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_idle: 65536,
            max_active: 0,
            wait: false,
            idle_timeout: Duration::from_secs(50),
            max_conn_lifetime: Duration::ZERO,
            dial_timeout: Duration::from_millis(200),
            force_close: false,
            check_interval: Duration::from_secs(3),
            checker: None,
        }
    }
}

impl PoolConfig {
    /// Whether callers queue on the admission semaphore.
    pub(crate) fn bounded_wait(&self) -> bool {
        self.wait && self.max_active > 0
    }

    /// Whether callers beyond `max_active` are refused immediately.
    pub(crate) fn bounded_fail_fast(&self) -> bool {
        !self.wait && self.max_active > 0
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min_idle", &self.min_idle)
            .field("max_idle", &self.max_idle)
            .field("max_active", &self.max_active)
            .field("wait", &self.wait)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_conn_lifetime", &self.max_conn_lifetime)
            .field("dial_timeout", &self.dial_timeout)
            .field("force_close", &self.force_close)
            .field("check_interval", &self.check_interval)
            .field("checker", &self.checker.as_ref().map(|_| "custom"))
            .finish()
    }
}
