//! Connection pooling
//!
//! [`Pool`] keeps one [`ConnectionPool`] per `(network, address)` pair and
//! hands out [`PooledConnection`]s.
//!
//! # Architecture
//!
//! - Idle connections are kept in a LIFO stack: the most recently returned
//!   socket is reused first, the oldest one is evicted first
//! - Every acquisition runs a fast liveness probe on the popped connection
//! - A background maintenance task runs the full health check over the idle
//!   list and tops it up to `min_idle`
//! - With `wait` and `max_active` set, callers queue on a semaphore; with
//!   only `max_active` set they fail fast with [`HormError::PoolLimit`]
//!
//! # Thread Safety
//!
//! The idle list, active counter and closed flag of a pool sit behind one
//! mutex. The pool registry is a `DashMap`, so lookups of existing pools do
//! not contend and each pool is created at most once.
//!
//! # Example
//!
//! ```rust,no_run
//! use horm_client::{Context, Pool, PoolConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(PoolConfig::default());
//!
//! let mut conn = pool.get_conn(&Context::background(), "tcp", "127.0.0.1:8080").await?;
//! conn.write_all(b"...").await?;
//!
//! // Back to the idle list
//! conn.close();
//! # Ok(())
//! # }
//! ```

mod conn;
mod options;

pub use conn::{Connection, PooledConnection, Probe};
pub use options::{HealthChecker, PoolConfig};

use conn::Stream;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use horm_common::{HormError, Result, Stage};
use horm_metrics::{Counter, MetricsSink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use tokio::net::{lookup_host, TcpStream};
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::context::Context;

/// Registry of per-address connection pools.
pub struct Pool {
    pools: DashMap<String, Arc<ConnectionPool>>,
    config: PoolConfig,
    metrics: Arc<dyn MetricsSink>,
    closed: AtomicBool,
}

static GLOBAL: LazyLock<Arc<Pool>> = LazyLock::new(|| Arc::new(Pool::new(PoolConfig::default())));

impl Pool {
    /// Creates a registry reporting to the process-wide metrics registry.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_metrics(config, horm_metrics::global())
    }

    pub fn with_metrics(config: PoolConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Pool {
            pools: DashMap::new(),
            config,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// Process-wide registry with the default configuration.
    pub fn global() -> Arc<Pool> {
        Arc::clone(&GLOBAL)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Checks out a connection to `address`.
    ///
    /// The pool for `(network, address)` is created on first use, which also
    /// starts its maintenance task and pre-dials `min_idle` connections.
    pub async fn get_conn(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
    ) -> Result<PooledConnection> {
        let pool = match self.pool_for(network, address) {
            Ok(pool) => pool,
            Err(e) => {
                self.metrics.incr(Counter::GetConnectionErr);
                return Err(e);
            }
        };

        match pool.get(ctx).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.metrics.incr(Counter::GetConnectionErr);
                debug!(network, address, error = %e, "Failed to get pooled connection");
                Err(e)
            }
        }
    }

    /// Pool for `(network, address)`, if one was created.
    pub fn get_pool(&self, network: &str, address: &str) -> Option<Arc<ConnectionPool>> {
        self.pools
            .get(&pool_key(network, address))
            .map(|p| Arc::clone(p.value()))
    }

    /// Shuts down every pool. Later [`get_conn`](Self::get_conn) calls fail
    /// with [`HormError::PoolClosed`], whatever the address.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pool_for(&self, network: &str, address: &str) -> Result<Arc<ConnectionPool>> {
        if self.is_closed() {
            return Err(HormError::PoolClosed);
        }

        let key = pool_key(network, address);
        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(pool.value()));
        }

        let pool = match self.pools.entry(key) {
            Entry::Occupied(e) => return Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let pool = ConnectionPool::new(
                    network,
                    address,
                    self.config.clone(),
                    Arc::clone(&self.metrics),
                );
                e.insert(Arc::clone(&pool));
                pool
            }
        };

        // a close racing the insert may have missed this pool
        if self.is_closed() {
            self.pools.remove(&pool_key(network, address));
            pool.close();
            return Err(HormError::PoolClosed);
        }

        debug!(network, address, "Created connection pool");
        pool.start();
        Ok(pool)
    }
}

fn pool_key(network: &str, address: &str) -> String {
    format!("{}_{}", network, address)
}

/// Counters of a single pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle ones included.
    pub active: usize,
    pub idle: usize,
    pub closed: bool,
}

struct PoolState {
    /// Front is the most recently returned connection.
    idle: VecDeque<Connection>,
    active: usize,
    closed: bool,
}

/// Connections to one `(network, address)` pair.
pub struct ConnectionPool {
    network: String,
    address: String,
    config: PoolConfig,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<PoolState>,
    slots: Option<Arc<Semaphore>>,
}

impl ConnectionPool {
    pub fn new(
        network: &str,
        address: &str,
        config: PoolConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let slots = config
            .bounded_wait()
            .then(|| Arc::new(Semaphore::new(config.max_active)));

        Arc::new(ConnectionPool {
            network: network.to_string(),
            address: address.to_string(),
            config,
            metrics,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                closed: false,
            }),
            slots,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            closed: state.closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Starts the maintenance task and pre-dials `min_idle` connections.
    pub fn start(self: &Arc<Self>) {
        spawn_maintenance(self);

        if self.config.min_idle > 0 {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.check_min_idle().await });
        }
    }

    /// Checks out a connection, reusing an idle one when possible.
    pub async fn get(self: &Arc<Self>, ctx: &Context) -> Result<PooledConnection> {
        let permit = self.acquire_slot(ctx).await?;

        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(conn, Arc::clone(self), permit));
        }

        // a dial failure drops the permit, returning the slot
        let conn = self.dial_new(ctx).await?;
        Ok(PooledConnection::new(conn, Arc::clone(self), permit))
    }

    async fn acquire_slot(&self, ctx: &Context) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };

        match ctx.run(Arc::clone(slots).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Some(permit)),
            Ok(Err(_)) => Err(HormError::PoolClosed),
            Err(e) => Err(e.at(Stage::Dial)),
        }
    }

    /// Pops idle connections until one passes the fast health check.
    fn pop_idle(&self) -> Option<Connection> {
        loop {
            let conn = self.state.lock().idle.pop_front()?;

            if self.check(&conn, true) {
                return Some(conn);
            }

            debug!(
                network = %self.network,
                address = %self.address,
                "Removing unhealthy idle connection"
            );
            self.discard_idle(conn);
        }
    }

    async fn dial_new(&self, ctx: &Context) -> Result<Connection> {
        {
            let mut state = self.state.lock();
            if self.config.bounded_fail_fast() && state.active >= self.config.max_active {
                drop(state);
                self.metrics.incr(Counter::PoolOverLimit);
                return Err(HormError::PoolLimit);
            }
            if state.closed {
                return Err(HormError::PoolClosed);
            }
            state.active += 1;
        }

        match self.dial(ctx).await {
            Ok(conn) => {
                self.metrics.incr(Counter::NewConnection);
                debug!(
                    network = %self.network,
                    address = %self.address,
                    local = conn.local_addr().unwrap_or_default(),
                    "Dialed new connection"
                );
                Ok(conn)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.active = state.active.saturating_sub(1);
                Err(e)
            }
        }
    }

    async fn dial(&self, ctx: &Context) -> Result<Connection> {
        let timeout = ctx
            .remaining()
            .or_else(|| (!self.config.dial_timeout.is_zero()).then_some(self.config.dial_timeout));
        let connecting = connect(&self.network, &self.address);

        let res = match timeout {
            Some(timeout) => match ctx.run(tokio::time::timeout(timeout, connecting)).await {
                Ok(Ok(res)) => res,
                Ok(Err(_)) => Err(HormError::Timeout {
                    stage: Stage::Dial,
                    msg: format!("dial {} {} timed out after {:?}", self.network, self.address, timeout),
                }),
                Err(e) => Err(e.at(Stage::Dial)),
            },
            None => ctx.run(connecting).await.unwrap_or_else(|e| Err(e.at(Stage::Dial))),
        };

        let stream = res?;
        let remote_addr = stream.peer_addr().unwrap_or_else(|| self.address.clone());
        Ok(Connection::new(stream, remote_addr))
    }

    /// Takes a connection back from its holder.
    ///
    /// The connection goes to the head of the idle list unless `force` is set
    /// or the pool is closed, in which case it is closed. If the idle list
    /// grows beyond `max_idle` its tail, the oldest connection, is closed.
    pub(crate) fn put(&self, mut conn: Connection, force: bool) {
        let evicted = {
            let mut state = self.state.lock();
            if !state.closed && !force {
                conn.returned = tokio::time::Instant::now();
                state.idle.push_front(conn);

                if state.idle.len() > self.config.max_idle {
                    state.active = state.active.saturating_sub(1);
                    state.idle.pop_back()
                } else {
                    None
                }
            } else {
                state.active = state.active.saturating_sub(1);
                Some(conn)
            }
        };

        // sockets are closed outside the lock
        drop(evicted);
    }

    /// Shuts the pool down.
    ///
    /// Idle connections are closed, waiters on the admission semaphore fail
    /// with [`HormError::PoolClosed`], and checked-out connections are closed
    /// when released.
    pub fn close(&self) {
        let idle: Vec<Connection> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            state.active = state.active.saturating_sub(idle.len());
            idle
        };

        if let Some(slots) = &self.slots {
            slots.close();
        }

        debug!(
            network = %self.network,
            address = %self.address,
            closed_idle = idle.len(),
            "Connection pool closed"
        );
    }

    /// Runs the full health check over the idle list, closing failures.
    ///
    /// The idle list is taken out of the pool for the sweep, so checks run
    /// without the pool lock held and may call back into the pool.
    pub fn check_health_once(&self) {
        let swept = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            std::mem::take(&mut state.idle)
        };

        let mut kept = VecDeque::with_capacity(swept.len());
        let mut evicted = Vec::new();
        for conn in swept {
            if self.check(&conn, false) {
                kept.push_back(conn);
            } else {
                evicted.push(conn);
            }
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                evicted.extend(kept.drain(..));
            } else {
                // connections returned during the sweep are newer
                state.idle.extend(kept.drain(..));
                while state.idle.len() > self.config.max_idle {
                    if let Some(conn) = state.idle.pop_back() {
                        evicted.push(conn);
                    }
                }
            }
            state.active = state.active.saturating_sub(evicted.len());
        }

        if !evicted.is_empty() {
            debug!(
                network = %self.network,
                address = %self.address,
                evicted = evicted.len(),
                "Evicted idle connections"
            );
        }
    }

    /// Pre-dials the shortfall between the idle list and `min_idle`.
    pub async fn check_min_idle(&self) {
        let shortfall = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            self.config.min_idle.saturating_sub(state.idle.len())
        };
        if shortfall == 0 {
            return;
        }

        let ctx = Context::background();
        let dials = (0..shortfall).map(|_| self.dial_new(&ctx));
        for res in join_all(dials).await {
            match res {
                Ok(conn) => self.put(conn, false),
                Err(e) => warn!(
                    network = %self.network,
                    address = %self.address,
                    error = %e,
                    "Failed to pre-dial idle connection"
                ),
            }
        }
    }

    fn check(&self, conn: &Connection, fast: bool) -> bool {
        match &self.config.checker {
            Some(checker) => checker(conn, fast),
            None => self.default_check(conn, fast),
        }
    }

    /// Built-in health check.
    ///
    /// Both an EOF and unexpected pending bytes make a connection unhealthy.
    /// The fast variant stops there; the full variant also enforces
    /// `idle_timeout` and `max_conn_lifetime`.
    pub fn default_check(&self, conn: &Connection, fast: bool) -> bool {
        match conn.probe() {
            Probe::Healthy => {}
            Probe::Eof => {
                self.metrics.incr(Counter::RemoteEof);
                self.metrics.incr(Counter::RemoteErr);
                return false;
            }
            Probe::UnexpectedData | Probe::Failed => {
                self.metrics.incr(Counter::RemoteErr);
                return false;
            }
        }

        if fast {
            return true;
        }

        if !self.config.idle_timeout.is_zero() && conn.returned_at().elapsed() > self.config.idle_timeout
        {
            self.metrics.incr(Counter::IdleTimeout);
            return false;
        }

        if !self.config.max_conn_lifetime.is_zero()
            && conn.created_at().elapsed() > self.config.max_conn_lifetime
        {
            self.metrics.incr(Counter::LifetimeExceed);
            return false;
        }

        true
    }

    fn discard_idle(&self, conn: Connection) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        drop(conn);
    }
}

fn spawn_maintenance(pool: &Arc<ConnectionPool>) {
    let period = pool.config.check_interval;
    if period.is_zero() {
        return;
    }

    let weak: Weak<ConnectionPool> = Arc::downgrade(pool);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(pool) = weak.upgrade() else { break };
            if pool.is_closed() {
                break;
            }
            pool.check_health_once();
            pool.check_min_idle().await;
        }
    });
}

async fn connect(network: &str, address: &str) -> Result<Stream> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {
            let addrs = lookup_host(address)
                .await
                .map_err(|e| HormError::Dial(format!("resolve {} {}: {}", network, address, e)))?;

            // Try each resolved address of the requested family until one succeeds
            let mut last_err = None;
            for addr in addrs.filter(|a| match network {
                "tcp4" => a.is_ipv4(),
                "tcp6" => a.is_ipv6(),
                _ => true,
            }) {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        return Ok(Stream::Tcp(stream));
                    }
                    Err(e) => last_err = Some(e),
                }
            }

            Err(HormError::Dial(format!(
                "dial {} {}: {}",
                network,
                address,
                last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no address of the requested family".to_string())
            )))
        }
        #[cfg(unix)]
        "unix" => UnixStream::connect(address)
            .await
            .map(Stream::Unix)
            .map_err(|e| HormError::Dial(format!("dial unix {}: {}", address, e))),
        other => Err(HormError::Dial(format!("unsupported network {:?}", other))),
    }
}
