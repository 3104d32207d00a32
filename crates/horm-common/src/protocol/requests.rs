use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub type RequestId = u64;

/// Protocol version carried in every request header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Callee name of the access service query endpoint.
pub const QUERY_CALLEE: &str = "server.access.api/Query";

/// Default call timeout in milliseconds when the caller configures none.
pub const DEFAULT_TIMEOUT_MS: u32 = 60_000;

const AUTH_RAND_LIMIT: u32 = 99_999_999;

static LAST_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// How the server should interpret the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryMode {
    /// One query unit.
    #[default]
    Single,
    /// Several independent units executed concurrently.
    Parallel,
    /// Units with nested sub-queries.
    Compound,
}

impl QueryMode {
    pub fn as_u32(self) -> u32 {
        match self {
            QueryMode::Single => 0,
            QueryMode::Parallel => 1,
            QueryMode::Compound => 2,
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Caller identity and defaults used to build request headers.
#[derive(Debug, Clone)]
pub struct CallerOptions {
    /// Caller name, ideally `workspace.app.server.service`.
    pub name: String,
    pub appid: u64,
    pub secret: String,
    pub local_ip: String,
    /// Configured call timeout in milliseconds, 0 means none.
    pub timeout_ms: u32,
}

impl Default for CallerOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            appid: 0,
            secret: String::new(),
            local_ip: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Metadata sent in front of every request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub version: u32,
    pub request_type: u32,
    pub query_mode: QueryMode,
    pub request_id: RequestId,
    pub trace_id: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    /// Call timeout in milliseconds, 0 means none.
    pub timeout: u32,
    pub caller: String,
    pub callee: String,
    pub appid: u64,
    pub ip: String,
    /// Anti-replay nonce.
    pub auth_rand: u32,
    pub compress: bool,
    pub sign: String,
}

impl RequestHeader {
    /// Builds an unsigned header for a query issued now.
    ///
    /// `caller_remaining` is the time left before the caller's deadline, if it
    /// has one. The header timeout never exceeds it.
    pub fn build(
        mode: QueryMode,
        opts: &CallerOptions,
        caller_remaining: Option<Duration>,
    ) -> Self {
        let configured = Duration::from_millis(u64::from(opts.timeout_ms));
        let timeout = effective_timeout(configured, caller_remaining);

        RequestHeader {
            version: PROTOCOL_VERSION,
            request_type: 0,
            query_mode: mode,
            request_id: generate_request_id(),
            trace_id: String::new(),
            timestamp: now_millis(),
            timeout: timeout_millis(timeout, caller_remaining.is_some()),
            caller: opts.name.clone(),
            callee: QUERY_CALLEE.to_string(),
            appid: opts.appid,
            ip: opts.local_ip.clone(),
            auth_rand: rand::random_range(0..AUTH_RAND_LIMIT),
            compress: false,
            sign: String::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        if request_id != 0 {
            self.request_id = request_id;
        }
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Computes and stores the header signature for `secret`.
    pub fn sign(&mut self, secret: &str) {
        self.sign = self.signature(secret);
    }

    /// Checks the stored signature against `secret`.
    pub fn verify_sign(&self, secret: &str) -> bool {
        !self.sign.is_empty() && self.sign == self.signature(secret)
    }

    fn signature(&self, secret: &str) -> String {
        let plain = format!(
            "{}{}{}{}{}{}{}{}{}{}{}{}",
            self.appid,
            secret,
            self.request_type,
            self.query_mode.as_u32(),
            self.request_id,
            self.trace_id,
            self.timestamp,
            self.timeout,
            self.caller,
            u8::from(self.compress),
            self.auth_rand,
            self.version
        );
        hex::encode(Sha256::digest(plain.as_bytes()))
    }

    /// Call timeout carried by the header, `None` when unset.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(u64::from(self.timeout)))
    }
}

/// Picks the timeout for a call.
///
/// The caller's remaining time wins whenever it is shorter than the
/// configured timeout. A zero configured timeout means "no limit of our own",
/// so the caller's remaining time is used as is.
pub fn effective_timeout(configured: Duration, caller_remaining: Option<Duration>) -> Duration {
    match caller_remaining {
        Some(left) if configured.is_zero() || left < configured => left,
        _ => configured,
    }
}

/// Converts a call timeout into the millisecond header field.
///
/// Zero means "no timeout" on the wire, so a caller-bounded timeout shorter
/// than a millisecond is rounded up to 1.
pub fn timeout_millis(timeout: Duration, caller_bounded: bool) -> u32 {
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    if millis == 0 && caller_bounded { 1 } else { millis }
}

/// Returns a process-unique, strictly increasing request ID.
///
/// IDs start from the current millisecond timestamp shifted left by 16 bits so
/// they stay unique across restarts while leaving room for bursts.
pub fn generate_request_id() -> RequestId {
    let base = now_millis() << 16;

    loop {
        let last = LAST_REQUEST_ID.load(Ordering::Acquire);
        let next = base.max(last + 1);

        if LAST_REQUEST_ID
            .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Acquire)
            .is_ok()
        {
            return next;
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
