use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::QueryMode;

/// Point of the call at which a transport failure happened.
///
/// Failures at [`Stage::Select`] or [`Stage::Dial`] mean nothing reached the
/// peer. Failures at [`Stage::Write`] or [`Stage::Read`] mean the request may
/// have been (partially) delivered and its outcome is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Select,
    Dial,
    Write,
    Read,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Select => "select",
            Stage::Dial => "dial",
            Stage::Write => "write",
            Stage::Read => "read",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`HormError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Routing,
    PoolLimit,
    PoolClosed,
    ConnectionClosed,
    DialFailure,
    Timeout,
    Canceled,
    Network,
    EncodeFailure,
    DecodeFailure,
    ProtocolMismatch,
    Server,
}

#[derive(Error, Debug)]
pub enum HormError {
    #[error("route error: {0}")]
    Route(String),

    #[error("connection pool limit")]
    PoolLimit,

    #[error("connection pool closed")]
    PoolClosed,

    #[error("connection closed")]
    ConnClosed,

    #[error("dial error: {0}")]
    Dial(String),

    #[error("{stage} timeout: {msg}")]
    Timeout { stage: Stage, msg: String },

    #[error("{stage} canceled: {msg}")]
    Canceled { stage: Stage, msg: String },

    #[error("network error on {stage}: {msg}")]
    Network { stage: Stage, msg: String },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("response request_id {response} different from request request_id {request}")]
    RequestIdMismatch { request: u64, response: u64 },

    #[error("response query mode {response} different from request query mode {request}")]
    QueryModeMismatch {
        request: QueryMode,
        response: QueryMode,
    },

    #[error("server error {code}: {msg}")]
    Server { code: i32, msg: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HormError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HormError::Route(_) => ErrorKind::Routing,
            HormError::PoolLimit => ErrorKind::PoolLimit,
            HormError::PoolClosed => ErrorKind::PoolClosed,
            HormError::ConnClosed => ErrorKind::ConnectionClosed,
            HormError::Dial(_) => ErrorKind::DialFailure,
            HormError::Timeout { .. } => ErrorKind::Timeout,
            HormError::Canceled { .. } => ErrorKind::Canceled,
            HormError::Network { .. } | HormError::Io(_) => ErrorKind::Network,
            HormError::Encode(_) => ErrorKind::EncodeFailure,
            HormError::Decode(_) | HormError::Serialization(_) => ErrorKind::DecodeFailure,
            HormError::RequestIdMismatch { .. } | HormError::QueryModeMismatch { .. } => {
                ErrorKind::ProtocolMismatch
            }
            HormError::Server { .. } => ErrorKind::Server,
        }
    }

    /// Whether the request may have reached the peer.
    ///
    /// Once a frame write has started the caller can no longer assume the
    /// request was not executed.
    pub fn is_request_sent(&self) -> bool {
        match self {
            HormError::Timeout { stage, .. }
            | HormError::Canceled { stage, .. }
            | HormError::Network { stage, .. } => matches!(stage, Stage::Write | Stage::Read),
            HormError::Io(_)
            | HormError::Decode(_)
            | HormError::Serialization(_)
            | HormError::RequestIdMismatch { .. }
            | HormError::QueryModeMismatch { .. }
            | HormError::Server { .. } => true,
            _ => false,
        }
    }

    /// Transport failures that happened before anything was written.
    pub fn is_safe_to_retry(&self) -> bool {
        match self.kind() {
            ErrorKind::PoolLimit
            | ErrorKind::PoolClosed
            | ErrorKind::DialFailure
            | ErrorKind::Timeout
            | ErrorKind::Canceled
            | ErrorKind::Network => !self.is_request_sent(),
            _ => false,
        }
    }

    /// Appends the elapsed call cost to connection, timeout and network errors.
    pub fn with_cost(self, cost: Duration) -> Self {
        match self {
            HormError::Dial(msg) => HormError::Dial(format!("{}, cost:{:?}", msg, cost)),
            HormError::Timeout { stage, msg } => HormError::Timeout {
                stage,
                msg: format!("{}, cost:{:?}", msg, cost),
            },
            HormError::Network { stage, msg } => HormError::Network {
                stage,
                msg: format!("{}, cost:{:?}", msg, cost),
            },
            other => other,
        }
    }

    /// Classifies a socket error raised at `stage`.
    pub fn from_io(err: std::io::Error, stage: Stage, context: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => HormError::Timeout {
                stage,
                msg: format!("{}: {}", context, err),
            },
            _ => HormError::Network {
                stage,
                msg: format!("{}: {}", context, err),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, HormError>;
