//! Response metadata.
//!
//! The server answers every request frame with a [`ResponseHeader`] followed
//! by an opaque body. The header echoes the request ID and query mode so the
//! client can detect cross-talk, and carries both the call-level error and
//! per-unit outcomes for parallel and compound queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{QueryMode, RequestId};

/// Error reported by the access service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type (system, database, ...), interpreted by the query layer.
    pub etype: i32,
    /// Error code, 0 means success.
    pub code: i32,
    pub msg: String,
    /// Statement that failed, when the backend reports one.
    pub sql: String,
}

impl ErrorInfo {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        ErrorInfo {
            etype: 0,
            code,
            msg: msg.into(),
            sql: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Metadata returned in front of every response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub version: u32,
    pub query_mode: QueryMode,
    pub request_id: RequestId,
    pub trace_id: String,
    pub timestamp: u64,
    pub compress: bool,
    /// Call-level error.
    pub err: Option<ErrorInfo>,
    /// Errors of individual query units, keyed by unit key.
    pub rsp_errs: BTreeMap<String, ErrorInfo>,
    /// Units whose result is nil, keyed by unit key.
    pub rsp_nils: BTreeMap<String, bool>,
}

impl ResponseHeader {
    /// Creates a successful header answering `request_id`.
    pub fn reply_to(request_id: RequestId, query_mode: QueryMode) -> Self {
        ResponseHeader {
            version: super::PROTOCOL_VERSION,
            query_mode,
            request_id,
            timestamp: super::requests::now_millis(),
            ..Default::default()
        }
    }

    /// Returns the call-level error when it carries a failure code.
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.err.as_ref().filter(|e| !e.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }

    /// Error of the unit `key`, `None` when the unit succeeded.
    pub fn unit_error(&self, key: &str) -> Option<&ErrorInfo> {
        self.rsp_errs.get(key).filter(|e| !e.is_success())
    }

    pub fn is_unit_nil(&self, key: &str) -> bool {
        self.rsp_nils.get(key).copied().unwrap_or(false)
    }
}
