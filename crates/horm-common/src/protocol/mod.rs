pub mod error;
pub mod requests;
pub mod responses;


pub use error::{ErrorKind, HormError, Result, Stage};
pub use requests::{
    effective_timeout, generate_request_id, timeout_millis, CallerOptions, QueryMode,
    RequestHeader, RequestId, DEFAULT_TIMEOUT_MS, PROTOCOL_VERSION, QUERY_CALLEE,
};
pub use responses::{ErrorInfo, ResponseHeader};
