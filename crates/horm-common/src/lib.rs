//! horm common types and wire format
//!
//! This crate provides the protocol metadata and frame transport shared by
//! the horm access client and the in-process peers used in its tests.
//!
//! # Overview
//!
//! - **Protocol Layer**: request/response headers, query modes, header
//!   signing, request ID generation and the [`HormError`] taxonomy
//! - **Transport Layer**: the fixed frame head, the async [`Framer`]
//!   and the [`FrameCodec`] with optional workspace signing/encryption
//!
//! # Wire Format
//!
//! - **Frame**: `[10-byte head] [header segment] [opaque body]`
//! - **Header segment**: postcard-encoded [`RequestHeader`] / [`ResponseHeader`]
//! - **Max Frame Size**: 10 MB
//!
//! # Example
//!
//! ```
//! use horm_common::{CallerOptions, QueryMode, RequestHeader};
//! use std::time::Duration;
//!
//! let opts = CallerOptions { timeout_ms: 1000, ..Default::default() };
//!
//! // The caller has 50ms left, so the header timeout is 50ms too.
//! let head = RequestHeader::build(QueryMode::Single, &opts, Some(Duration::from_millis(50)));
//! assert_eq!(head.timeout, 50);
//! ```
//!
//! [`Framer`]: transport::Framer
//! [`FrameCodec`]: transport::FrameCodec

pub mod protocol;
pub mod transport;

pub use protocol::*;
