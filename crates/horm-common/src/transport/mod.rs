//! Frame transport
//!
//! This module provides the wire format shared by the client and the access
//! service.
//!
//! # Wire Format
//!
//! Every message is one self-delimiting frame:
//!
//! ```text
//! [10-byte head] [header segment] [body]
//! ```
//!
//! The head carries the total frame length and the header segment length
//! (see [`FrameHead`]). The header segment is a postcard-encoded
//! [`RequestHeader`](crate::RequestHeader) or
//! [`ResponseHeader`](crate::ResponseHeader); the body is opaque.
//!
//! # Components
//!
//! - **[`FrameHead`]**: fixed head construction and validation
//! - **[`Framer`]**: reads whole frames from an async stream
//! - **[`FrameCodec`]** / **[`ClientCodec`]**: header + body to frame and back
//! - **[`sign_frame`]** / **[`encrypt_frame`]** / **[`unwrap_frame`]**: outer workspace wrappers
//!
//! # Frame Size Limits
//!
//! Frames larger than [`MAX_FRAME_SIZE`] (10 MB) are rejected on both read
//! and write.

pub mod codec;
pub mod frame;
pub mod framer;
pub mod wrap;

pub use codec::{decode_request, encode_response, ClientCodec, Encryption, FrameCodec, FrameParam};
pub use frame::{FrameHead, FrameType, FRAME_HEAD_LEN, FRAME_MAGIC, FRAME_VERSION, MAX_FRAME_SIZE};
pub use framer::Framer;
pub use wrap::{encrypt_frame, sign_frame, unwrap_frame, UnwrappedFrame};
