use horm_common::{Result, Stage};
use std::sync::Arc;

use crate::context::Context;
use crate::pool::Pool;

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTrip {
    /// The complete response frame.
    pub response: Vec<u8>,
    /// Address the request was actually sent to.
    pub remote_addr: String,
}

/// Pooled TCP transport.
///
/// Each round trip checks out one connection, writes one request frame,
/// reads one response frame and hands the connection back. A connection is
/// never shared by two calls.
///
/// # Cancellation
///
/// The context deadline becomes the socket deadline, and every step is raced
/// against the context. A call interrupted after the write started discards
/// its connection, since the response may still arrive on it.
#[derive(Clone)]
pub struct Transport {
    pool: Arc<Pool>,
}

impl Transport {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Sends `request` to `address` and returns the response frame.
    pub async fn round_trip(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
        request: &[u8],
    ) -> Result<RoundTrip> {
        if let Some(e) = ctx.err() {
            return Err(e.at(Stage::Dial));
        }

        let mut conn = self.pool.get_conn(ctx, network, address).await?;
        conn.set_deadline(ctx.deadline());
        let remote_addr = conn.remote_addr().unwrap_or(address).to_string();

        // acquiring may have used up the deadline; nothing is sent yet
        if let Some(e) = ctx.err() {
            conn.close();
            return Err(e.at(Stage::Dial));
        }

        match ctx.run(conn.write_all(request)).await {
            Ok(res) => res?,
            Err(e) => {
                conn.discard();
                return Err(e.at(Stage::Write));
            }
        }

        let response = match ctx.run(conn.read_frame()).await {
            Ok(res) => res?,
            Err(e) => {
                conn.discard();
                return Err(e.at(Stage::Read));
            }
        };

        conn.close();
        Ok(RoundTrip {
            response,
            remote_addr,
        })
    }
}
