use horm_common::transport::{ClientCodec, Encryption, FrameCodec, FrameParam};
use horm_common::{
    effective_timeout, timeout_millis, HormError, RequestHeader, ResponseHeader, Result, Stage,
};
use horm_metrics::{Counter, MetricsSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::Context;
use crate::pool::Pool;
use crate::selector::{self, CallResult, Location, Node, NodeCell, SelectOptions, Selector, SelectorRegistry};
use crate::transport::Transport;

/// Scheme of the selector used when a call carries no target.
const DEFAULT_SCHEME: &str = "ip";

/// Client configuration.
///
/// The defaults share the process-wide selector registry, pool and metrics
/// registry; each can be replaced to isolate a client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Network used when the selected node does not name one.
    pub network: String,
    /// Endpoint handed to the default selector when a call has no target.
    pub endpoint: String,
    pub selectors: Arc<SelectorRegistry>,
    pub pool: Arc<Pool>,
    pub metrics: Arc<dyn MetricsSink>,
    /// `None` makes every call fail with an encode error.
    pub codec: Option<Arc<dyn FrameCodec>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            endpoint: String::new(),
            selectors: selector::global(),
            pool: Pool::global(),
            metrics: horm_metrics::global(),
            codec: Some(Arc::new(ClientCodec)),
        }
    }
}

/// Per-call parameters.
#[derive(Debug, Clone, Default)]
pub struct ReqParam {
    pub workspace_id: u32,
    pub encryption: Encryption,
    /// Workspace access token.
    pub token: String,
    /// `scheme://endpoint`; empty uses the default selector and the
    /// configured endpoint.
    pub target: String,
    /// Caller location passed to the selector.
    pub location: Location,
}

impl ReqParam {
    fn frame_param(&self) -> FrameParam {
        FrameParam {
            workspace_id: self.workspace_id,
            encryption: self.encryption,
            token: self.token.clone(),
        }
    }
}

/// Invocation pipeline of the access client.
///
/// A call selects a node, checks out a pooled connection to it, exchanges
/// one frame pair and validates the response against the request. There are
/// no retries at this layer; [`HormError::is_safe_to_retry`] tells the caller
/// whether the request may have reached the server.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Transport,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let transport = Transport::new(Arc::clone(&config.pool));
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `body` with `head` and returns the response header and body.
    pub async fn invoke(
        &self,
        ctx: &Context,
        head: &RequestHeader,
        body: &[u8],
        param: &ReqParam,
    ) -> Result<(ResponseHeader, Vec<u8>)> {
        self.invoke_inner(ctx, head, body, param, None).await
    }

    /// Like [`invoke`](Self::invoke), additionally recording the node used,
    /// the address it resolved to and the call cost into `node_cell`.
    pub async fn invoke_with_node(
        &self,
        ctx: &Context,
        head: &RequestHeader,
        body: &[u8],
        param: &ReqParam,
        node_cell: &NodeCell,
    ) -> Result<(ResponseHeader, Vec<u8>)> {
        self.invoke_inner(ctx, head, body, param, Some(node_cell)).await
    }

    async fn invoke_inner(
        &self,
        ctx: &Context,
        head: &RequestHeader,
        body: &[u8],
        param: &ReqParam,
        node_cell: Option<&NodeCell>,
    ) -> Result<(ResponseHeader, Vec<u8>)> {
        let start = Instant::now();

        // the header never promises more time than the caller has
        let mut head = head.clone();
        let remaining = ctx.remaining();
        let timeout = effective_timeout(head.timeout().unwrap_or(Duration::ZERO), remaining);
        head.timeout = timeout_millis(timeout, remaining.is_some());

        let (selector, endpoint) = self.resolve(param)?;

        let ctx = if timeout.is_zero() {
            ctx.clone()
        } else {
            ctx.with_timeout(timeout)
        };

        let node = self.select(&ctx, selector.as_ref(), &endpoint, param).await?;
        let network = if node.network.is_empty() {
            self.config.network.as_str()
        } else {
            node.network.as_str()
        };

        let mut remote_addr = node.address.clone();
        let result = self
            .call_node(&ctx, network, &node.address, &head, body, param, &mut remote_addr)
            .await;

        let cost = start.elapsed();
        let result = result.map_err(|e| e.with_cost(cost));

        if let Err(e) = &result {
            debug!(
                request_id = head.request_id,
                address = %node.address,
                error = %e,
                "Call failed"
            );
        }

        if let Err(report_err) = selector.report(&node, cost, result.as_ref().err()).await {
            warn!(address = %node.address, error = %report_err, "Selector report failed");
        }

        if let Some(cell) = node_cell {
            let mut node = node;
            node.cost = Some(cost);
            cell.set(CallResult {
                node,
                remote_addr,
                cost,
            });
        }

        result
    }

    /// Resolves the selector and endpoint of a call.
    fn resolve(&self, param: &ReqParam) -> Result<(Arc<dyn Selector>, String)> {
        if param.target.is_empty() {
            let selector = self.config.selectors.get(DEFAULT_SCHEME).ok_or_else(|| {
                HormError::Route(format!("default selector {:?} not registered", DEFAULT_SCHEME))
            })?;
            return Ok((selector, self.config.endpoint.clone()));
        }

        self.config.selectors.parse_target(&param.target)
    }

    async fn select(
        &self,
        ctx: &Context,
        selector: &dyn Selector,
        endpoint: &str,
        param: &ReqParam,
    ) -> Result<Node> {
        let opts = SelectOptions {
            ctx: ctx.clone(),
            location: param.location.clone(),
            ..Default::default()
        };

        let selected = match ctx.run(selector.select(endpoint, &opts)).await {
            Ok(selected) => selected,
            Err(e) => Err(e.at(Stage::Select)),
        };

        let node = match selected {
            Ok(node) => node,
            Err(e) => {
                self.config.metrics.incr(Counter::SelectNodeFail);
                return Err(e);
            }
        };

        if node.address.is_empty() {
            self.config.metrics.incr(Counter::SelectNodeFail);
            return Err(HormError::Route(format!(
                "selector returned a node with empty address for endpoint {:?}",
                endpoint
            )));
        }

        // selection may itself have used up the deadline
        if let Some(e) = ctx.err() {
            return Err(e.at(Stage::Select));
        }

        Ok(node)
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_node(
        &self,
        ctx: &Context,
        network: &str,
        address: &str,
        head: &RequestHeader,
        body: &[u8],
        param: &ReqParam,
        remote_addr: &mut String,
    ) -> Result<(ResponseHeader, Vec<u8>)> {
        let Some(codec) = &self.config.codec else {
            self.config.metrics.incr(Counter::CodecEmpty);
            return Err(HormError::Encode("codec empty".to_string()));
        };

        let request = codec.encode(&param.frame_param(), head, body)?;
        let round_trip = self
            .transport
            .round_trip(ctx, network, address, &request)
            .await?;
        *remote_addr = round_trip.remote_addr;

        let (rsp, rsp_body) = codec.decode(&round_trip.response)?;

        if let Some(err) = rsp.error() {
            return Err(HormError::Server {
                code: err.code,
                msg: err.msg.clone(),
            });
        }

        if rsp.request_id != head.request_id {
            return Err(HormError::RequestIdMismatch {
                request: head.request_id,
                response: rsp.request_id,
            });
        }

        if rsp.query_mode != head.query_mode {
            return Err(HormError::QueryModeMismatch {
                request: head.query_mode,
                response: rsp.query_mode,
            });
        }

        Ok((rsp, rsp_body))
    }
}
