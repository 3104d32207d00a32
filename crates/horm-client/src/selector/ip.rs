use async_trait::async_trait;
use horm_common::{HormError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::{Node, SelectOptions, Selector};

/// Static list selector.
///
/// The endpoint is one address or several comma-separated addresses; each
/// call picks one uniformly at random. Registered under "ip" and "dns".
#[derive(Debug)]
pub struct IpSelector {
    network: String,
    rng: Mutex<StdRng>,
}

impl Default for IpSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl IpSelector {
    /// Nodes carry no network, so the client's configured one applies.
    pub fn new() -> Self {
        Self::with_network("")
    }

    /// Stamps every node with `network`.
    pub fn with_network(network: impl Into<String>) -> Self {
        IpSelector {
            network: network.into(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

#[async_trait]
impl Selector for IpSelector {
    async fn select(&self, endpoint: &str, _opts: &SelectOptions) -> Result<Node> {
        if endpoint.is_empty() {
            return Err(HormError::Route("ip selector: service name is empty".to_string()));
        }

        let addrs: Vec<&str> = endpoint
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();
        if addrs.is_empty() {
            return Err(HormError::Route(format!(
                "ip selector: no address in endpoint {:?}",
                endpoint
            )));
        }

        let idx = self.rng.lock().random_range(0..addrs.len());
        Ok(Node {
            service_name: endpoint.to_string(),
            network: self.network.clone(),
            address: addrs[idx].to_string(),
            cost: None,
        })
    }

    async fn report(&self, _node: &Node, _cost: Duration, _err: Option<&HormError>) -> Result<()> {
        Ok(())
    }
}
