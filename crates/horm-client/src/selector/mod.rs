//! Node selection
//!
//! A [`Selector`] maps a logical endpoint to a concrete [`Node`] and receives
//! the outcome of every call made to that node, so feedback-driven strategies
//! can be plugged in without touching the invocation pipeline.
//!
//! Selectors are registered under a scheme name and looked up from targets of
//! the form `scheme://endpoint`:
//!
//! ```
//! use horm_client::selector::SelectorRegistry;
//!
//! let registry = SelectorRegistry::with_defaults();
//! let (_selector, endpoint) = registry.parse_target("ip://10.0.0.1:8080,10.0.0.2:8080").unwrap();
//! assert_eq!(endpoint, "10.0.0.1:8080,10.0.0.2:8080");
//!
//! assert!(registry.parse_target("polaris://svc").is_err());
//! ```

mod ip;
mod node;

pub use ip::IpSelector;
pub use node::{CallResult, Node, NodeCell};

use async_trait::async_trait;
use horm_common::{HormError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::context::Context;

/// Strategy choosing a node for a logical endpoint.
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, endpoint: &str, opts: &SelectOptions) -> Result<Node>;

    /// Receives the outcome of a call made to `node`.
    async fn report(&self, node: &Node, cost: Duration, err: Option<&HormError>) -> Result<()>;
}

/// Caller location, used by locality-aware selectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub region: String,
    pub zone: String,
    pub campus: String,
}

/// Inputs a selector may use besides the endpoint.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Context of the call being routed.
    pub ctx: Context,
    /// Key for consistent-hash strategies.
    pub hash_key: Option<String>,
    /// Virtual nodes per node for consistent-hash strategies.
    pub replicas: usize,
    pub source_service_name: String,
    pub source_env_name: String,
    pub dest_env_name: String,
    pub source_metadata: HashMap<String, String>,
    pub dest_metadata: HashMap<String, String>,
    pub load_balance_type: String,
    pub location: Location,
}

/// Scheme name to selector mapping.
#[derive(Default)]
pub struct SelectorRegistry {
    selectors: RwLock<HashMap<String, Arc<dyn Selector>>>,
}

impl SelectorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the static list selector under "ip" and "dns".
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let ip: Arc<dyn Selector> = Arc::new(IpSelector::new());
        registry.register("ip", Arc::clone(&ip));
        registry.register("dns", ip);
        registry
    }

    /// Registers `selector` under `scheme`, replacing any previous one.
    pub fn register(&self, scheme: impl Into<String>, selector: Arc<dyn Selector>) {
        self.selectors.write().insert(scheme.into(), selector);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Selector>> {
        self.selectors.read().get(scheme).cloned()
    }

    /// Resolves `scheme://endpoint` into the registered selector and the
    /// endpoint.
    pub fn parse_target(&self, target: &str) -> Result<(Arc<dyn Selector>, String)> {
        let (scheme, endpoint) = target.split_once("://").ok_or_else(|| {
            HormError::Route(format!("invalid target {:?}, expect scheme://endpoint", target))
        })?;

        if scheme.is_empty() || endpoint.is_empty() {
            return Err(HormError::Route(format!(
                "invalid target {:?}, scheme and endpoint must not be empty",
                target
            )));
        }

        let selector = self
            .get(scheme)
            .ok_or_else(|| HormError::Route(format!("selector {:?} not registered", scheme)))?;
        Ok((selector, endpoint.to_string()))
    }
}

static GLOBAL: LazyLock<Arc<SelectorRegistry>> =
    LazyLock::new(|| Arc::new(SelectorRegistry::with_defaults()));

/// Process-wide registry, pre-populated with the default selectors.
pub fn global() -> Arc<SelectorRegistry> {
    Arc::clone(&GLOBAL)
}

/// Registers `selector` in the process-wide registry.
pub fn register(scheme: impl Into<String>, selector: Arc<dyn Selector>) {
    GLOBAL.register(scheme, selector);
}

/// Looks `scheme` up in the process-wide registry.
pub fn get(scheme: &str) -> Option<Arc<dyn Selector>> {
    GLOBAL.get(scheme)
}
