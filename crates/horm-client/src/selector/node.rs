use std::sync::OnceLock;
use std::time::Duration;

/// A concrete endpoint chosen by a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub service_name: String,
    /// "tcp", "tcp4", "tcp6" or "unix"; empty uses the client's network.
    pub network: String,
    pub address: String,
    /// Cost of the call, set on the copy recorded in a [`NodeCell`].
    pub cost: Option<Duration>,
}

impl Node {
    pub fn new(network: impl Into<String>, address: impl Into<String>) -> Self {
        Node {
            network: network.into(),
            address: address.into(),
            ..Default::default()
        }
    }
}

/// What a finished call learned about the node it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub node: Node,
    /// Address the connection was actually made to.
    pub remote_addr: String,
    pub cost: Duration,
}

/// Write-once slot receiving the [`CallResult`] of a call.
///
/// The pipeline fills it after the call completes. Later writes are ignored,
/// so a cell shared between a selector's bookkeeping and the caller is
/// written at most once.
#[derive(Debug, Default)]
pub struct NodeCell {
    inner: OnceLock<CallResult>,
}

impl NodeCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `result`, returning `false` if the cell was already written.
    pub fn set(&self, result: CallResult) -> bool {
        self.inner.set(result).is_ok()
    }

    pub fn get(&self) -> Option<&CallResult> {
        self.inner.get()
    }
}
