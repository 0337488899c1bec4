use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::keys;
use crate::store::KeyValueStore;

/// A live node as seen in the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct NodeEntry {
    pub zone: String,
    pub name: String,
}

/// Node liveness registry. A node is alive for as long as its
/// `nodes:{zone}:{name}` key has not expired.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records `address` for the node and resets its TTL to the full window.
    pub async fn heartbeat(&self, name: &str, zone: &str, address: &str) -> Result<()> {
        let key = keys::node_key(zone, name);
        self.store
            .set_with_ttl(&key, address.as_bytes(), self.ttl)
            .await?;
        tracing::trace!(node = name, zone, address, "Heartbeat recorded");
        Ok(())
    }

    /// Live node names in `zone`, sorted. Empty when the zone has no nodes.
    pub async fn list_nodes(&self, zone: &str) -> Result<Vec<String>> {
        let prefix = keys::zone_prefix(zone);
        let mut nodes: Vec<String> = self
            .store
            .keys_with_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                let name = key.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains(':')).then(|| name.to_string())
            })
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    /// Live nodes across every zone, sorted by zone then name.
    pub async fn list_all_nodes(&self) -> Result<Vec<NodeEntry>> {
        let mut nodes: Vec<NodeEntry> = self
            .store
            .keys_with_prefix(&keys::all_nodes_prefix())
            .await?
            .iter()
            .filter_map(|key| keys::parse_node_key(key))
            .map(|(zone, name)| NodeEntry {
                zone: zone.to_string(),
                name: name.to_string(),
            })
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    /// Registered address of a live node.
    pub async fn node_address(&self, zone: &str, name: &str) -> Result<Option<String>> {
        self.store.get_string(&keys::node_key(zone, name)).await
    }
}
