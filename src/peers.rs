//! Capabilities a group uses to reach the other members of the cluster.

use crate::error::Result;
use crate::protocol::{GetRequest, GetResponse};
use std::sync::Arc;

/// Client half of the peer protocol, bound to one remote peer.
#[async_trait::async_trait]
pub trait ProtoGetter: Send + Sync {
    /// Fetch a single key from the peer.
    async fn get(&self, request: &GetRequest) -> Result<GetResponse>;

    /// Fetch every key of a batch; the response preserves request order.
    async fn batch_get(&self, request: &GetRequest) -> Result<Vec<GetResponse>>;

    /// Drop the key from the peer's caches.
    async fn remove(&self, request: &GetRequest) -> Result<()>;

    /// Identifies the peer in logs.
    fn url(&self) -> &str;
}

/// Resolves which peer owns a key.
pub trait PeerPicker: Send + Sync {
    /// The remote owner of `key`, or `None` when this process owns it (or no
    /// peers are configured).
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn ProtoGetter>>;

    /// Every remote peer, excluding this process.
    fn all_peers(&self) -> Vec<Arc<dyn ProtoGetter>>;
}

/// Picker for a process running alone: every key is owned locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn ProtoGetter>> {
        None
    }

    fn all_peers(&self) -> Vec<Arc<dyn ProtoGetter>> {
        Vec::new()
    }
}
