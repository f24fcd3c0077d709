use crate::batch::BatchGetter;
use crate::cache::memory::LruMemoryCache;
use crate::cache::{ByteView, CacheKind, CacheStats};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result};
use crate::flight::Flight;
use crate::peers::{NoPeers, PeerPicker, ProtoGetter};
use crate::protocol::GetRequest;
use crate::sink::{BytesSink, Sink};
use crate::stats::{incr, GroupStats, GroupStatsSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Loads the value for a key when no cache tier or peer has it.
#[async_trait::async_trait]
pub trait Getter: Send + Sync + 'static {
    /// Populate `dest` with the value for `key`.
    async fn get(&self, key: &str, dest: &mut dyn Sink) -> anyhow::Result<()>;
}

/// Adapts an async closure returning a [`ByteView`] into a [`Getter`].
pub struct GetterFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Getter for GetterFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ByteView>> + Send,
{
    async fn get(&self, key: &str, dest: &mut dyn Sink) -> anyhow::Result<()> {
        let view = (self.0)(key.to_string()).await?;
        dest.set_view(view)?;
        Ok(())
    }
}

pub(crate) enum Loader {
    Single(Arc<dyn Getter>),
    Batch(Arc<dyn BatchGetter>),
}

/// A named cache namespace: a loader, two cache tiers and peer routing.
pub struct Group {
    pub(crate) name: String,
    pub(crate) loader: Loader,
    pub(crate) peers: Arc<dyn PeerPicker>,
    pub(crate) config: GroupConfig,
    /// Entries this process owns
    pub(crate) main_cache: LruMemoryCache,
    /// Mirrors of entries owned by other peers
    pub(crate) hot_cache: LruMemoryCache,
    pub(crate) load_flight: Flight<ByteView>,
    pub(crate) batch_flight: Flight<Vec<ByteView>>,
    remove_flight: Flight<()>,
    pub(crate) stats: GroupStats,
}

impl Group {
    pub(crate) fn new(
        name: &str,
        config: GroupConfig,
        peers: Arc<dyn PeerPicker>,
        loader: Loader,
    ) -> Self {
        let (main_bytes, hot_bytes) = config.tier_budgets();

        Self {
            name: name.to_string(),
            loader,
            peers,
            config,
            main_cache: LruMemoryCache::new(main_bytes),
            hot_cache: LruMemoryCache::new(hot_bytes),
            load_flight: Flight::new(),
            batch_flight: Flight::new(),
            remove_flight: Flight::new(),
            stats: GroupStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Get the value for `key` into `dest`, from cache, the owning peer or the
    /// local loader.
    pub async fn get(&self, key: &str, dest: &mut dyn Sink) -> Result<()> {
        incr(&self.stats.gets);
        if key.is_empty() {
            return Err(GroupError::EmptyKey);
        }
        if dest.view().is_ok() {
            return Err(GroupError::SinkAlreadySet);
        }

        if let Some(view) = self.lookup_cache(key) {
            incr(&self.stats.cache_hits);
            tracing::debug!(group = %self.name, key = %key, "cache hit");
            return dest.set_view(view);
        }

        let view = self.load(key).await?;
        dest.set_view(view)
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        incr(&self.stats.loads);

        self.load_flight
            .execute(key, || async {
                // Another caller may have populated the cache while we queued.
                if let Some(view) = self.lookup_cache(key) {
                    incr(&self.stats.cache_hits);
                    return Ok(view);
                }
                incr(&self.stats.loads_deduped);

                if let Some(peer) = self.peers.pick_peer(key) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(view) => {
                            incr(&self.stats.peer_loads);
                            if self.config.hot_promotion.should_promote() {
                                self.populate_cache(key, view.clone(), CacheKind::Hot);
                            }
                            return Ok(view);
                        }
                        Err(err) => {
                            incr(&self.stats.peer_errors);
                            tracing::warn!(
                                group = %self.name,
                                key = %key,
                                peer = %peer.url(),
                                error = %err,
                                "peer load failed, loading locally"
                            );
                        }
                    }
                }

                let view = match self.get_locally(key).await {
                    Ok(view) => view,
                    Err(err) => {
                        incr(&self.stats.local_load_errs);
                        return Err(err);
                    }
                };
                incr(&self.stats.local_loads);
                self.populate_cache(key, view.clone(), CacheKind::Main);
                Ok(view)
            })
            .await
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        match &self.loader {
            Loader::Single(getter) => {
                let mut dest = BytesSink::new();
                getter
                    .get(key, &mut dest)
                    .await
                    .map_err(GroupError::loader)?;
                dest.take_view().ok_or(GroupError::SinkNotSet)
            }
            Loader::Batch(getter) => {
                let keys = vec![key.to_string()];
                let mut views = self.load_batch_locally(getter.as_ref(), &keys).await?;
                views.pop().ok_or(GroupError::SinkNotSet)
            }
        }
    }

    async fn get_from_peer(&self, peer: &dyn ProtoGetter, key: &str) -> Result<ByteView> {
        let request = GetRequest::single(&self.name, key);
        let response = peer.get(&request).await?;
        Ok(response.into_view())
    }

    pub(crate) fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        self.hot_cache
            .get(key)
            .or_else(|| self.main_cache.get(key))
    }

    pub(crate) fn populate_cache(&self, key: &str, value: ByteView, kind: CacheKind) {
        match kind {
            CacheKind::Main => self.main_cache.add(key, value),
            CacheKind::Hot => self.hot_cache.add(key, value),
        }
    }

    /// Remove `key` from this group across the cluster.
    ///
    /// A remote owner is told first and its failure is returned. The key is
    /// then dropped locally and every other peer is asked, without waiting, to
    /// drop its hot copy.
    pub async fn remove(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(GroupError::EmptyKey);
        }
        incr(&self.stats.remove_keys_requested);

        self.remove_flight
            .execute(key, || async {
                let owner = self.peers.pick_peer(key);
                if let Some(owner) = &owner {
                    owner.remove(&GetRequest::single(&self.name, key)).await?;
                }

                self.local_remove(key);

                for peer in self.peers.all_peers() {
                    if owner.as_ref().is_some_and(|owner| owner.url() == peer.url()) {
                        continue;
                    }
                    let request = GetRequest::single(&self.name, key);
                    tokio::spawn(async move {
                        if let Err(err) = peer.remove(&request).await {
                            tracing::warn!(
                                group = %request.group,
                                key = %request.key,
                                peer = %peer.url(),
                                error = %err,
                                "failed to remove key from peer"
                            );
                        }
                    });
                }
                Ok::<(), GroupError>(())
            })
            .await
    }

    /// Drop `key` from both cache tiers of this process only.
    pub fn local_remove(&self, key: &str) {
        self.main_cache.remove(key);
        self.hot_cache.remove(key);
        tracing::debug!(group = %self.name, key = %key, "removed key locally");
    }

    pub fn cache_stats(&self, kind: CacheKind) -> CacheStats {
        match kind {
            CacheKind::Main => self.main_cache.stats(),
            CacheKind::Hot => self.hot_cache.stats(),
        }
    }

    pub fn stats(&self) -> GroupStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn record_server_request(&self) {
        incr(&self.stats.server_requests);
    }
}

/// Owns the set of named groups of a process.
///
/// Names are unique per registry; groups created without their own peer picker
/// use the registry's.
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    peers: Arc<dyn PeerPicker>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    /// Registry whose groups own every key locally.
    pub fn new() -> Self {
        Self::with_peers(Arc::new(NoPeers))
    }

    pub fn with_peers(peers: Arc<dyn PeerPicker>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            peers,
        }
    }

    /// Create and register a group loading keys one at a time.
    pub fn new_group(
        &self,
        name: &str,
        config: GroupConfig,
        peers: Option<Arc<dyn PeerPicker>>,
        getter: Arc<dyn Getter>,
    ) -> Result<Arc<Group>> {
        self.register(name, config, peers, Loader::Single(getter))
    }

    /// Create and register a group loading keys in batches.
    pub fn new_batch_group(
        &self,
        name: &str,
        config: GroupConfig,
        peers: Option<Arc<dyn PeerPicker>>,
        getter: Arc<dyn BatchGetter>,
    ) -> Result<Arc<Group>> {
        self.register(name, config, peers, Loader::Batch(getter))
    }

    fn register(
        &self,
        name: &str,
        config: GroupConfig,
        peers: Option<Arc<dyn PeerPicker>>,
        loader: Loader,
    ) -> Result<Arc<Group>> {
        let mut groups = self.groups.write();
        if groups.contains_key(name) {
            return Err(GroupError::DuplicateGroup(name.to_string()));
        }

        let peers = peers.unwrap_or_else(|| self.peers.clone());
        let group = Arc::new(Group::new(name, config, peers, loader));
        groups.insert(name.to_string(), group.clone());

        tracing::info!(group = %name, cache_bytes = group.config.cache_bytes, "registered group");
        Ok(group)
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Unregister a group; the name becomes available again.
    pub fn remove_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.write().remove(name)
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }
}
