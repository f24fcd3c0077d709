//! Multi-key requests.
//!
//! A batch is routed by its peer key rather than by its individual keys, so the
//! whole key list is always served by one peer. A batch either succeeds for
//! every key or fails as a unit; no destination is written on failure.

use crate::cache::{ByteView, CacheKind};
use crate::error::{GroupError, Result};
use crate::group::{Group, Loader};
use crate::peers::ProtoGetter;
use crate::protocol::GetRequest;
use crate::sink::{BytesSink, Sink};
use crate::stats::{add, incr};
use std::future::Future;

/// Loads the values for a whole key list at once.
#[async_trait::async_trait]
pub trait BatchGetter: Send + Sync + 'static {
    /// Populate `dests[i]` with the value for `keys[i]`, for every `i`.
    async fn get(&self, keys: &[String], dests: &mut [BytesSink]) -> anyhow::Result<()>;
}

/// Adapts an async closure returning one [`ByteView`] per key into a
/// [`BatchGetter`].
pub struct BatchGetterFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> BatchGetter for BatchGetterFn<F>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<ByteView>>> + Send,
{
    async fn get(&self, keys: &[String], dests: &mut [BytesSink]) -> anyhow::Result<()> {
        let views = (self.0)(keys.to_vec()).await?;
        if views.len() != dests.len() {
            return Err(GroupError::BatchLength {
                expected: dests.len(),
                actual: views.len(),
            }
            .into());
        }
        for (dest, view) in dests.iter_mut().zip(views) {
            dest.set_view(view)?;
        }
        Ok(())
    }
}

fn batch_flight_key(peer_key: &str, keys: &[String]) -> String {
    let mut flight_key = String::with_capacity(peer_key.len() + keys.len() * 8);
    flight_key.push_str(peer_key);
    for key in keys {
        flight_key.push('\0');
        flight_key.push_str(key);
    }
    flight_key
}

impl Group {
    /// Get the values of `keys` into `dests`, routing the whole batch by
    /// `peer_key`.
    pub async fn batch_get<S: Sink>(
        &self,
        peer_key: &str,
        keys: &[String],
        dests: &mut [S],
    ) -> Result<()> {
        add(&self.stats.gets, keys.len() as u64);
        if keys.len() != dests.len() {
            return Err(GroupError::BatchLength {
                expected: keys.len(),
                actual: dests.len(),
            });
        }
        if keys.is_empty() {
            return Ok(());
        }
        if peer_key.is_empty() || keys.iter().any(|key| key.is_empty()) {
            return Err(GroupError::EmptyKey);
        }
        if dests.iter().any(|dest| dest.view().is_ok()) {
            return Err(GroupError::SinkAlreadySet);
        }

        let views = match self.lookup_batch_cache(keys) {
            Some(views) => {
                add(&self.stats.cache_hits, keys.len() as u64);
                tracing::debug!(group = %self.name, peer_key = %peer_key, "batch cache hit");
                views
            }
            None => self.load_batch(peer_key, keys).await?,
        };

        // Every sink must accept its value before any of them is written.
        for (dest, view) in dests.iter().zip(&views) {
            dest.check(view)?;
        }
        for (dest, view) in dests.iter_mut().zip(views) {
            dest.set_view(view)?;
        }
        Ok(())
    }

    fn lookup_batch_cache(&self, keys: &[String]) -> Option<Vec<ByteView>> {
        keys.iter().map(|key| self.lookup_cache(key)).collect()
    }

    async fn load_batch(&self, peer_key: &str, keys: &[String]) -> Result<Vec<ByteView>> {
        incr(&self.stats.loads);
        let flight_key = batch_flight_key(peer_key, keys);

        self.batch_flight
            .execute(&flight_key, || async {
                if let Some(views) = self.lookup_batch_cache(keys) {
                    add(&self.stats.cache_hits, keys.len() as u64);
                    return Ok(views);
                }
                incr(&self.stats.loads_deduped);

                if let Some(peer) = self.peers.pick_peer(peer_key) {
                    match self.batch_from_peer(peer.as_ref(), peer_key, keys).await {
                        Ok(views) => {
                            incr(&self.stats.peer_loads);
                            for (key, view) in keys.iter().zip(&views) {
                                if self.config.hot_promotion.should_promote() {
                                    self.populate_cache(key, view.clone(), CacheKind::Hot);
                                }
                            }
                            return Ok(views);
                        }
                        Err(err) => {
                            incr(&self.stats.peer_errors);
                            tracing::warn!(
                                group = %self.name,
                                peer_key = %peer_key,
                                peer = %peer.url(),
                                error = %err,
                                "peer batch load failed, loading locally"
                            );
                        }
                    }
                }

                let views = match self.batch_locally(keys).await {
                    Ok(views) => views,
                    Err(err) => {
                        incr(&self.stats.local_load_errs);
                        return Err(err);
                    }
                };
                incr(&self.stats.local_loads);
                for (key, view) in keys.iter().zip(&views) {
                    self.populate_cache(key, view.clone(), CacheKind::Main);
                }
                Ok(views)
            })
            .await
    }

    async fn batch_locally(&self, keys: &[String]) -> Result<Vec<ByteView>> {
        match &self.loader {
            Loader::Batch(getter) => self.load_batch_locally(getter.as_ref(), keys).await,
            Loader::Single(getter) => {
                let loads = keys.iter().map(|key| async move {
                    let mut dest = BytesSink::new();
                    getter
                        .get(key, &mut dest)
                        .await
                        .map_err(GroupError::loader)?;
                    dest.take_view().ok_or(GroupError::SinkNotSet)
                });
                futures::future::try_join_all(loads).await
            }
        }
    }

    pub(crate) async fn load_batch_locally(
        &self,
        getter: &dyn BatchGetter,
        keys: &[String],
    ) -> Result<Vec<ByteView>> {
        let mut dests: Vec<BytesSink> = keys.iter().map(|_| BytesSink::new()).collect();
        getter
            .get(keys, &mut dests)
            .await
            .map_err(GroupError::loader)?;

        dests
            .iter_mut()
            .map(|dest| dest.take_view().ok_or(GroupError::SinkNotSet))
            .collect()
    }

    async fn batch_from_peer(
        &self,
        peer: &dyn ProtoGetter,
        peer_key: &str,
        keys: &[String],
    ) -> Result<Vec<ByteView>> {
        let request = GetRequest::batch(&self.name, peer_key, keys);
        let responses = peer.batch_get(&request).await?;
        if responses.len() != keys.len() {
            return Err(GroupError::BatchLength {
                expected: keys.len(),
                actual: responses.len(),
            });
        }
        Ok(responses.into_iter().map(|r| r.into_view()).collect())
    }
}
