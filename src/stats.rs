use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative per-group counters.
#[derive(Debug, Default)]
pub struct GroupStats {
    pub(crate) gets: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) peer_loads: AtomicU64,
    pub(crate) peer_errors: AtomicU64,
    pub(crate) loads: AtomicU64,
    pub(crate) loads_deduped: AtomicU64,
    pub(crate) local_loads: AtomicU64,
    pub(crate) local_load_errs: AtomicU64,
    pub(crate) server_requests: AtomicU64,
    pub(crate) remove_keys_requested: AtomicU64,
}

/// Point-in-time copy of [`GroupStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatsSnapshot {
    /// Requested keys, including those requested by peers; a batch counts each key
    pub gets: u64,
    /// Served from either cache tier
    pub cache_hits: u64,
    /// Remote loads that succeeded
    pub peer_loads: u64,
    /// Remote loads that failed and fell back to the local loader
    pub peer_errors: u64,
    /// Cache misses that started a load; a batch miss counts once
    pub loads: u64,
    /// Loads after coalescing
    pub loads_deduped: u64,
    /// Successful local loads
    pub local_loads: u64,
    /// Failed local loads
    pub local_load_errs: u64,
    /// Requests arriving from peers over the network
    pub server_requests: u64,
    pub remove_keys_requested: u64,
}

pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl GroupStats {
    pub fn snapshot(&self) -> GroupStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        GroupStatsSnapshot {
            gets: load(&self.gets),
            cache_hits: load(&self.cache_hits),
            peer_loads: load(&self.peer_loads),
            peer_errors: load(&self.peer_errors),
            loads: load(&self.loads),
            loads_deduped: load(&self.loads_deduped),
            local_loads: load(&self.local_loads),
            local_load_errs: load(&self.local_load_errs),
            server_requests: load(&self.server_requests),
            remove_keys_requested: load(&self.remove_keys_requested),
        }
    }
}
