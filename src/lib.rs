//! # peercache
//!
//! **Read-through, peer-to-peer distributed caching**
//!
//! A set of processes share the work of loading and caching values. Each key is
//! owned by exactly one peer, picked with a consistent hash ring. A miss on a
//! non-owner is forwarded to the owner over HTTP; the owner loads the value
//! once, however many callers are asking, and caches it. Popular remote values
//! may additionally be mirrored into a local hot cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peercache::{
//!     ByteView, GetterFn, GroupConfig, GroupRegistry, HttpPool, PoolConfig, StringSink,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(HttpPool::new("http://10.0.0.1:8000", PoolConfig::default()));
//! pool.set(&["http://10.0.0.1:8000", "http://10.0.0.2:8000"]);
//!
//! let registry = Arc::new(GroupRegistry::with_peers(pool.clone()));
//! let users = registry.new_group(
//!     "users",
//!     GroupConfig::with_cache_bytes(64 << 20),
//!     None,
//!     Arc::new(GetterFn(|key: String| async move {
//!         // Load from the source of truth
//!         Ok::<_, anyhow::Error>(ByteView::new(format!("user:{}", key), None))
//!     })),
//! )?;
//!
//! // Serve other peers
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! let router = pool.router(registry.clone());
//! tokio::spawn(async move { axum::serve(listener, router).await });
//!
//! let mut dest = StringSink::new();
//! users.get("42", &mut dest).await?;
//! println!("{}", dest.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Features
//!
//! - **Consistent hashing**: minimal key movement when peers join or leave
//! - **Two-tier LRU**: owned keys in the main cache, mirrors in the hot cache
//! - **Request coalescing**: concurrent misses for a key trigger one load
//! - **Batch loads**: many keys routed by a single peer key
//! - **Per-entry expiration**: carried across the wire with the value
//! - **Cluster-wide removal**: owner first, then every peer's hot copy

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod group;
pub mod http;
pub mod peers;
pub mod protocol;
pub mod ring;
pub mod sink;
pub mod stats;

// Re-export commonly used types
pub use batch::{BatchGetter, BatchGetterFn};
pub use cache::memory::LruMemoryCache;
pub use cache::{ByteView, CacheKind, CacheStats};
pub use config::{GroupConfig, HotPromotion, PoolConfig};
pub use error::{GroupError, Result};
pub use flight::Flight;
pub use group::{Getter, GetterFn, Group, GroupRegistry};
pub use http::{HttpGetter, HttpPool};
pub use peers::{NoPeers, PeerPicker, ProtoGetter};
pub use protocol::{GetMultiResponse, GetRequest, GetResponse};
pub use ring::HashRing;
pub use sink::{
    batch_string_sinks, BytesSink, Sink, SinkExt, StringSink, StructuredSink, TruncatingBytesSink,
};
pub use stats::GroupStatsSnapshot;
