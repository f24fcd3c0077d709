use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Fixed bookkeeping cost charged to every cached entry on top of its payload.
pub const ENTRY_OVERHEAD: usize = 16;

/// Immutable snapshot of a cached value together with its expiration instant.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
    expire: Option<SystemTime>,
}

impl ByteView {
    pub fn new(data: impl Into<Bytes>, expire: Option<SystemTime>) -> Self {
        Self {
            data: data.into(),
            expire,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Absolute expiration, `None` meaning the value never expires.
    pub fn expire(&self) -> Option<SystemTime> {
        self.expire
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        matches!(self.expire, Some(expire) if expire <= now)
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.data))
    }
}

/// Byte cost of storing `view` under `key`.
pub fn entry_cost(key: &str, view: &ByteView) -> usize {
    key.len() + view.len() + ENTRY_OVERHEAD
}

/// Which of a group's two cache tiers to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheKind {
    /// Entries this process owns.
    Main,
    /// Mirrors of entries owned by other peers.
    Hot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub bytes: usize,
    pub items: usize,
    pub gets: u64,
    pub hits: u64,
    pub evictions: u64,
}

pub mod memory;
