//! Consistent hashing ring with virtual replicas.
//!
//! Every peer is placed on the ring `replicas` times, at the hash of
//! `"{i}{peer}"` for `i` in `0..replicas`. A key belongs to the peer owning the
//! first position at or after the key's hash, wrapping around to the start.
//! Identical membership and hash function always yield identical ownership, so
//! peers agree on owners without coordinating.

use crc::{Crc, CRC_32_ISO_HDLC};
use std::collections::BTreeMap;

/// Hash function mapping bytes onto the ring.
pub type HashFn = fn(&[u8]) -> u32;

const CRC32_IEEE: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Default ring hash: CRC-32 (IEEE polynomial).
pub fn crc32_ieee(data: &[u8]) -> u32 {
    CRC32_IEEE.checksum(data)
}

#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    positions: BTreeMap<u32, String>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hash(replicas, crc32_ieee)
    }

    pub fn with_hash(replicas: usize, hash: HashFn) -> Self {
        Self {
            replicas,
            hash,
            positions: BTreeMap::new(),
        }
    }

    /// Build a ring populated with `peers`.
    pub fn from_peers<S: AsRef<str>>(replicas: usize, hash: HashFn, peers: &[S]) -> Self {
        let mut ring = Self::with_hash(replicas, hash);
        ring.add(peers);
        ring
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", i, peer).as_bytes());
                self.positions.insert(position, peer.to_string());
            }
        }
    }

    /// Owner of `key`, or `None` when the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        self.positions
            .range(hash..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, peer)| peer.as_str())
    }
}
