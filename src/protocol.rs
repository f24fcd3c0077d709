//! Peer Network Protocol
//!
//! Request/response envelopes exchanged between peers, their binary encoding,
//! and the URL layout used to address them:
//!
//! - single key: `<base>/<group>/<key>`
//! - batch: `<multi>/<group>/<peer_key>/<key>,<key>,...`
//!
//! Every path segment is percent-encoded. Batch keys are encoded one by one and
//! joined with a literal comma, so keys may themselves contain commas.

use crate::cache::ByteView;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Content type of every successful peer response body.
pub const CONTENT_TYPE: &str = "application/x-bincode";

/// A request addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub group: String,
    /// The single key; empty for batch requests.
    pub key: String,
    /// Routing key of a batch request.
    pub peer_key: Option<String>,
    /// Keys of a batch request, in order.
    pub keys: Vec<String>,
}

impl GetRequest {
    pub fn single(group: &str, key: &str) -> Self {
        Self {
            group: group.to_string(),
            key: key.to_string(),
            peer_key: None,
            keys: Vec::new(),
        }
    }

    pub fn batch(group: &str, peer_key: &str, keys: &[String]) -> Self {
        Self {
            group: group.to_string(),
            key: String::new(),
            peer_key: Some(peer_key.to_string()),
            keys: keys.to_vec(),
        }
    }

    pub fn is_batch(&self) -> bool {
        self.peer_key.is_some()
    }

    /// Path relative to the pool prefix (`base` or `multi`).
    pub fn path(&self) -> String {
        match &self.peer_key {
            None => format!(
                "{}/{}",
                urlencoding::encode(&self.group),
                urlencoding::encode(&self.key)
            ),
            Some(peer_key) => {
                let keys = self
                    .keys
                    .iter()
                    .map(|key| urlencoding::encode(key).into_owned())
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "{}/{}/{}",
                    urlencoding::encode(&self.group),
                    urlencoding::encode(peer_key),
                    keys
                )
            }
        }
    }
}

/// A value and its expiration in Unix nanoseconds (`0` = never).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResponse {
    pub value: Vec<u8>,
    pub expire: i64,
}

impl GetResponse {
    pub fn from_view(view: &ByteView) -> Self {
        Self {
            value: view.as_slice().to_vec(),
            expire: expire_to_nanos(view.expire()),
        }
    }

    pub fn into_view(self) -> ByteView {
        let expire = nanos_to_expire(self.expire);
        ByteView::new(self.value, expire)
    }
}

/// Batch response, one entry per requested key in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMultiResponse {
    pub values: Vec<GetResponse>,
}

pub fn encode_response(response: &GetResponse) -> Result<Vec<u8>> {
    Ok(bincode::serialize(response)?)
}

pub fn decode_response(body: &[u8]) -> Result<GetResponse> {
    Ok(bincode::deserialize(body)?)
}

pub fn encode_multi_response(response: &GetMultiResponse) -> Result<Vec<u8>> {
    Ok(bincode::serialize(response)?)
}

pub fn decode_multi_response(body: &[u8]) -> Result<GetMultiResponse> {
    Ok(bincode::deserialize(body)?)
}

pub fn expire_to_nanos(expire: Option<SystemTime>) -> i64 {
    match expire {
        None => 0,
        Some(at) => match at.duration_since(UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
        },
    }
}

pub fn nanos_to_expire(nanos: i64) -> Option<SystemTime> {
    match nanos {
        0 => None,
        n if n > 0 => Some(UNIX_EPOCH + Duration::from_nanos(n as u64)),
        n => Some(UNIX_EPOCH - Duration::from_nanos(n.unsigned_abs())),
    }
}

/// Parse `<group>/<key>` (already stripped of the base prefix).
pub fn parse_single_path(rest: &str) -> Option<(String, String)> {
    let mut parts = rest.splitn(2, '/');
    let group = decode_segment(parts.next()?)?;
    let key = decode_segment(parts.next()?)?;
    Some((group, key))
}

/// Parse `<group>/<peer_key>/<keys>` (already stripped of the multi prefix).
pub fn parse_batch_path(rest: &str) -> Option<(String, String, Vec<String>)> {
    let mut parts = rest.splitn(3, '/');
    let group = decode_segment(parts.next()?)?;
    let peer_key = decode_segment(parts.next()?)?;
    let keys = parts
        .next()?
        .split(',')
        .map(decode_segment)
        .collect::<Option<Vec<_>>>()?;
    Some((group, peer_key, keys))
}

fn decode_segment(segment: &str) -> Option<String> {
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}
