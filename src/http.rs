//! HTTP peer pool.
//!
//! [`HttpPool`] routes keys to peers over a consistent hash ring and hands out
//! [`HttpGetter`] clients for remote owners. [`HttpPool::router`] builds the
//! server side that answers other peers.

use crate::config::PoolConfig;
use crate::error::{GroupError, Result};
use crate::group::GroupRegistry;
use crate::peers::{PeerPicker, ProtoGetter};
use crate::protocol::{
    decode_multi_response, decode_response, encode_multi_response, encode_response,
    parse_batch_path, parse_single_path, GetMultiResponse, GetRequest, GetResponse, CONTENT_TYPE,
};
use crate::ring::{crc32_ieee, HashFn, HashRing};
use crate::sink::{BytesSink, Sink};
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Ring and clients of one peer generation, always swapped together.
struct PoolState {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// A pool of HTTP peers, one of which is this process.
pub struct HttpPool {
    self_url: String,
    config: PoolConfig,
    hash: HashFn,
    client: reqwest::Client,
    state: RwLock<Arc<PoolState>>,
}

impl HttpPool {
    /// `self_url` is this process's base URL, e.g. `http://10.0.0.1:8000`, and
    /// must match how it appears in the peer list.
    pub fn new(self_url: &str, config: PoolConfig) -> Self {
        let config = config.normalized();
        let state = PoolState {
            ring: HashRing::with_hash(config.replicas, crc32_ieee),
            getters: HashMap::new(),
        };

        Self {
            self_url: self_url.trim_end_matches('/').to_string(),
            config,
            hash: crc32_ieee,
            client: reqwest::Client::new(),
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Use `hash` for ring placement. Takes effect on the next [`HttpPool::set`].
    pub fn with_hash_fn(mut self, hash: HashFn) -> Self {
        self.hash = hash;
        self
    }

    /// Send peer requests through `client`, e.g. one configured with TLS roots
    /// or a proxy. Takes effect on the next [`HttpPool::set`].
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Replace the peer set. Each peer is a base URL such as
    /// `http://10.0.0.2:8000`.
    pub fn set<S: AsRef<str>>(&self, peers: &[S]) {
        let peers: Vec<String> = peers
            .iter()
            .map(|peer| peer.as_ref().trim_end_matches('/').to_string())
            .collect();

        let ring = HashRing::from_peers(self.config.replicas, self.hash, &peers);
        let getters = peers
            .iter()
            .map(|peer| {
                let getter = HttpGetter {
                    client: self.client.clone(),
                    base_url: format!("{}{}", peer, self.config.base_path),
                    multi_url: format!("{}{}", peer, self.config.multi_path),
                    timeout: self.config.request_timeout,
                };
                (peer.clone(), Arc::new(getter))
            })
            .collect();

        *self.state.write() = Arc::new(PoolState { ring, getters });
        tracing::info!(self_url = %self.self_url, peers = peers.len(), "updated peer set");
    }

    fn snapshot(&self) -> Arc<PoolState> {
        self.state.read().clone()
    }

    /// Server side of the peer protocol, dispatching to groups in `registry`.
    pub fn router(&self, registry: Arc<GroupRegistry>) -> Router {
        let state = Arc::new(ServerState {
            base_path: self.config.base_path.clone(),
            multi_path: self.config.multi_path.clone(),
            registry,
        });

        Router::new()
            .route(&format!("{}*rest", self.config.base_path), any(handle_single))
            .route(&format!("{}*rest", self.config.multi_path), any(handle_batch))
            .with_state(state)
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn ProtoGetter>> {
        let state = self.snapshot();
        let owner = state.ring.get(key)?;
        if owner == self.self_url {
            return None;
        }
        state
            .getters
            .get(owner)
            .map(|getter| getter.clone() as Arc<dyn ProtoGetter>)
    }

    fn all_peers(&self) -> Vec<Arc<dyn ProtoGetter>> {
        self.snapshot()
            .getters
            .iter()
            .filter(|(peer, _)| **peer != self.self_url)
            .map(|(_, getter)| getter.clone() as Arc<dyn ProtoGetter>)
            .collect()
    }
}

/// Client for one remote peer.
pub struct HttpGetter {
    client: reqwest::Client,
    base_url: String,
    multi_url: String,
    timeout: Option<Duration>,
}

impl HttpGetter {
    async fn send(&self, method: Method, request: &GetRequest) -> Result<reqwest::Response> {
        let prefix = if request.is_batch() {
            &self.multi_url
        } else {
            &self.base_url
        };
        let url = format!("{}{}", prefix, request.path());

        let mut builder = self.client.request(method, url);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.send().await?)
    }

    async fn read_ok_body(&self, response: reqwest::Response) -> Result<bytes::Bytes> {
        if response.status() != StatusCode::OK {
            return Err(GroupError::Peer(format!(
                "server returned: {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| GroupError::Peer(format!("reading response body: {}", e)))
    }
}

#[async_trait::async_trait]
impl ProtoGetter for HttpGetter {
    async fn get(&self, request: &GetRequest) -> Result<GetResponse> {
        let response = self.send(Method::GET, request).await?;
        let body = self.read_ok_body(response).await?;
        decode_response(&body)
    }

    async fn batch_get(&self, request: &GetRequest) -> Result<Vec<GetResponse>> {
        let response = self.send(Method::GET, request).await?;
        let body = self.read_ok_body(response).await?;
        Ok(decode_multi_response(&body)?.values)
    }

    async fn remove(&self, request: &GetRequest) -> Result<()> {
        let response = self.send(Method::DELETE, request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(GroupError::Peer(format!(
                "server returned status {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}

struct ServerState {
    base_path: String,
    multi_path: String,
    registry: Arc<GroupRegistry>,
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "bad request").into_response()
}

fn no_such_group(name: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("no such group: {}", name)).into_response()
}

fn internal_error(err: GroupError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

fn encoded(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

async fn handle_single(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let Some(rest) = uri.path().strip_prefix(state.base_path.as_str()) else {
        return bad_request();
    };
    let Some((group_name, key)) = parse_single_path(rest) else {
        return bad_request();
    };
    let Some(group) = state.registry.get_group(&group_name) else {
        return no_such_group(&group_name);
    };

    if method == Method::DELETE {
        group.local_remove(&key);
        return StatusCode::OK.into_response();
    }
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    group.record_server_request();

    let mut dest = BytesSink::new();
    let view = match group.get(&key, &mut dest).await.and_then(|_| dest.view()) {
        Ok(view) => view,
        Err(err) => {
            tracing::error!(group = %group_name, key = %key, error = %err, "peer get failed");
            return internal_error(err);
        }
    };

    match encode_response(&GetResponse::from_view(&view)) {
        Ok(body) => encoded(body),
        Err(err) => internal_error(err),
    }
}

async fn handle_batch(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
) -> Response {
    let Some(rest) = uri.path().strip_prefix(state.multi_path.as_str()) else {
        return bad_request();
    };
    let Some((group_name, peer_key, keys)) = parse_batch_path(rest) else {
        return bad_request();
    };
    let Some(group) = state.registry.get_group(&group_name) else {
        return no_such_group(&group_name);
    };

    if method == Method::DELETE {
        for key in &keys {
            group.local_remove(key);
        }
        return StatusCode::OK.into_response();
    }
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    group.record_server_request();

    let mut dests: Vec<BytesSink> = keys.iter().map(|_| BytesSink::new()).collect();
    if let Err(err) = group.batch_get(&peer_key, &keys, &mut dests).await {
        tracing::error!(group = %group_name, peer_key = %peer_key, error = %err, "peer batch get failed");
        return internal_error(err);
    }

    let values = match dests
        .iter()
        .map(|dest| dest.view().map(|view| GetResponse::from_view(&view)))
        .collect::<Result<Vec<_>>>()
    {
        Ok(values) => values,
        Err(err) => return internal_error(err),
    };

    match encode_multi_response(&GetMultiResponse { values }) {
        Ok(body) => encoded(body),
        Err(err) => internal_error(err),
    }
}
