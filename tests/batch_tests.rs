use anyhow::anyhow;
use peercache::{
    batch_string_sinks, BatchGetter, BatchGetterFn, ByteView, BytesSink, CacheKind, GetRequest,
    GetResponse, GetterFn, GroupConfig, GroupError, GroupRegistry, PeerPicker, ProtoGetter,
    Result, Sink, StringSink, StructuredSink,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

fn counting_batch_getter(calls: Arc<AtomicUsize>, delay: Duration) -> Arc<dyn BatchGetter> {
    Arc::new(BatchGetterFn(move |keys: Vec<String>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(delay).await;
            Ok::<_, anyhow::Error>(
                keys.iter()
                    .map(|key| ByteView::new(format!("got:{}", key), None))
                    .collect(),
            )
        }
    }))
}

#[tokio::test]
async fn test_batch_get_populates_every_sink_in_order() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "batch",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::ZERO),
        )
        .unwrap();

    let keys = keys(&["k1", "k2"]);
    let mut dests = batch_string_sinks(keys.len());
    group.batch_get("user-1", &keys, &mut dests).await.unwrap();

    assert_eq!(dests[0].as_str(), "got:k1");
    assert_eq!(dests[1].as_str(), "got:k2");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Every key is now cached
    let mut dests = batch_string_sinks(keys.len());
    group.batch_get("user-1", &keys, &mut dests).await.unwrap();
    assert_eq!(dests[1].as_str(), "got:k2");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(group.cache_stats(CacheKind::Main).items, 2);
}

#[tokio::test]
async fn test_batch_cached_keys_serve_single_gets() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "interop",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::ZERO),
        )
        .unwrap();

    let mut dests = batch_string_sinks(2);
    group
        .batch_get("p", &keys(&["a", "b"]), &mut dests)
        .await
        .unwrap();

    let mut single = StringSink::new();
    group.get("b", &mut single).await.unwrap();
    assert_eq!(single.as_str(), "got:b");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A single miss on a batch group goes through the batch loader
    let mut single = StringSink::new();
    group.get("c", &mut single).await.unwrap();
    assert_eq!(single.as_str(), "got:c");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_batch_loader_error_leaves_sinks_empty() {
    let registry = GroupRegistry::new();
    let group = registry
        .new_batch_group(
            "failing",
            GroupConfig::default(),
            None,
            Arc::new(BatchGetterFn(|_keys: Vec<String>| async {
                Err::<Vec<ByteView>, _>(anyhow!("db down"))
            })),
        )
        .unwrap();

    let mut dests = batch_string_sinks(3);
    let err = group
        .batch_get("p", &keys(&["x", "y", "z"]), &mut dests)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "db down");
    assert!(dests.iter().all(|dest| !dest.is_set()));
    assert_eq!(group.stats().local_load_errs, 1);
}

#[tokio::test]
async fn test_batch_loader_wrong_length_is_an_error() {
    let registry = GroupRegistry::new();
    let group = registry
        .new_batch_group(
            "short",
            GroupConfig::default(),
            None,
            Arc::new(BatchGetterFn(|_keys: Vec<String>| async {
                Ok::<_, anyhow::Error>(vec![ByteView::new("only-one", None)])
            })),
        )
        .unwrap();

    let mut dests = batch_string_sinks(2);
    let result = group.batch_get("p", &keys(&["a", "b"]), &mut dests).await;
    assert!(result.is_err());
    assert!(dests.iter().all(|dest| !dest.is_set()));
}

#[tokio::test]
async fn test_batch_argument_validation() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "validation",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::ZERO),
        )
        .unwrap();

    let mut dests = batch_string_sinks(1);
    assert!(matches!(
        group.batch_get("p", &keys(&["a", "b"]), &mut dests).await,
        Err(GroupError::BatchLength {
            expected: 2,
            actual: 1
        })
    ));

    let mut dests = batch_string_sinks(2);
    assert!(matches!(
        group.batch_get("p", &keys(&["a", ""]), &mut dests).await,
        Err(GroupError::EmptyKey)
    ));
    assert!(matches!(
        group.batch_get("", &keys(&["a", "b"]), &mut dests).await,
        Err(GroupError::EmptyKey)
    ));

    let mut empty: Vec<StringSink> = Vec::new();
    group.batch_get("p", &[], &mut empty).await.unwrap();

    let mut dests = vec![BytesSink::new(), BytesSink::new()];
    dests[0].set_string("already", None).unwrap();
    assert!(matches!(
        group.batch_get("p", &keys(&["a", "b"]), &mut dests).await,
        Err(GroupError::SinkAlreadySet)
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_batches_are_coalesced() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "coalesced",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::from_millis(100)),
        )
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let group = group.clone();
        handles.push(tokio::spawn(async move {
            let keys = keys(&["m", "n"]);
            let mut dests = batch_string_sinks(2);
            group.batch_get("peer", &keys, &mut dests).await.map(|_| {
                dests
                    .into_iter()
                    .map(|dest| dest.into_string())
                    .collect::<Vec<_>>()
            })
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), vec!["got:m", "got:n"]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batches_sharing_peer_key_with_different_keys_are_distinct() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "distinct",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::from_millis(50)),
        )
        .unwrap();

    let first = {
        let group = group.clone();
        tokio::spawn(async move {
            let mut dests = batch_string_sinks(1);
            group.batch_get("peer", &keys(&["one"]), &mut dests).await?;
            Ok::<_, GroupError>(dests.remove(0).into_string())
        })
    };
    let second = {
        let group = group.clone();
        tokio::spawn(async move {
            let mut dests = batch_string_sinks(1);
            group.batch_get("peer", &keys(&["two"]), &mut dests).await?;
            Ok::<_, GroupError>(dests.remove(0).into_string())
        })
    };

    assert_eq!(first.await.unwrap().unwrap(), "got:one");
    assert_eq!(second.await.unwrap().unwrap(), "got:two");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_group_serves_batches() {
    let registry = GroupRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let group = registry
        .new_group(
            "single",
            GroupConfig::default(),
            None,
            Arc::new(GetterFn(move |key: String| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, anyhow::Error>(ByteView::new(key.to_uppercase(), None)) }
            })),
        )
        .unwrap();

    let mut dests = vec![BytesSink::new(), BytesSink::new(), BytesSink::new()];
    group
        .batch_get("p", &keys(&["a", "b", "c"]), &mut dests)
        .await
        .unwrap();

    let values: Vec<Vec<u8>> = dests.iter().map(|dest| dest.to_vec()).collect();
    assert_eq!(values, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_undecodable_value_leaves_every_sink_empty() {
    let registry = GroupRegistry::new();
    let group = registry
        .new_batch_group(
            "undecodable",
            GroupConfig::default(),
            None,
            Arc::new(BatchGetterFn(|_keys: Vec<String>| async {
                Ok::<_, anyhow::Error>(vec![
                    ByteView::new(bincode::serialize(&7u32)?, None),
                    ByteView::new(vec![0xffu8], None),
                ])
            })),
        )
        .unwrap();

    let mut dests = vec![StructuredSink::<u32>::new(), StructuredSink::<u32>::new()];
    let err = group
        .batch_get("p", &keys(&["good", "bad"]), &mut dests)
        .await
        .unwrap_err();

    assert!(matches!(err, GroupError::Codec(_)));
    assert!(dests.iter().all(|dest| dest.view().is_err()));
    assert!(dests.iter().all(|dest| dest.value().is_none()));
}

#[tokio::test]
async fn test_batch_stats_count_keys_and_loads() {
    let registry = GroupRegistry::new();
    let group = registry
        .new_batch_group(
            "batch-stats",
            GroupConfig::default(),
            None,
            counting_batch_getter(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
        )
        .unwrap();

    let mut dests = batch_string_sinks(2);
    group
        .batch_get("p", &keys(&["a", "b"]), &mut dests)
        .await
        .unwrap();

    let stats = group.stats();
    assert_eq!(stats.gets, 2);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.cache_hits, 0);

    let mut dests = batch_string_sinks(2);
    group
        .batch_get("p", &keys(&["a", "b"]), &mut dests)
        .await
        .unwrap();

    let stats = group.stats();
    assert_eq!(stats.gets, 4);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.cache_hits, 2);
}

/// Peer that refuses every request.
struct DownPeer {
    requests: AtomicUsize,
}

#[async_trait::async_trait]
impl ProtoGetter for DownPeer {
    async fn get(&self, _request: &GetRequest) -> Result<GetResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(GroupError::Peer("connection refused".to_string()))
    }

    async fn batch_get(&self, _request: &GetRequest) -> Result<Vec<GetResponse>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Err(GroupError::Peer("connection refused".to_string()))
    }

    async fn remove(&self, _request: &GetRequest) -> Result<()> {
        Ok(())
    }

    fn url(&self) -> &str {
        "fake://down"
    }
}

struct DownPicker {
    peer: Arc<DownPeer>,
}

impl PeerPicker for DownPicker {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn ProtoGetter>> {
        Some(self.peer.clone() as Arc<dyn ProtoGetter>)
    }

    fn all_peers(&self) -> Vec<Arc<dyn ProtoGetter>> {
        vec![self.peer.clone() as Arc<dyn ProtoGetter>]
    }
}

#[tokio::test]
async fn test_batch_peer_failure_falls_back_to_local_loader() {
    let peer = Arc::new(DownPeer {
        requests: AtomicUsize::new(0),
    });
    let registry = GroupRegistry::with_peers(Arc::new(DownPicker { peer: peer.clone() }));
    let calls = Arc::new(AtomicUsize::new(0));
    let group = registry
        .new_batch_group(
            "batch-fallback",
            GroupConfig::default(),
            None,
            counting_batch_getter(calls.clone(), Duration::ZERO),
        )
        .unwrap();

    let mut dests = batch_string_sinks(2);
    group
        .batch_get("p", &keys(&["a", "b"]), &mut dests)
        .await
        .unwrap();

    assert_eq!(dests[0].as_str(), "got:a");
    assert_eq!(dests[1].as_str(), "got:b");
    assert_eq!(peer.requests.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(group.cache_stats(CacheKind::Main).items, 2);
    assert_eq!(group.cache_stats(CacheKind::Hot).items, 0);

    let stats = group.stats();
    assert_eq!(stats.peer_errors, 1);
    assert_eq!(stats.peer_loads, 0);
    assert_eq!(stats.local_loads, 1);
}
