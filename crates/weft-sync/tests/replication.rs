//! Multi-replica scenarios over an in-memory network.
//!
//! Every node has its own block store. Entries, identity records, and
//! access manifests a node does not hold are fetched from peers through a
//! `PeerBlockService`, exactly as a networked deployment would.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use weft_access::{AccessContext, AccessController, AllowListAccess, OpenAccess};
use weft_crypto::InMemoryKeyStore;
use weft_entry::Entry;
use weft_identity::Identities;
use weft_log::{JoinRejection, Log, LogOptions};
use weft_store::{ComposedStorage, MemoryStorage, RemoteStorage, Storage};
use weft_sync::{
    MemoryNetwork, MemoryTransport, PeerBlockService, SyncConfig, SyncEngine, SyncError,
    SyncEvent, BLOCK_TOPIC,
};
use weft_types::{ContentId, Payload};

const LOG_ID: &str = "replicated";
const PEER_TIMEOUT: Duration = Duration::from_millis(200);
const REMOTE_TIMEOUT: Duration = Duration::from_millis(400);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

enum Access {
    Open,
    /// A new allow-list naming only this node.
    AllowSelf,
    /// An existing allow-list, loaded by address.
    Existing(ContentId),
}

struct Node {
    transport: Arc<MemoryTransport>,
    local: Arc<MemoryStorage>,
    blocks: Option<Arc<PeerBlockService>>,
    log: Arc<Log>,
    sync: SyncEngine,
}

impl Node {
    async fn append(&self, value: &[u8]) -> Entry {
        let entry = self.log.append(Payload::add(value.to_vec())).await.unwrap();
        self.sync.add(&entry).await.unwrap();
        entry
    }

    async fn traversal(&self) -> Vec<ContentId> {
        self.log
            .traverse()
            .collect()
            .await
            .unwrap()
            .iter()
            .map(Entry::hash)
            .collect()
    }
}

/// Build a node. With `serve` the node answers block requests and can
/// fetch from peers; without it the node only holds its own blocks.
async fn node(net: &Arc<MemoryNetwork>, name: &str, access: Access, serve: bool) -> Node {
    init_tracing();
    let transport = net.transport(name);
    let local = Arc::new(MemoryStorage::new());
    let mut layers: Vec<Arc<dyn Storage>> = vec![local.clone()];
    let blocks = if serve {
        let service = Arc::new(
            PeerBlockService::start(transport.clone(), BLOCK_TOPIC, local.clone(), PEER_TIMEOUT)
                .await
                .unwrap(),
        );
        layers.push(Arc::new(
            RemoteStorage::new(service.clone()).with_timeout(REMOTE_TIMEOUT),
        ));
        Some(service)
    } else {
        None
    };
    let storage: Arc<dyn Storage> = Arc::new(ComposedStorage::new(layers));

    let identities = Arc::new(Identities::new(
        Arc::new(InMemoryKeyStore::new()),
        storage.clone(),
    ));
    let identity = identities.create_identity(name).await.unwrap();
    let ctx = AccessContext::new(storage.clone(), identities.clone());
    let access: Arc<dyn AccessController> = match access {
        Access::Open => Arc::new(OpenAccess::new().unwrap()),
        Access::AllowSelf => Arc::new(
            AllowListAccess::create(&ctx, vec![identity.id.clone()])
                .await
                .unwrap(),
        ),
        Access::Existing(address) => {
            let service = blocks.as_ref().expect("loading a manifest needs peers");
            eventually("block peers", || !service.peers().is_empty()).await;
            Arc::new(AllowListAccess::open(&ctx, &address).await.unwrap())
        }
    };

    let log = Arc::new(Log::new(
        identities,
        identity,
        access,
        storage,
        LogOptions::default().with_id(LOG_ID),
    ));
    let sync = SyncEngine::new(log.clone(), transport.clone(), SyncConfig::test_config());
    Node {
        transport,
        local,
        blocks,
        log,
        sync,
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<SyncEvent>,
    what: &str,
    matches: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return event,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            other => panic!("no {what} event: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// 1. Convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_writers_converge() {
    let net = MemoryNetwork::new();
    let a = node(&net, "a", Access::Open, true).await;
    let b = node(&net, "b", Access::Open, true).await;
    a.sync.start().await.unwrap();
    b.sync.start().await.unwrap();

    let p1 = a.append(b"P1").await;
    eventually("P1 at b", || b.log.has(&p1.hash())).await;

    // Both write before either announces, so the branches are concurrent.
    let p2 = a.log.append(Payload::add(b"P2".to_vec())).await.unwrap();
    let q1 = b.log.append(Payload::add(b"Q1".to_vec())).await.unwrap();
    a.sync.add(&p2).await.unwrap();
    b.sync.add(&q1).await.unwrap();
    assert_eq!(p2.next, vec![p1.hash()]);
    assert_eq!(q1.next, vec![p1.hash()]);
    assert_eq!(p2.clock.time, 2);
    assert_eq!(q1.clock.time, 2);

    eventually("both logs complete", || a.log.len() == 3 && b.log.len() == 3).await;

    let mut expected = vec![p2.hash(), q1.hash()];
    expected.sort();
    assert_eq!(a.log.head_hashes(), expected);
    assert_eq!(b.log.head_hashes(), expected);
    assert_eq!(a.traversal().await, b.traversal().await);
}

#[tokio::test]
async fn late_joiner_fetches_history_from_peers() {
    let net = MemoryNetwork::new();
    let a = node(&net, "a", Access::Open, true).await;
    a.sync.start().await.unwrap();
    let mut last = None;
    for i in 0..5u8 {
        last = Some(a.append(&[i]).await);
    }
    let last = last.unwrap();

    let b = node(&net, "b", Access::Open, true).await;
    let mut events = b.sync.subscribe();
    b.sync.start().await.unwrap();

    let join = wait_for_event(&mut events, "join", |e| matches!(e, SyncEvent::Join { .. })).await;
    let SyncEvent::Join { peer, heads } = join else {
        unreachable!()
    };
    assert_eq!(peer.as_str(), "a");
    assert_eq!(heads, vec![last.clone()]);

    eventually("history at b", || b.log.len() == 5).await;
    assert_eq!(b.log.head_hashes(), vec![last.hash()]);
    assert_eq!(a.traversal().await, b.traversal().await);

    // Fetched blocks were kept locally.
    assert!(b.local.get(&last.hash()).await.unwrap().is_some());
    assert!(b.local.get(&a.log.identity().hash()).await.unwrap().is_some());
}

#[tokio::test]
async fn three_replicas_converge() {
    let net = MemoryNetwork::new();
    let mut nodes = Vec::new();
    for name in ["a", "b", "c"] {
        let n = node(&net, name, Access::Open, true).await;
        n.sync.start().await.unwrap();
        nodes.push(n);
    }

    for round in 0..3u8 {
        for (i, n) in nodes.iter().enumerate() {
            n.append(&[round, i as u8]).await;
        }
    }

    eventually("nine entries everywhere", || {
        nodes.iter().all(|n| n.log.len() == 9)
    })
    .await;
    let heads = nodes[0].log.head_hashes();
    let order = nodes[0].traversal().await;
    for n in &nodes[1..] {
        assert_eq!(n.log.head_hashes(), heads);
        assert_eq!(n.traversal().await, order);
    }
}

// ---------------------------------------------------------------------------
// 2. Missing ancestors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_ancestor_is_retried_until_it_arrives() {
    let net = MemoryNetwork::new();
    // `a` holds G and H but does not serve blocks yet.
    let a = node(&net, "a", Access::Open, false).await;
    let g = a.log.append(Payload::add(b"G".to_vec())).await.unwrap();
    let h = a.log.append(Payload::add(b"H".to_vec())).await.unwrap();
    a.sync.start().await.unwrap();

    let b = node(&net, "b", Access::Open, true).await;
    let mut events = b.sync.subscribe();
    b.sync.start().await.unwrap();

    let deferred = wait_for_event(&mut events, "deferred", |e| {
        matches!(e, SyncEvent::Error { error, .. } if matches!(error.as_ref(), SyncError::Deferred(_)))
    })
    .await;
    let SyncEvent::Error { error, .. } = deferred else {
        unreachable!()
    };
    let SyncError::Deferred(d) = error.as_ref() else {
        unreachable!()
    };
    assert_eq!(d.hash, h.hash());
    assert_eq!(d.missing(), &[g.hash()]);
    assert!(!b.log.has(&h.hash()));
    assert_eq!(b.sync.pending(), vec![h.hash()]);

    // G becomes available.
    let _serving = PeerBlockService::start(
        a.transport.clone(),
        BLOCK_TOPIC,
        a.local.clone(),
        PEER_TIMEOUT,
    )
    .await
    .unwrap();

    wait_for_event(&mut events, "retried sync", |e| {
        matches!(e, SyncEvent::Synced { peer: None, .. })
    })
    .await;
    assert_eq!(b.log.head_hashes(), vec![h.hash()]);
    assert_eq!(b.log.len(), 2);
    assert!(b.sync.pending().is_empty());
}

#[tokio::test]
async fn leaving_peer_keeps_joined_entries() {
    let net = MemoryNetwork::new();
    let a = node(&net, "a", Access::Open, true).await;
    let b = node(&net, "b", Access::Open, true).await;
    a.sync.start().await.unwrap();
    b.sync.start().await.unwrap();

    let e = a.append(b"stay").await;
    eventually("entry at b", || b.log.has(&e.hash())).await;

    let mut events = b.sync.subscribe();
    a.sync.stop().await.unwrap();
    if let Some(blocks) = &a.blocks {
        blocks.stop().await.unwrap();
    }
    wait_for_event(&mut events, "leave", |ev| matches!(ev, SyncEvent::Leave { .. })).await;

    assert!(b.sync.peers().is_empty());
    assert!(b.log.has(&e.hash()));
    assert_eq!(b.log.head_hashes(), vec![e.hash()]);
}

// ---------------------------------------------------------------------------
// 3. Access control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn writes_outside_the_allow_list_are_rejected() {
    let net = MemoryNetwork::new();
    let a = node(&net, "a", Access::AllowSelf, true).await;
    a.sync.start().await.unwrap();
    let address = a.log.access().address();

    let b = node(&net, "b", Access::Existing(address), true).await;
    let mut events = b.sync.subscribe();
    b.sync.start().await.unwrap();

    // `c` writes to the same log under an open policy of its own.
    let c = node(&net, "c", Access::Open, true).await;
    c.sync.start().await.unwrap();
    let b_blocks = b.blocks.as_ref().unwrap();
    eventually("b sees both block peers", || b_blocks.peers().len() == 2).await;

    let allowed = a.append(b"allowed").await;
    let intruding = c.append(b"intruding").await;

    let rejected = wait_for_event(&mut events, "rejection", |e| {
        matches!(e, SyncEvent::Error { error, .. } if matches!(error.as_ref(), SyncError::Rejected(_)))
    })
    .await;
    let SyncEvent::Error { error, .. } = rejected else {
        unreachable!()
    };
    let SyncError::Rejected(r) = error.as_ref() else {
        unreachable!()
    };
    assert_eq!(r.reason, JoinRejection::AccessDenied(intruding.hash()));

    eventually("allowed entry at b", || b.log.has(&allowed.hash())).await;
    assert!(!b.log.has(&intruding.hash()));
    assert!(!a.log.has(&intruding.hash()));
}
