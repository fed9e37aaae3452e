//! The network contract replication runs on, and an in-process network
//! for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;
use weft_types::PeerId;

use crate::error::{SyncError, SyncResult};

/// Capacity of each subscriber's event queue on a [`MemoryNetwork`].
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Something that happened on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer subscribed to the topic (or was already subscribed when we
    /// joined).
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message { from: PeerId, data: Bytes },
}

/// Topic-based pub/sub with direct peer messaging.
///
/// This is the only network contract replication depends on; peer
/// discovery and connection management live behind it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This node's id on the network.
    fn local_peer(&self) -> &PeerId;

    /// Join a topic. Membership changes and messages on it arrive on the
    /// returned channel until [`Transport::unsubscribe`].
    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<TransportEvent>>;

    async fn unsubscribe(&self, topic: &str) -> SyncResult<()>;

    /// Send to every other subscriber of `topic`.
    async fn publish(&self, topic: &str, data: Bytes) -> SyncResult<()>;

    /// Send to one subscriber of `topic`.
    async fn send(&self, peer: &PeerId, topic: &str, data: Bytes) -> SyncResult<()>;
}

/// In-process network connecting any number of [`MemoryTransport`]s.
#[derive(Default)]
pub struct MemoryNetwork {
    topics: Mutex<HashMap<String, BTreeMap<PeerId, mpsc::Sender<TransportEvent>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport endpoint for `peer` on this network.
    pub fn transport(self: &Arc<Self>, peer: impl Into<PeerId>) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            peer: peer.into(),
        })
    }

    /// Remove `peer` from every topic, as if its connection dropped.
    pub async fn disconnect(&self, peer: &PeerId) {
        let topics: Vec<String> = self
            .topics
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        for topic in topics {
            self.leave(&topic, peer).await;
        }
    }

    /// Subscribers of `topic`, sorted.
    pub fn members(&self, topic: &str) -> Vec<PeerId> {
        self.topics
            .lock()
            .expect("lock poisoned")
            .get(topic)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn join(&self, topic: &str, peer: &PeerId) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let others: Vec<(PeerId, mpsc::Sender<TransportEvent>)> = {
            let mut topics = self.topics.lock().expect("lock poisoned");
            let subs = topics.entry(topic.to_string()).or_default();
            let others = subs
                .iter()
                .filter(|(id, _)| *id != peer)
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect();
            subs.insert(peer.clone(), tx.clone());
            others
        };
        for (other, sender) in others {
            let _ = sender.send(TransportEvent::PeerJoined(peer.clone())).await;
            let _ = tx.send(TransportEvent::PeerJoined(other)).await;
        }
        debug!(%topic, %peer, "joined topic");
        rx
    }

    async fn leave(&self, topic: &str, peer: &PeerId) {
        let others: Vec<mpsc::Sender<TransportEvent>> = {
            let mut topics = self.topics.lock().expect("lock poisoned");
            let Some(subs) = topics.get_mut(topic) else {
                return;
            };
            if subs.remove(peer).is_none() {
                return;
            }
            subs.values().cloned().collect()
        };
        for sender in others {
            let _ = sender.send(TransportEvent::PeerLeft(peer.clone())).await;
        }
        debug!(%topic, %peer, "left topic");
    }

    fn subscriber(&self, topic: &str, peer: &PeerId) -> Option<mpsc::Sender<TransportEvent>> {
        self.topics
            .lock()
            .expect("lock poisoned")
            .get(topic)
            .and_then(|subs| subs.get(peer).cloned())
    }

    fn others(&self, topic: &str, peer: &PeerId) -> Vec<mpsc::Sender<TransportEvent>> {
        self.topics
            .lock()
            .expect("lock poisoned")
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .filter(|(id, _)| *id != peer)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock().expect("lock poisoned");
        f.debug_struct("MemoryNetwork")
            .field("topics", &topics.len())
            .finish()
    }
}

/// One node's endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    peer: PeerId,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerId {
        &self.peer
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<TransportEvent>> {
        Ok(self.network.join(topic, &self.peer).await)
    }

    async fn unsubscribe(&self, topic: &str) -> SyncResult<()> {
        self.network.leave(topic, &self.peer).await;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Bytes) -> SyncResult<()> {
        for sender in self.network.others(topic, &self.peer) {
            let _ = sender
                .send(TransportEvent::Message {
                    from: self.peer.clone(),
                    data: data.clone(),
                })
                .await;
        }
        Ok(())
    }

    async fn send(&self, peer: &PeerId, topic: &str, data: Bytes) -> SyncResult<()> {
        let sender = self
            .network
            .subscriber(topic, peer)
            .ok_or_else(|| SyncError::PeerNotFound(peer.clone()))?;
        sender
            .send(TransportEvent::Message {
                from: self.peer.clone(),
                data,
            })
            .await
            .map_err(|_| SyncError::Transport(format!("{peer} stopped listening")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_learn_about_each_other() {
        let net = MemoryNetwork::new();
        let a = net.transport("a");
        let b = net.transport("b");

        let mut rx_a = a.subscribe("t").await.unwrap();
        let mut rx_b = b.subscribe("t").await.unwrap();

        assert_eq!(rx_a.recv().await, Some(TransportEvent::PeerJoined("b".into())));
        assert_eq!(rx_b.recv().await, Some(TransportEvent::PeerJoined("a".into())));
        assert_eq!(net.members("t"), vec![PeerId::from("a"), PeerId::from("b")]);
    }

    #[tokio::test]
    async fn publish_skips_sender_and_send_targets_one_peer() {
        let net = MemoryNetwork::new();
        let a = net.transport("a");
        let b = net.transport("b");
        let c = net.transport("c");
        let mut rx_a = a.subscribe("t").await.unwrap();
        let mut rx_b = b.subscribe("t").await.unwrap();
        let mut rx_c = c.subscribe("t").await.unwrap();
        // Drain membership events.
        for _ in 0..2 {
            rx_a.recv().await.unwrap();
            rx_b.recv().await.unwrap();
            rx_c.recv().await.unwrap();
        }

        a.publish("t", Bytes::from_static(b"hi")).await.unwrap();
        let expected = TransportEvent::Message {
            from: "a".into(),
            data: Bytes::from_static(b"hi"),
        };
        assert_eq!(rx_b.recv().await, Some(expected.clone()));
        assert_eq!(rx_c.recv().await, Some(expected));
        assert!(rx_a.try_recv().is_err());

        c.send(&"b".into(), "t", Bytes::from_static(b"direct"))
            .await
            .unwrap();
        assert!(matches!(
            rx_b.recv().await,
            Some(TransportEvent::Message { from, .. }) if from.as_str() == "c"
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let net = MemoryNetwork::new();
        let a = net.transport("a");
        let _rx = a.subscribe("t").await.unwrap();
        let err = a.send(&"ghost".into(), "t", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::PeerNotFound(p) if p.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn unsubscribe_and_disconnect_announce_leave() {
        let net = MemoryNetwork::new();
        let a = net.transport("a");
        let b = net.transport("b");
        let mut rx_a = a.subscribe("t").await.unwrap();
        let _rx_b = b.subscribe("t").await.unwrap();
        let _rx_b2 = b.subscribe("u").await.unwrap();
        rx_a.recv().await.unwrap();

        net.disconnect(&"b".into()).await;
        assert_eq!(rx_a.recv().await, Some(TransportEvent::PeerLeft("b".into())));
        assert!(net.members("u").is_empty());

        a.unsubscribe("t").await.unwrap();
        assert!(net.members("t").is_empty());
    }
}
