//! In-memory registry of live Host connections and their Peer pairings.
//!
//! Every mutation goes through one mutex, so replacing the Host of a code,
//! tearing down its pairings and pairing a new Peer never interleave.

use std::collections::HashMap;

use rift_proto::{Frame, PairingId, Payload};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Close code sent when the relay ends a socket in the normal course of
/// things (Host replaced, Host gone).
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent on protocol violations and failed authentication.
pub const CLOSE_POLICY: u16 = 1008;
/// Close code sent when the relay cannot serve a request (storage failure).
pub const CLOSE_ERROR: u16 = 1011;

/// Instruction queued for a socket's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: &'static str },
}

/// Sending half of a socket's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Identifies one registered Host connection.
///
/// A newer Host for the same code gets a different `id`, so stale handles
/// held by a replaced connection can never touch its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostHandle {
    pub code: String,
    id: u64,
}

/// A Peer's side of a live pairing.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub pairing_id: PairingId,
    host: HostHandle,
    host_outbox: Outbox,
}

impl Pairing {
    pub const fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Queue a Peer payload for the Host, tagged with this pairing's id.
    ///
    /// Returns `false` if the Host socket is already gone.
    pub fn forward(&self, payload: Payload) -> bool {
        self.host_outbox
            .send(Outbound::Frame(Frame::Msg {
                pairing_id: self.pairing_id.clone(),
                payload,
            }))
            .is_ok()
    }
}

struct HostEntry {
    id: u64,
    outbox: Outbox,
    peers: HashMap<PairingId, Outbox>,
}

impl HostEntry {
    /// Close every paired Peer socket; returns how many there were.
    fn close_peers(&mut self, reason: &'static str) -> usize {
        let count = self.peers.len();
        for (_, peer) in self.peers.drain() {
            let _ = peer.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason,
            });
        }
        count
    }
}

#[derive(Default)]
struct Tables {
    hosts: HashMap<String, HostEntry>,
    next_host_id: u64,
}

/// Owner of the HostConnection and PeerPairing tables.
#[derive(Default)]
pub struct RelayRegistry {
    tables: Mutex<Tables>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the Host connection for `code`.
    ///
    /// An existing Host for the code is closed first, together with all of
    /// its Peers, before the new one becomes visible.
    pub async fn attach_host(&self, code: &str, outbox: Outbox) -> HostHandle {
        let mut tables = self.tables.lock().await;

        if let Some(mut old) = tables.hosts.remove(code) {
            let peers = old.close_peers("host replaced");
            let _ = old.outbox.send(Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "replaced by a newer connection",
            });
            info!(code = %code, peers, "Replaced existing host connection");
        }

        tables.next_host_id += 1;
        let id = tables.next_host_id;
        tables.hosts.insert(
            code.to_string(),
            HostEntry {
                id,
                outbox,
                peers: HashMap::new(),
            },
        );
        info!(code = %code, "Host connection registered");

        HostHandle {
            code: code.to_string(),
            id,
        }
    }

    /// Remove a Host connection and close all of its Peers.
    ///
    /// Does nothing if the handle was already replaced by a newer Host.
    /// Returns the number of Peers closed.
    pub async fn detach_host(&self, handle: &HostHandle) -> usize {
        let mut tables = self.tables.lock().await;

        let is_current = tables
            .hosts
            .get(&handle.code)
            .is_some_and(|entry| entry.id == handle.id);
        if !is_current {
            debug!(code = %handle.code, "Stale host detached; nothing to do");
            return 0;
        }

        let closed = tables
            .hosts
            .remove(&handle.code)
            .map_or(0, |mut entry| entry.close_peers("host disconnected"));
        info!(code = %handle.code, peers = closed, "Host connection unregistered");
        closed
    }

    /// Pair a Peer with the live Host for `code`, if there is one.
    ///
    /// The Host is sent `OPEN` with the new pairing id before this returns.
    pub async fn pair(&self, code: &str, peer_outbox: Outbox) -> Option<Pairing> {
        let mut tables = self.tables.lock().await;
        let host = tables.hosts.get_mut(code)?;

        let pairing_id = loop {
            let candidate = PairingId::new(uuid::Uuid::new_v4().simple().to_string());
            if !host.peers.contains_key(&candidate) {
                break candidate;
            }
        };

        let announced = host.outbox.send(Outbound::Frame(Frame::Open {
            pairing_id: pairing_id.clone(),
        }));
        if announced.is_err() {
            debug!(code = %code, "Host writer already gone; refusing to pair");
            return None;
        }

        host.peers.insert(pairing_id.clone(), peer_outbox);
        debug!(code = %code, pairing_id = %pairing_id, "Peer paired");

        Some(Pairing {
            pairing_id,
            host: HostHandle {
                code: code.to_string(),
                id: host.id,
            },
            host_outbox: host.outbox.clone(),
        })
    }

    /// Drop a pairing after its Peer disconnected, telling the Host.
    ///
    /// Returns `false` if the pairing was already gone (Host closed or
    /// replaced).
    pub async fn unpair(&self, pairing: &Pairing) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(host) = tables.hosts.get_mut(&pairing.host.code) else {
            return false;
        };
        if host.id != pairing.host.id || host.peers.remove(&pairing.pairing_id).is_none() {
            return false;
        }

        let _ = host.outbox.send(Outbound::Frame(Frame::Close {
            pairing_id: pairing.pairing_id.clone(),
        }));
        debug!(code = %pairing.host.code, pairing_id = %pairing.pairing_id, "Peer unpaired");
        true
    }

    /// Hand a Host's payload to the Peer behind `pairing_id`.
    ///
    /// Returns `false` (and drops the payload) if that Peer is gone.
    pub async fn deliver_to_peer(
        &self,
        host: &HostHandle,
        pairing_id: &PairingId,
        payload: Payload,
    ) -> bool {
        let tables = self.tables.lock().await;
        let Some(peer) = tables
            .hosts
            .get(&host.code)
            .filter(|entry| entry.id == host.id)
            .and_then(|entry| entry.peers.get(pairing_id))
        else {
            return false;
        };

        peer.send(Outbound::Frame(Frame::PeerReceive { payload }))
            .is_ok()
    }

    /// Queue a frame for the live Host of `code`.
    pub async fn notify_host(&self, code: &str, frame: Frame) -> bool {
        let tables = self.tables.lock().await;
        tables
            .hosts
            .get(code)
            .is_some_and(|entry| entry.outbox.send(Outbound::Frame(frame)).is_ok())
    }

    /// Whether a Host is currently connected for `code`.
    pub async fn is_live(&self, code: &str) -> bool {
        self.tables.lock().await.hosts.contains_key(code)
    }

    /// Count of live Host connections.
    pub async fn host_count(&self) -> usize {
        self.tables.lock().await.hosts.len()
    }

    /// Count of Peers paired with the Host of `code`.
    pub async fn pairing_count(&self, code: &str) -> usize {
        self.tables
            .lock()
            .await
            .hosts
            .get(code)
            .map_or(0, |entry| entry.peers.len())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Outbound>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn payload(s: &str) -> Payload {
        Payload::from_value(s).unwrap()
    }

    #[tokio::test]
    async fn attach_and_query_host() {
        let registry = RelayRegistry::new();
        let (tx, _rx) = outbox();

        registry.attach_host("123456", tx).await;

        assert!(registry.is_live("123456").await);
        assert!(!registry.is_live("654321").await);
        assert_eq!(registry.host_count().await, 1);
    }

    #[tokio::test]
    async fn pair_announces_open_to_host() {
        let registry = RelayRegistry::new();
        let (host_tx, mut host_rx) = outbox();
        let (peer_tx, _peer_rx) = outbox();
        registry.attach_host("123456", host_tx).await;

        let pairing = registry.pair("123456", peer_tx).await.unwrap();

        assert_eq!(
            drain(&mut host_rx),
            vec![Outbound::Frame(Frame::Open {
                pairing_id: pairing.pairing_id.clone()
            })]
        );
        assert_eq!(registry.pairing_count("123456").await, 1);
    }

    #[tokio::test]
    async fn pair_without_host_fails() {
        let registry = RelayRegistry::new();
        let (peer_tx, _peer_rx) = outbox();

        assert!(registry.pair("123456", peer_tx).await.is_none());
    }

    #[tokio::test]
    async fn pairing_ids_are_unique_per_host() {
        let registry = RelayRegistry::new();
        let (host_tx, _host_rx) = outbox();
        registry.attach_host("123456", host_tx).await;

        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let (peer_tx, _) = outbox();
            let pairing = registry.pair("123456", peer_tx).await.unwrap();
            assert!(ids.insert(pairing.pairing_id));
        }
    }

    #[tokio::test]
    async fn replies_reach_only_the_addressed_peer() {
        let registry = RelayRegistry::new();
        let (host_tx, _host_rx) = outbox();
        let host = registry.attach_host("123456", host_tx).await;
        let (p1_tx, mut p1_rx) = outbox();
        let (p2_tx, mut p2_rx) = outbox();
        let p1 = registry.pair("123456", p1_tx).await.unwrap();
        let _p2 = registry.pair("123456", p2_tx).await.unwrap();

        assert!(
            registry
                .deliver_to_peer(&host, &p1.pairing_id, payload("for-p1"))
                .await
        );

        assert_eq!(
            drain(&mut p1_rx),
            vec![Outbound::Frame(Frame::PeerReceive {
                payload: payload("for-p1")
            })]
        );
        assert!(drain(&mut p2_rx).is_empty());
    }

    #[tokio::test]
    async fn reply_to_unknown_pairing_is_dropped() {
        let registry = RelayRegistry::new();
        let (host_tx, _host_rx) = outbox();
        let host = registry.attach_host("123456", host_tx).await;

        let delivered = registry
            .deliver_to_peer(&host, &PairingId::new("gone"), payload("x"))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn forward_tags_payload_with_pairing_id() {
        let registry = RelayRegistry::new();
        let (host_tx, mut host_rx) = outbox();
        registry.attach_host("123456", host_tx).await;
        let (peer_tx, _peer_rx) = outbox();
        let pairing = registry.pair("123456", peer_tx).await.unwrap();
        drain(&mut host_rx);

        assert!(pairing.forward(payload("hello")));

        assert_eq!(
            drain(&mut host_rx),
            vec![Outbound::Frame(Frame::Msg {
                pairing_id: pairing.pairing_id.clone(),
                payload: payload("hello"),
            })]
        );
    }

    #[tokio::test]
    async fn unpair_sends_close_to_host() {
        let registry = RelayRegistry::new();
        let (host_tx, mut host_rx) = outbox();
        registry.attach_host("123456", host_tx).await;
        let (peer_tx, _peer_rx) = outbox();
        let pairing = registry.pair("123456", peer_tx).await.unwrap();
        drain(&mut host_rx);

        assert!(registry.unpair(&pairing).await);
        assert!(!registry.unpair(&pairing).await);

        assert_eq!(
            drain(&mut host_rx),
            vec![Outbound::Frame(Frame::Close {
                pairing_id: pairing.pairing_id.clone()
            })]
        );
        assert_eq!(registry.pairing_count("123456").await, 0);
    }

    #[tokio::test]
    async fn detach_closes_every_peer() {
        let registry = RelayRegistry::new();
        let (host_tx, _host_rx) = outbox();
        let host = registry.attach_host("123456", host_tx).await;

        let mut peers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = outbox();
            registry.pair("123456", tx).await.unwrap();
            peers.push(rx);
        }

        assert_eq!(registry.detach_host(&host).await, 3);

        for rx in &mut peers {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], Outbound::Close { .. }));
        }
        assert!(!registry.is_live("123456").await);
        assert_eq!(registry.pairing_count("123456").await, 0);
    }

    #[tokio::test]
    async fn new_host_replaces_old_atomically() {
        let registry = RelayRegistry::new();
        let (old_tx, mut old_rx) = outbox();
        let old = registry.attach_host("123456", old_tx).await;
        let (peer_tx, mut peer_rx) = outbox();
        let stale_pairing = registry.pair("123456", peer_tx).await.unwrap();
        drain(&mut old_rx);

        let (new_tx, mut new_rx) = outbox();
        let new = registry.attach_host("123456", new_tx).await;

        assert!(matches!(drain(&mut old_rx).as_slice(), [Outbound::Close { .. }]));
        assert!(matches!(drain(&mut peer_rx).as_slice(), [Outbound::Close { .. }]));
        assert_eq!(registry.host_count().await, 1);

        // The replaced connection's cleanup must not touch its successor.
        assert_eq!(registry.detach_host(&old).await, 0);
        assert!(!registry.unpair(&stale_pairing).await);
        assert!(registry.is_live("123456").await);
        assert!(drain(&mut new_rx).is_empty());
        assert_ne!(old, new);
    }

    #[tokio::test]
    async fn notify_host_reaches_live_host_only() {
        let registry = RelayRegistry::new();
        let frame = Frame::PnRespond {
            kind: rift_proto::NotificationKind::ReadyCheck,
            response: "accept".into(),
        };
        assert!(!registry.notify_host("123456", frame.clone()).await);

        let (host_tx, mut host_rx) = outbox();
        registry.attach_host("123456", host_tx).await;
        assert!(registry.notify_host("123456", frame.clone()).await);
        assert_eq!(drain(&mut host_rx), vec![Outbound::Frame(frame)]);
    }
}
