//! Event Distribution Hub — the central fan-out actor.
//!
//! A single task owns the subscriber set and is fed by three inlets:
//! register, unregister (both unbounded-but-short), and broadcast (bounded
//! at 256). No other task ever touches the subscriber set directly — this
//! is a single-owner actor, modeled the way `global_writer` owns the pool
//! file set via one task draining one channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::HubMessage;

const BROADCAST_INLET_CAPACITY: usize = 256;
pub const SUBSCRIBER_BUFFER_CAPACITY: usize = 256;

/// Hub-side handle to a subscriber session, registered once at connect
/// time. The interest set is the session's Read pump's sole write target;
/// the hub loop only ever reads it.
pub struct SessionHandle {
    pub id: Uuid,
    pub interests: Arc<Mutex<HashSet<String>>>,
    pub outbound_tx: mpsc::Sender<Bytes>,
}

enum BroadcastCmd {
    All(Bytes),
    ToCamera(String, Bytes),
}

/// Cloneable public entry point. External tasks interact with the hub
/// exclusively through this handle's channels — never the subscriber map.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<SessionHandle>,
    unregister_tx: mpsc::UnboundedSender<Uuid>,
    broadcast_tx: mpsc::Sender<BroadcastCmd>,
    count: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Admit a session. Initial interest set is the wildcard firehose.
    pub fn register(&self, session: SessionHandle) {
        if self.register_tx.send(session).is_err() {
            warn!("Hub register inlet closed, session dropped at birth");
        }
    }

    pub fn unregister(&self, id: Uuid) {
        let _ = self.unregister_tx.send(id);
    }

    /// Fan out to every subscriber regardless of interest set.
    pub fn publish(&self, msg: HubMessage) {
        let Some(bytes) = serialize(&msg) else { return };
        self.offer(BroadcastCmd::All(bytes));
    }

    /// Fan out to subscribers whose interest set contains `"*"` or `camera_id`.
    pub fn publish_to_camera(&self, camera_id: &str, msg: HubMessage) {
        let Some(bytes) = serialize(&msg) else { return };
        self.offer(BroadcastCmd::ToCamera(camera_id.to_string(), bytes));
    }

    /// Deliver `payload` verbatim, with no envelope, to every subscriber.
    pub fn publish_raw(&self, payload: &Value) {
        let Some(bytes) = serialize_value(payload) else { return };
        self.offer(BroadcastCmd::All(bytes));
    }

    /// Deliver `payload` verbatim to subscribers interested in `camera_id`.
    pub fn publish_raw_to_camera(&self, camera_id: &str, payload: &Value) {
        let Some(bytes) = serialize_value(payload) else { return };
        self.offer(BroadcastCmd::ToCamera(camera_id.to_string(), bytes));
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn offer(&self, cmd: BroadcastCmd) {
        if self.broadcast_tx.try_send(cmd).is_err() {
            warn!("Hub broadcast inlet full or closed, message dropped");
        }
    }
}

fn serialize(msg: &HubMessage) -> Option<Bytes> {
    msg.to_json_string().map(Bytes::from)
}

fn serialize_value(payload: &Value) -> Option<Bytes> {
    match serde_json::to_vec(payload) {
        Ok(v) => Some(Bytes::from(v)),
        Err(e) => {
            warn!(error = %e, "Failed to serialize raw payload, dropping");
            None
        }
    }
}

struct Hub {
    sessions: HashMap<Uuid, SessionHandle>,
    register_rx: mpsc::UnboundedReceiver<SessionHandle>,
    unregister_rx: mpsc::UnboundedReceiver<Uuid>,
    broadcast_rx: mpsc::Receiver<BroadcastCmd>,
    count: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

/// Spawn the hub task and return the handle external tasks will clone.
pub fn spawn(cancel: CancellationToken) -> (HubHandle, tokio::task::JoinHandle<()>) {
    let (register_tx, register_rx) = mpsc::unbounded_channel();
    let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
    let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_INLET_CAPACITY);
    let count = Arc::new(AtomicUsize::new(0));

    let handle = HubHandle {
        register_tx,
        unregister_tx,
        broadcast_tx,
        count: count.clone(),
    };

    let hub = Hub {
        sessions: HashMap::new(),
        register_rx,
        unregister_rx,
        broadcast_rx,
        count,
        cancel,
    };

    let join = tokio::spawn(hub.run());
    (handle, join)
}

impl Hub {
    async fn run(mut self) {
        info!("Event distribution hub started");
        loop {
            tokio::select! {
                // Deliberately unbiased: it is legal and expected for a
                // register to be observed after a broadcast issued earlier
                // by another task.
                Some(session) = self.register_rx.recv() => {
                    self.count.fetch_add(1, Ordering::AcqRel);
                    debug!(session = %session.id, "Subscriber registered");
                    self.sessions.insert(session.id, session);
                }
                Some(id) = self.unregister_rx.recv() => {
                    if self.sessions.remove(&id).is_some() {
                        self.count.fetch_sub(1, Ordering::AcqRel);
                        debug!(session = %id, "Subscriber unregistered");
                    }
                }
                Some(cmd) = self.broadcast_rx.recv() => {
                    self.dispatch(cmd);
                }
                _ = self.cancel.cancelled() => {
                    info!("Hub context cancelled, closing all sessions");
                    break;
                }
                else => break,
            }
        }
        // Closing each outbound sender lets the write pump drain whatever
        // is already queued before it observes the channel as closed.
        self.sessions.clear();
    }

    fn dispatch(&self, cmd: BroadcastCmd) {
        match cmd {
            BroadcastCmd::All(bytes) => {
                for session in self.sessions.values() {
                    Self::offer_to_session(session, &bytes);
                }
            }
            BroadcastCmd::ToCamera(camera_id, bytes) => {
                for session in self.sessions.values() {
                    let interested = {
                        let interests = session.interests.lock();
                        interests.contains("*") || interests.contains(&camera_id)
                    };
                    if interested {
                        Self::offer_to_session(session, &bytes);
                    }
                }
            }
        }
    }

    fn offer_to_session(session: &SessionHandle, bytes: &Bytes) {
        if session.outbound_tx.try_send(bytes.clone()).is_err() {
            debug!(session = %session.id, "Subscriber buffer full, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn new_session(interests: HashSet<String>) -> (SessionHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_CAPACITY);
        (
            SessionHandle {
                id: Uuid::new_v4(),
                interests: Arc::new(Mutex::new(interests)),
                outbound_tx: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn publish_to_camera_filters_by_interest() {
        let cancel = CancellationToken::new();
        let (hub, _join) = spawn(cancel.clone());

        let mut interests = HashSet::new();
        interests.insert("cam_1".to_string());
        let (session, mut rx) = new_session(interests);
        hub.register(session);
        tokio::task::yield_now().await;

        hub.publish_to_camera("cam_2", HubMessage::event("e1", "cam_2", "motion", "person", 0.9));
        hub.publish_to_camera("cam_1", HubMessage::event("e2", "cam_1", "motion", "person", 0.9));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut received = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            received.push(bytes);
        }
        assert_eq!(received.len(), 1);
        let text = String::from_utf8(received[0].to_vec()).unwrap();
        assert!(text.contains("\"e2\""));
        cancel.cancel();
    }

    #[tokio::test]
    async fn default_interest_set_is_wildcard() {
        let cancel = CancellationToken::new();
        let (hub, _join) = spawn(cancel.clone());

        let mut wildcard = HashSet::new();
        wildcard.insert("*".to_string());
        let (session, mut rx) = new_session(wildcard);
        hub.register(session);
        tokio::task::yield_now().await;

        hub.publish_to_camera("cam_9", HubMessage::event("e1", "cam_9", "motion", "person", 0.9));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(rx.try_recv().is_ok());
        cancel.cancel();
    }

    // One slow consumer must not stall delivery to a fast one.
    #[tokio::test]
    async fn slow_subscriber_does_not_block_fast_subscriber() {
        let cancel = CancellationToken::new();
        let (hub, _join) = spawn(cancel.clone());

        let mut all = HashSet::new();
        all.insert("*".to_string());
        let (slow_session, slow_rx) = new_session(all.clone());
        let (fast_session, mut fast_rx) = new_session(all);
        hub.register(slow_session);
        hub.register(fast_session);
        tokio::task::yield_now().await;

        for i in 0..1000 {
            hub.publish(HubMessage::event(&format!("e{i}"), "cam_1", "motion", "person", 0.9));
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut fast_count = 0;
        while fast_rx.try_recv().is_ok() {
            fast_count += 1;
        }
        assert!(fast_count >= 990, "fast subscriber only received {fast_count}");

        // slow_rx never drained; its buffer caps at 256 and the rest were dropped.
        drop(slow_rx);
        cancel.cancel();
    }

    #[tokio::test]
    async fn count_reflects_register_and_unregister() {
        let cancel = CancellationToken::new();
        let (hub, _join) = spawn(cancel.clone());

        let (session, _rx) = new_session(HashSet::new());
        let id = session.id;
        hub.register(session);
        tokio::task::yield_now().await;
        assert_eq!(hub.count(), 1);

        hub.unregister(id);
        tokio::task::yield_now().await;
        assert_eq!(hub.count(), 0);
        cancel.cancel();
    }

    #[test]
    fn message_kind_round_trips() {
        let msg = HubMessage::without_data(MessageKind::Ping);
        let s = serde_json::to_string(&msg).unwrap();
        let back: HubMessage = serde_json::from_str(&s).unwrap();
        assert_eq!(back.kind, MessageKind::Ping);
    }
}
