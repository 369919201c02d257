//! Subscriber Session: the read and write pumps that sit between one
//! WebSocket peer and the hub.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hub::{HubHandle, SessionHandle, SUBSCRIBER_BUFFER_CAPACITY};
use crate::message::{HubMessage, MessageKind};

const MAX_FRAME_BYTES: usize = 4096;
const READ_INACTIVITY: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Drive one subscriber's lifetime: register with the hub, run the read
/// and write pumps to completion, then unregister exactly once. Mirrors
/// `CameraWorker::run`'s shape — one task owning one peer's full
/// lifecycle.
pub async fn run(socket: WebSocket, hub: HubHandle) {
    let id = Uuid::new_v4();
    let interests = Arc::new(Mutex::new(HashSet::from(["*".to_string()])));
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(SUBSCRIBER_BUFFER_CAPACITY);
    let local_tx = outbound_tx.clone();

    hub.register(SessionHandle { id, interests: interests.clone(), outbound_tx });

    let (sink, stream) = socket.split();
    let mut read_pump = Box::pin(read_pump(stream, interests, local_tx));
    let mut write_pump = Box::pin(write_pump(sink, outbound_rx));

    // Read and write pumps share fate: whichever finishes first ends the
    // session.
    tokio::select! {
        _ = &mut read_pump => {}
        _ = &mut write_pump => {}
    }

    hub.unregister(id);
    debug!(session = %id, "subscriber session closed");
}

async fn read_pump(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    interests: Arc<Mutex<HashSet<String>>>,
    outbound_tx: mpsc::Sender<Bytes>,
) {
    loop {
        let next = tokio::time::timeout(READ_INACTIVITY, stream.next()).await;
        let Ok(Some(frame)) = next else {
            // Either the inactivity deadline elapsed or the stream ended.
            return;
        };
        let msg = match frame {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "read error, terminating session");
                return;
            }
        };
        match msg {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    debug!(len = text.len(), "inbound frame exceeds limit, terminating session");
                    return;
                }
                dispatch_inbound(text.as_str(), &interests, &outbound_tx);
            }
            Message::Binary(bytes) => {
                if bytes.len() > MAX_FRAME_BYTES {
                    debug!(len = bytes.len(), "inbound frame exceeds limit, terminating session");
                    return;
                }
                // Binary frames are not a recognized envelope transport; ignored.
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return,
        }
    }
}

fn dispatch_inbound(text: &str, interests: &Arc<Mutex<HashSet<String>>>, outbound_tx: &mpsc::Sender<Bytes>) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("inbound frame is not valid JSON, ignored");
        return;
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return;
    };
    match kind {
        "ping" => {
            if let Some(frame) = pong_frame() {
                // Drop if full, mirroring the hub's own backpressure policy.
                let _ = outbound_tx.try_send(frame);
            }
        }
        "subscribe" => {
            if let Some(ids) = value.get("data").and_then(Value::as_array) {
                let mut set = interests.lock();
                for id in ids.iter().filter_map(Value::as_str) {
                    set.insert(id.to_string());
                }
            }
        }
        "unsubscribe" => {
            if let Some(ids) = value.get("data").and_then(Value::as_array) {
                let mut set = interests.lock();
                for id in ids.iter().filter_map(Value::as_str) {
                    set.remove(id);
                }
            }
        }
        _ => {}
    }
}

async fn write_pump(mut sink: futures_util::stream::SplitSink<WebSocket, Message>, mut outbound_rx: mpsc::Receiver<Bytes>) {
    loop {
        let next = tokio::time::timeout(KEEPALIVE_PERIOD, outbound_rx.recv()).await;
        let frame = match next {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return, // hub closed the channel (unregistered or shut down)
            Err(_) => {
                // No traffic for KEEPALIVE_PERIOD: send a protocol ping.
                if send_with_deadline(&mut sink, Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        // Opportunistically batch anything already queued, newline-joined.
        let mut batch = frame.to_vec();
        while let Ok(more) = outbound_rx.try_recv() {
            batch.push(b'\n');
            batch.extend_from_slice(&more);
        }

        let text = match String::from_utf8(batch) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "outbound batch was not valid UTF-8, dropping");
                continue;
            }
        };
        if send_with_deadline(&mut sink, Message::Text(text.into())).await.is_err() {
            return;
        }
    }
}

async fn send_with_deadline(sink: &mut futures_util::stream::SplitSink<WebSocket, Message>, msg: Message) -> Result<(), ()> {
    match tokio::time::timeout(WRITE_DEADLINE, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write error, terminating session");
            Err(())
        }
        Err(_) => {
            debug!("write deadline exceeded, terminating session");
            Err(())
        }
    }
}

/// Build the `pong` reply a read pump enqueues locally in response to a
/// peer `ping`. Kept separate from `HubHandle` so a session's own pong
/// never fans out to other subscribers.
pub fn pong_frame() -> Option<Bytes> {
    HubMessage::without_data(MessageKind::Pong).to_json_string().map(Bytes::from)
}
