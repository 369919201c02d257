//! Hub Message: the tagged union carried over the realtime peer channel.
//! Payloads are dynamically typed per message kind rather than a single
//! fixed schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recognized message kinds. `Raw` carries an already-serialized,
/// envelope-less payload and is handled specially by the hub (it skips
/// the `{type, timestamp, data}` wrapping entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Event,
    CameraState,
    Detection,
    Stats,
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
    Doorbell,
    AudioState,
    Raw,
}

/// A wrapped (enveloped) hub message: `{type, timestamp, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HubMessage {
    pub fn new(kind: MessageKind, data: Value) -> Self {
        Self { kind, timestamp: Utc::now(), data: Some(data) }
    }

    pub fn without_data(kind: MessageKind) -> Self {
        Self { kind, timestamp: Utc::now(), data: None }
    }

    pub fn event(event_id: &str, camera_id: &str, event_type: &str, label: &str, confidence: f64) -> Self {
        Self::new(
            MessageKind::Event,
            serde_json::json!({
                "event_id": event_id,
                "camera_id": camera_id,
                "event_type": event_type,
                "label": label,
                "confidence": confidence,
            }),
        )
    }

    pub fn camera_state(camera_id: &str, status: &str, fps: Option<f64>, bitrate: Option<f64>) -> Self {
        Self::new(
            MessageKind::CameraState,
            serde_json::json!({
                "camera_id": camera_id,
                "status": status,
                "fps": fps,
                "bitrate": bitrate,
            }),
        )
    }

    pub fn detection_overlay(camera_id: &str, detections: Vec<Value>) -> Self {
        Self::new(
            MessageKind::Detection,
            serde_json::json!({
                "camera_id": camera_id,
                "detections": detections,
            }),
        )
    }

    pub fn doorbell_ring(camera_id: &str, camera_name: &str, event_id: &str, snapshot_url: &str) -> Self {
        Self::new(
            MessageKind::Doorbell,
            serde_json::json!({
                "camera_id": camera_id,
                "camera_name": camera_name,
                "event_id": event_id,
                "action": "ring",
                "snapshot_url": snapshot_url,
            }),
        )
    }

    pub fn doorbell_answered(camera_id: &str, session_id: &str, user_id: &str) -> Self {
        Self::new(
            MessageKind::Doorbell,
            serde_json::json!({
                "camera_id": camera_id,
                "session_id": session_id,
                "user_id": user_id,
                "action": "answered",
            }),
        )
    }

    pub fn audio_state(camera_id: &str, session_id: &str, action: &str, active: bool) -> Self {
        Self::new(
            MessageKind::AudioState,
            serde_json::json!({
                "camera_id": camera_id,
                "session_id": session_id,
                "action": action,
                "active": active,
            }),
        )
    }

    pub fn pong() -> Self {
        Self::without_data(MessageKind::Pong)
    }

    /// Serialize for the wire. Logs and drops on failure; callers treat
    /// `None` as "nothing to send".
    pub fn to_json_string(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize hub message, dropping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = HubMessage::camera_state("cam1", "online", Some(25.0), Some(1_000_000.0));
        let s = msg.to_json_string().unwrap();
        let parsed: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed["type"], "camera_state");
        assert_eq!(parsed["data"]["camera_id"], "cam1");
        assert_eq!(parsed["data"]["status"], "online");
    }

    #[test]
    fn pong_has_no_data_field() {
        let msg = HubMessage::pong();
        let s = msg.to_json_string().unwrap();
        let parsed: Value = serde_json::from_str(&s).unwrap();
        assert!(parsed.get("data").is_none());
    }
}
