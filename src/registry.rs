//! Camera Registry & Health Reconciler.
//!
//! Single writer discipline: the config reactor mutates membership, the
//! reconciler (this module's `reconcile_once`) mutates health fields.
//! They never run concurrently by construction, and both operate through
//! the same `parking_lot::RwLock`, which gives every other task a
//! lock-free-ish snapshot read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::gateway::{stream_name, GatewayClient, StreamEntry};
use crate::hub::HubHandle;
use crate::message::HubMessage;

const RECONCILE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Offline,
    Online,
    Starting,
    Error,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Offline => "offline",
            CameraStatus::Online => "online",
            CameraStatus::Starting => "starting",
            CameraStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraHealth {
    pub status: CameraStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub fps: Option<f64>,
    pub bitrate: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub bytes_recv: u64,
}

impl Default for CameraHealth {
    /// A camera is `Starting` from the moment the reactor admits it until
    /// its first health probe — the reconciler's gateway-polling algorithm
    /// only ever derives `Offline`/`Online`, so this is the one place
    /// `Starting` is assigned.
    fn default() -> Self {
        Self { status: CameraStatus::Starting, last_seen: None, fps: None, bitrate: None, width: None, height: None, codec: None, bytes_recv: 0 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub health: CameraHealth,
}

#[derive(Default)]
pub struct CameraRegistry {
    cameras: RwLock<HashMap<String, CameraEntry>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or update a camera's membership fields. Called only by the
    /// config reactor (G); health fields are left untouched if the entry
    /// already exists.
    pub fn upsert(&self, cfg: &CameraConfig) {
        let mut cameras = self.cameras.write();
        cameras
            .entry(cfg.id.clone())
            .and_modify(|e| {
                e.name = cfg.name.clone();
                e.url = cfg.url.clone();
                e.enabled = cfg.enabled;
            })
            .or_insert_with(|| CameraEntry {
                id: cfg.id.clone(),
                name: cfg.name.clone(),
                url: cfg.url.clone(),
                enabled: cfg.enabled,
                health: CameraHealth::default(),
            });
    }

    pub fn remove(&self, id: &str) {
        self.cameras.write().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<CameraEntry> {
        self.cameras.read().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<CameraEntry> {
        self.cameras.read().values().cloned().collect()
    }

    fn camera_ids(&self) -> Vec<String> {
        self.cameras.read().keys().cloned().collect()
    }

    /// Apply a freshly-derived health reading. Returns whether `status`
    /// changed, so the caller knows whether to emit a hub message.
    fn apply_health(&self, id: &str, health: CameraHealth) -> bool {
        let mut cameras = self.cameras.write();
        let Some(entry) = cameras.get_mut(id) else { return false };
        let changed = entry.health.status != health.status;
        entry.health = health;
        changed
    }
}

/// Derive a camera's health from the gateway's stream table. `stream` is
/// `None` when no entry or an empty producer list was found, which is
/// `offline`.
fn derive_health(stream: Option<&StreamEntry>) -> CameraHealth {
    let now = Some(Utc::now());
    let Some(stream) = stream else {
        return CameraHealth { status: CameraStatus::Offline, last_seen: now, ..Default::default() };
    };
    let Some(producer) = stream.producers.first() else {
        return CameraHealth { status: CameraStatus::Offline, last_seen: now, ..Default::default() };
    };

    let bytes_recv = producer.bytes_recv;
    let mut codec = None;
    let mut width = None;
    let mut height = None;
    let mut fps = None;

    let tracks = producer.tracks.as_deref().unwrap_or(&[]);
    if let Some(track) = tracks
        .iter()
        .find(|t| t.track_type.as_deref() == Some("video") || t.codec.as_deref().is_some_and(|c| c.starts_with("H26")))
    {
        codec = track.codec.clone();
        if let (Some(w), Some(h)) = (track.width, track.height) {
            if w > 0 && h > 0 {
                width = Some(w);
                height = Some(h);
            }
        }
        if let Some(f) = track.fps {
            if f > 0.0 {
                fps = Some(f);
            }
        }
    } else if tracks.is_empty() {
        if let Some(media) = producer.medias.first() {
            let parts: Vec<&str> = media.split(',').map(str::trim).collect();
            if parts.first() == Some(&"video") && parts.len() >= 3 {
                codec = Some(parts[2].to_string());
            }
        }
    }

    let bitrate = if bytes_recv > 0 { Some(bytes_recv as f64 * 8.0 / 30.0) } else { None };

    CameraHealth { status: CameraStatus::Online, last_seen: now, fps, bitrate, width, height, codec, bytes_recv }
}

/// Run one reconciliation pass: query the gateway once, derive health per
/// known camera, and publish `camera_state` on any status transition.
/// A gateway query failure is logged and the whole tick is skipped; this
/// component never propagates transient network errors as an error.
pub async fn reconcile_once(registry: &CameraRegistry, gateway: &GatewayClient, hub: &HubHandle) {
    let streams = match gateway.streams().await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "gateway /api/streams probe failed, skipping reconciliation tick");
            return;
        }
    };

    for id in registry.camera_ids() {
        let stream = streams.get(&stream_name(&id));
        let health = derive_health(stream);
        let (fps, bitrate, status) = (health.fps, health.bitrate, health.status);
        if registry.apply_health(&id, health) {
            debug!(camera = %id, status = status.as_str(), "camera health transitioned");
            hub.publish_to_camera(&id, HubMessage::camera_state(&id, status.as_str(), fps, bitrate));
        }
    }
}

/// Spawn the periodic reconciler task, ticking every 30s until `cancel`
/// fires.
pub fn spawn_reconciler(
    registry: Arc<CameraRegistry>,
    gateway: GatewayClient,
    hub: HubHandle,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Camera health reconciler started");
        let mut interval = tokio::time::interval(RECONCILE_PERIOD);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    reconcile_once(&registry, &gateway, &hub).await;
                }
                _ = cancel.cancelled() => {
                    info!("Camera health reconciler stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Producer, Track};

    fn cfg(id: &str) -> CameraConfig {
        CameraConfig {
            id: id.to_string(),
            name: id.to_string(),
            url: "rtsp://example/stream".to_string(),
            max_reconnect_attempts: 0,
            enabled: true,
            detection: Default::default(),
        }
    }

    #[test]
    fn new_camera_starts_in_starting_state() {
        let registry = CameraRegistry::new();
        registry.upsert(&cfg("cam1"));
        assert_eq!(registry.get("cam1").unwrap().health.status, CameraStatus::Starting);
    }

    #[test]
    fn no_entry_derives_offline() {
        let health = derive_health(None);
        assert_eq!(health.status, CameraStatus::Offline);
    }

    #[test]
    fn empty_producers_derives_offline() {
        let stream = StreamEntry { producers: vec![] };
        let health = derive_health(Some(&stream));
        assert_eq!(health.status, CameraStatus::Offline);
    }

    #[test]
    fn producer_with_video_track_derives_online_with_fields() {
        let stream = StreamEntry {
            producers: vec![Producer {
                url: None,
                bytes_recv: 30_000,
                tracks: Some(vec![Track { track_type: Some("video".into()), codec: Some("H264".into()), width: Some(1920), height: Some(1080), fps: Some(15.0) }]),
                medias: vec![],
            }],
        };
        let health = derive_health(Some(&stream));
        assert_eq!(health.status, CameraStatus::Online);
        assert_eq!(health.codec.as_deref(), Some("H264"));
        assert_eq!(health.width, Some(1920));
        assert_eq!(health.height, Some(1080));
        assert_eq!(health.fps, Some(15.0));
        assert_eq!(health.bitrate, Some(30_000.0 * 8.0 / 30.0));
    }

    #[test]
    fn fallback_media_string_derives_codec_when_tracks_absent() {
        let stream = StreamEntry {
            producers: vec![Producer { url: None, bytes_recv: 0, tracks: None, medias: vec!["video,recvonly,h265".into()] }],
        };
        let health = derive_health(Some(&stream));
        assert_eq!(health.status, CameraStatus::Online);
        assert_eq!(health.codec.as_deref(), Some("h265"));
    }

    // Codec value retains its original case; surrounding whitespace in the
    // comma-separated fields is trimmed before matching.
    #[test]
    fn medias_string_with_spaces_derives_h264() {
        let stream = StreamEntry {
            producers: vec![Producer {
                url: None,
                bytes_recv: 1_000_000,
                tracks: None,
                medias: vec!["video, recvonly, H264".into()],
            }],
        };
        let health = derive_health(Some(&stream));
        assert_eq!(health.status, CameraStatus::Online);
        assert_eq!(health.codec.as_deref(), Some("H264"));
        assert_eq!(health.bytes_recv, 1_000_000);
    }

    #[test]
    fn apply_health_reports_transition_only_on_status_change() {
        let registry = CameraRegistry::new();
        registry.upsert(&cfg("cam1"));
        let changed = registry.apply_health("cam1", CameraHealth { status: CameraStatus::Online, ..Default::default() });
        assert!(changed);
        let changed_again = registry.apply_health("cam1", CameraHealth { status: CameraStatus::Online, bytes_recv: 5, ..Default::default() });
        assert!(!changed_again);
    }
}
