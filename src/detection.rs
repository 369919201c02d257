//! Detection Pipeline: per-frame inference call, zone filter, event
//! construction, hub publish. One instance per enabled, detection-enabled
//! camera.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{NvrError, Result};
use crate::hub::HubHandle;
use crate::inference::InferenceClient;
use crate::message::HubMessage;
use crate::registry::CameraRegistry;
use crate::sampler::Frame;
use crate::store::{Event, EventStore, ZoneStore};
use crate::zone::{self, Admission, DetectionView, Zone};

/// Validate the camera is known before spawning a pipeline for it.
/// Fails with `CameraNotConfigured` otherwise.
pub fn start(
    camera_id: String,
    min_confidence: f64,
    sampler_period: Duration,
    frames: mpsc::Receiver<Frame>,
    inference: InferenceClient,
    static_zones: Vec<Zone>,
    zone_store: Arc<dyn ZoneStore>,
    event_store: Arc<dyn EventStore>,
    hub: HubHandle,
    registry: &CameraRegistry,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    if registry.get(&camera_id).is_none() {
        return Err(NvrError::CameraNotConfigured { id: camera_id });
    }
    Ok(tokio::spawn(run(
        camera_id,
        min_confidence,
        sampler_period,
        frames,
        inference,
        static_zones,
        zone_store,
        event_store,
        hub,
        cancel,
    )))
}

async fn run(
    camera_id: String,
    min_confidence: f64,
    sampler_period: Duration,
    mut frames: mpsc::Receiver<Frame>,
    inference: InferenceClient,
    static_zones: Vec<Zone>,
    zone_store: Arc<dyn ZoneStore>,
    event_store: Arc<dyn EventStore>,
    hub: HubHandle,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            f = frames.recv() => match f {
                Some(f) => f,
                None => return, // sampler gone
            },
            _ = cancel.cancelled() => {
                debug!(camera = %camera_id, "detection pipeline cancelled");
                return;
            }
        };

        let response = tokio::select! {
            r = inference.detect(&camera_id, min_confidence, &frame.jpeg_bytes, sampler_period) => r,
            _ = cancel.cancelled() => return,
        };

        let response = match response {
            Ok(r) if r.success => r,
            Ok(r) => {
                debug!(camera = %camera_id, error = ?r.error, "inference reported failure, dropping frame");
                continue;
            }
            Err(e) => {
                debug!(camera = %camera_id, error = %e, "inference call failed, dropping frame");
                continue;
            }
        };

        // Only enabled zones participate in the union — an all-disabled
        // zone set must behave as "no zones configured" (detection
        // passes), not as "zones exist, none admit".
        let mut effective_zones: Vec<Zone> = static_zones.iter().filter(|z| z.enabled).cloned().collect();
        effective_zones.extend(zone_store.zones_for(&camera_id).into_iter().filter(|z| z.enabled));

        for det in &response.detections {
            let view = DetectionView {
                object_type: &det.object_type,
                label: &det.label,
                confidence: det.confidence,
                center: det.center(),
            };
            match zone::evaluate(&effective_zones, &view) {
                Admission::Rejected => continue,
                Admission::NoZonesConfigured | Admission::Admitted(_) => {
                    emit_event(&camera_id, det, &event_store, &hub);
                }
            }
        }
    }
}

fn emit_event(camera_id: &str, det: &crate::inference::Detection, event_store: &Arc<dyn EventStore>, hub: &HubHandle) {
    let event = Event {
        event_id: Uuid::new_v4().to_string(),
        camera_id: camera_id.to_string(),
        event_type: "detection".to_string(),
        label: det.label.clone(),
        timestamp: Utc::now(),
        confidence: det.confidence,
        metadata: json!({ "object_type": det.object_type, "track_id": det.track_id, "bbox": { "x": det.bbox.x, "y": det.bbox.y, "width": det.bbox.width, "height": det.bbox.height } }),
    };
    if event_store.persist(event.clone()).is_ok() {
        hub.publish_to_camera(
            camera_id,
            HubMessage::event(&event.event_id, camera_id, &event.event_type, &event.label, event.confidence),
        );
    }
}
