//! Frame Sampler: bounded-rate JPEG pulls from the media gateway, offered
//! non-blockingly to a single consumer.

use std::sync::Arc;
use std::time::Duration;

use image::GenericImageView;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{GatewayClient, MAX_JPEG_BYTES};

const DEFAULT_FPS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub sequence_number: u64,
    pub jpeg_bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

/// Period between ticks for a given fps. A non-positive fps falls back
/// to the default rate.
pub fn tick_period(fps: f64) -> Duration {
    let effective = if fps > 0.0 { fps } else { DEFAULT_FPS };
    Duration::from_secs_f64(1.0 / effective)
}

/// Run the sampler loop until `cancel` fires. Exactly one instance should
/// run per camera_id at a time — callers are responsible for that
/// invariant, this function itself has no registry of running instances.
pub async fn run(
    camera_id: String,
    fps: f64,
    gateway: GatewayClient,
    consumer: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) {
    let period = tick_period(fps);
    let mut interval = tokio::time::interval(period);
    let mut sequence_number: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => {
                debug!(camera = %camera_id, "sampler cancelled");
                return;
            }
        }

        let jpeg = tokio::select! {
            result = gateway.frame_jpeg(&camera_id) => result,
            _ = cancel.cancelled() => {
                debug!(camera = %camera_id, "sampler cancelled mid-request");
                return;
            }
        };

        let jpeg = match jpeg {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(camera = %camera_id, error = %e, "frame grab failed, skipping tick");
                continue;
            }
        };

        if jpeg.len() >= MAX_JPEG_BYTES {
            debug!(camera = %camera_id, len = jpeg.len(), "frame exceeds size cap, skipping tick");
            continue;
        }

        let (width, height) = match image::load_from_memory(&jpeg) {
            Ok(img) => img.dimensions(),
            Err(e) => {
                debug!(camera = %camera_id, error = %e, "JPEG decode failed, skipping tick");
                continue;
            }
        };

        sequence_number += 1;
        let frame = Frame {
            camera_id: camera_id.clone(),
            timestamp: chrono::Utc::now(),
            sequence_number,
            jpeg_bytes: Arc::from(jpeg),
            width,
            height,
        };

        if consumer.try_send(frame).is_err() {
            warn!(camera = %camera_id, "detection pipeline busy, frame dropped");
        }
    }
}
