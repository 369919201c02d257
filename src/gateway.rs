//! Media gateway collaborator client.
//!
//! The gateway is an external process that serves raw JPEG frame grabs and
//! per-stream producer/track stats. This crate only speaks its HTTP
//! surface — the gateway process itself is out of scope.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{NvrError, Result};

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);
const STREAMS_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single frame grab response body.
pub const MAX_JPEG_BYTES: usize = 10 * 1024 * 1024;

/// One track within a producer, as reported by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    #[serde(rename = "type", default)]
    pub track_type: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

/// One active publisher feeding a stream. A stream may have zero or more
/// producers; only the first is consulted by the health reconciler.
#[derive(Debug, Clone, Deserialize)]
pub struct Producer {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bytes_recv: u64,
    /// Comma-separated per-media summaries, used as a fallback when
    /// `tracks` is absent.
    #[serde(default)]
    pub medias: Vec<String>,
    #[serde(default)]
    pub tracks: Option<Vec<Track>>,
}

/// One entry of the gateway's `/api/streams` response: `{ <name>: {
/// producers: [...], consumers: [...] } }`. `consumers` is not consulted
/// by anything in this crate and is dropped on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEntry {
    #[serde(default)]
    pub producers: Vec<Producer>,
}

pub type StreamTable = HashMap<String, StreamEntry>;

/// Normalize a camera id into the gateway's stream-name convention:
/// lowercase, spaces and hyphens collapsed to underscores.
pub fn stream_name(camera_id: &str) -> String {
    camera_id.to_lowercase().replace('-', "_").replace(' ', "_")
}

#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    /// Pull a single JPEG frame for `camera_id`. Bounded to 10s; a timeout
    /// or non-2xx response surfaces as `CameraConnection` so callers can
    /// fold it into the same backoff path used for RTSP reconnects. A
    /// body at or above `MAX_JPEG_BYTES` is rejected before it reaches
    /// the caller.
    pub async fn frame_jpeg(&self, camera_id: &str) -> Result<Vec<u8>> {
        let src = stream_name(camera_id);
        let url = format!("{}/api/frame.jpeg", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .query(&[("src", src)])
            .timeout(FRAME_TIMEOUT)
            .send()
            .await
            .map_err(|e| NvrError::CameraConnection { id: camera_id.to_string(), reason: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(NvrError::CameraConnection {
                id: camera_id.to_string(),
                reason: format!("gateway returned {}", resp.status()),
            });
        }
        let body = resp.bytes().await.map_err(NvrError::Http)?;
        if body.len() >= MAX_JPEG_BYTES {
            return Err(NvrError::FrameTooLarge { id: camera_id.to_string(), limit: MAX_JPEG_BYTES });
        }
        Ok(body.to_vec())
    }

    /// Fetch the gateway's live stream table, used by the camera registry
    /// reconciler.
    pub async fn streams(&self) -> Result<StreamTable> {
        let url = format!("{}/api/streams", self.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).timeout(STREAMS_TIMEOUT).send().await.map_err(NvrError::Http)?;
        if !resp.status().is_success() {
            return Err(NvrError::Hub(format!("gateway /api/streams returned {}", resp.status())));
        }
        resp.json::<StreamTable>().await.map_err(NvrError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_normalizes_id() {
        assert_eq!(stream_name("Front Door-Cam"), "front_door_cam");
        assert_eq!(stream_name("cam_1"), "cam_1");
    }

    #[test]
    fn stream_table_deserializes_from_wire_shape() {
        let body = serde_json::json!({
            "front_door": {
                "producers": [{
                    "url": "rtsp://127.0.0.1/front_door",
                    "bytes_recv": 12_000,
                    "medias": ["video H264"],
                    "tracks": [{"type": "video", "codec": "H264", "width": 1920, "height": 1080, "fps": 15.0}]
                }],
                "consumers": []
            }
        });
        let table: StreamTable = serde_json::from_value(body).unwrap();
        let entry = table.get("front_door").unwrap();
        assert_eq!(entry.producers[0].bytes_recv, 12_000);
        assert_eq!(entry.producers[0].tracks.as_ref().unwrap()[0].codec.as_deref(), Some("H264"));
    }
}
