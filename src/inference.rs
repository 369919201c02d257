//! Inference service collaborator client. The inference service itself
//! runs out-of-process; this crate only speaks the `/detect`
//! request/response shape it calls.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{NvrError, Result};

const MIN_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    camera_id: &'a str,
    min_confidence: f64,
    image_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub object_type: String,
    pub label: String,
    pub confidence: f64,
    pub bbox: BBox,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Detection {
    /// bbox center, used for zone containment.
    pub fn center(&self) -> (f64, f64) {
        (self.bbox.x + self.bbox.width / 2.0, self.bbox.y + self.bbox.height / 2.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub camera_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub motion_detected: bool,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub process_time_ms: Option<u64>,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Clone)]
pub struct InferenceClient {
    base_url: String,
    client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    /// Submit one JPEG frame for detection. `sampler_period` sets the
    /// per-call deadline (4x the period, floor 2s). Callers are expected
    /// to log-and-drop on `Err`, never propagate.
    pub async fn detect(
        &self,
        camera_id: &str,
        min_confidence: f64,
        jpeg: &[u8],
        sampler_period: Duration,
    ) -> Result<DetectResponse> {
        let deadline = (sampler_period * 4).max(MIN_DEADLINE);
        let image_data = base64::engine::general_purpose::STANDARD.encode(jpeg);
        let req = DetectRequest { camera_id, min_confidence, image_data };

        let url = format!("{}/detect", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&req)
            .timeout(deadline)
            .send()
            .await
            .map_err(NvrError::Http)?;
        if !resp.status().is_success() {
            return Err(NvrError::Hub(format!("inference service returned {}", resp.status())));
        }
        resp.json::<DetectResponse>().await.map_err(NvrError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_response_deserializes_from_wire_shape() {
        let body = serde_json::json!({
            "success": true,
            "camera_id": "cam1",
            "timestamp": 1_700_000_000_000i64,
            "motion_detected": true,
            "detections": [{
                "object_type": "person",
                "label": "person",
                "confidence": 0.6,
                "bbox": {"x": 0.4, "y": 0.4, "width": 0.2, "height": 0.2},
                "track_id": "t1",
                "attributes": {}
            }],
            "process_time_ms": 42,
            "model_id": "yolo-v8"
        });
        let resp: DetectResponse = serde_json::from_value(body).unwrap();
        assert!(resp.success);
        assert_eq!(resp.detections.len(), 1);
        assert_eq!(resp.detections[0].center(), (0.5, 0.5));
    }

    #[test]
    fn deadline_floors_at_two_seconds() {
        let short = Duration::from_millis(100);
        let deadline = (short * 4).max(MIN_DEADLINE);
        assert_eq!(deadline, MIN_DEADLINE);
    }
}
