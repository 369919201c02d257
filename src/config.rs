use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::error::{NvrError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// List of cameras to record.
    pub cameras: Vec<CameraConfig>,
    /// HTTP API configuration (optional).
    #[serde(default)]
    pub api: ApiConfig,
    /// Media gateway collaborator (frame grab + stream stats).
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Inference service collaborator.
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Zones defined statically in config; unioned at runtime with zones
    /// read from the dynamic store (see `store::ZoneStore`).
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

/// HTTP API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Whether to enable the HTTP API.
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    /// Port to listen on.
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
            username: String::new(),
            password: String::new(),
        }
    }
}

fn default_api_enabled() -> bool { true }
fn default_api_port() -> u16 { 8080 }

/// Media gateway collaborator: serves JPEG frame grabs and stream stats.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { base_url: default_gateway_url() }
    }
}

fn default_gateway_url() -> String { "http://127.0.0.1:1984".to_string() }

/// Inference service collaborator: returns object detections for a JPEG.
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_url")]
    pub base_url: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self { base_url: default_inference_url() }
    }
}

fn default_inference_url() -> String { "http://127.0.0.1:8555".to_string() }

/// Storage parameters for the global shared pool.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Base directory where pool files are stored.
    pub base_path: PathBuf,
    /// Size of each pre-allocated pool file in megabytes.
    /// All cameras share the same pool files (sequential I/O, HDD friendly).
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// Total number of pool files in the ring buffer.
    /// When all pools are full the oldest is overwritten.
    #[serde(default = "default_max_chunks")]
    pub max_pools: usize,
    /// Duration of a single video segment in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,
    /// Bounded channel capacity for the global writer queue.
    #[serde(default = "default_writer_queue")]
    pub writer_queue_size: usize,
}

/// Per-camera detection settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sample_fps")]
    pub fps: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { enabled: false, fps: default_sample_fps(), min_confidence: default_min_confidence() }
    }
}

fn default_sample_fps() -> f64 { 5.0 }
fn default_min_confidence() -> f64 { 0.5 }

/// Per-camera configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Unique identifier used for directory/file naming.
    pub id: String,
    /// Human-readable label shown in status output.
    pub name: String,
    /// RTSP (or HTTP) URL of the camera stream.
    pub url: String,
    /// Optional reconnection attempt limit (0 = unlimited).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Whether this camera participates in the desired set at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Detection pipeline settings for this camera.
    #[serde(default)]
    pub detection: DetectionConfig,
}

fn default_true() -> bool { true }

/// A zone as read from static configuration. See `zone::Zone` for the
/// runtime representation shared with dynamically-stored zones.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ZoneConfig {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordered polygon points in normalized [0,1] coordinates.
    pub polygon: Vec<(f64, f64)>,
    #[serde(default)]
    pub allowed_types: Vec<String>,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default)]
    pub min_size: Option<f64>,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
    #[serde(default)]
    pub cooldown_secs: u64,
}

fn default_sensitivity() -> u8 { 5 }

fn default_chunk_size_mb() -> u64 { 512 }
fn default_max_chunks() -> usize { 20 }
fn default_segment_duration() -> u64 { 60 }
fn default_writer_queue() -> usize { 256 }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NvrError::Config(format!("Cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| NvrError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write the configuration back to `path` (used by the hot
    /// camera-management endpoints to persist runtime additions/removals).
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        #[derive(Serialize)]
        struct Persisted<'a> {
            storage: &'a StorageConfig,
            cameras: &'a Vec<CameraConfig>,
            zones: &'a Vec<ZoneConfig>,
        }
        let persisted = Persisted { storage: &self.storage, cameras: &self.cameras, zones: &self.zones };
        let toml_str = toml::to_string_pretty(&persisted)
            .map_err(|e| NvrError::Config(format!("Cannot serialize config: {e}")))?;
        std::fs::write(path, toml_str)
            .map_err(|e| NvrError::Config(format!("Cannot write config file: {e}")))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(NvrError::Config("No cameras defined".into()));
        }
        if self.storage.chunk_size_mb == 0 {
            return Err(NvrError::Config("chunk_size_mb must be > 0".into()));
        }
        if self.storage.max_pools == 0 {
            return Err(NvrError::Config("max_pools must be > 0".into()));
        }
        if self.storage.segment_duration_secs == 0 {
            return Err(NvrError::Config("segment_duration_secs must be > 0".into()));
        }
        for zone in &self.zones {
            validate_zone(zone)?;
        }
        Ok(())
    }
}

/// Validate a zone's shape-level invariants. Surfaced synchronously as
/// `InvalidConfiguration`, never reaching the core loops.
pub fn validate_zone(zone: &ZoneConfig) -> Result<()> {
    if zone.polygon.len() < 3 {
        return Err(NvrError::InvalidConfiguration(format!(
            "zone '{}' polygon has {} points, need >= 3",
            zone.id,
            zone.polygon.len()
        )));
    }
    if zone.sensitivity < 1 || zone.sensitivity > 10 {
        return Err(NvrError::InvalidConfiguration(format!(
            "zone '{}' sensitivity {} outside 1..10",
            zone.id, zone.sensitivity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_zone() -> ZoneConfig {
        ZoneConfig {
            id: "z1".into(),
            camera_id: "cam1".into(),
            name: "front".into(),
            enabled: true,
            polygon: vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)],
            allowed_types: vec![],
            min_confidence: 0.0,
            min_size: None,
            sensitivity: 5,
            cooldown_secs: 0,
        }
    }

    #[test]
    fn zone_with_two_points_is_invalid() {
        let mut zone = base_zone();
        zone.polygon = vec![(0.0, 0.0), (1.0, 1.0)];
        assert!(validate_zone(&zone).is_err());
    }

    #[test]
    fn zone_with_sensitivity_out_of_range_is_invalid() {
        let mut zone = base_zone();
        zone.sensitivity = 11;
        assert!(validate_zone(&zone).is_err());
        zone.sensitivity = 0;
        assert!(validate_zone(&zone).is_err());
        zone.sensitivity = 5;
        assert!(validate_zone(&zone).is_ok());
    }
}
