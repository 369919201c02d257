//! Config Change Reactor: diffs a new configuration snapshot against the
//! running set of per-camera supervisors and starts/stops Detection
//! Pipeline and Recorder Supervisor instances to match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CameraConfig, Config};
use crate::detection;
use crate::gateway::GatewayClient;
use crate::hub::HubHandle;
use crate::inference::InferenceClient;
use crate::recorder::RecorderSupervisor;
use crate::registry::CameraRegistry;
use crate::sampler;
use crate::storage::global_writer::WriteRequest;
use crate::store::Stores;
use crate::zone::Zone;

struct PipelineEntry {
    fps: f64,
    cancel: CancellationToken,
    sampler_handle: JoinHandle<()>,
    pipeline_handle: JoinHandle<()>,
}

/// Owns the running detection-pipeline and recorder-supervisor instances
/// and reconciles them against a configuration snapshot.
pub struct Reactor {
    registry: Arc<CameraRegistry>,
    gateway: GatewayClient,
    inference: InferenceClient,
    stores: Stores,
    hub: HubHandle,
    writer_tx: mpsc::Sender<WriteRequest>,
    segment_duration: Duration,
    pipelines: HashMap<String, PipelineEntry>,
    recorders: HashMap<String, Arc<RecorderSupervisor>>,
}

impl Reactor {
    pub fn new(
        registry: Arc<CameraRegistry>,
        gateway: GatewayClient,
        inference: InferenceClient,
        stores: Stores,
        hub: HubHandle,
        writer_tx: mpsc::Sender<WriteRequest>,
        segment_duration: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            inference,
            stores,
            hub,
            writer_tx,
            segment_duration,
            pipelines: HashMap::new(),
            recorders: HashMap::new(),
        }
    }

    /// Reconcile the running supervisor set against a new configuration
    /// snapshot. Safe to call repeatedly — e.g. once at startup, and again
    /// whenever an operator reloads the config file.
    pub fn reconcile(&mut self, config: &Config) {
        self.reconcile_registry(config);
        self.reconcile_detection(config);
        self.reconcile_recorders(config);
    }

    /// Camera ids currently present in the registry. Exposed for tests
    /// that observe the reactor's effect on registry membership from
    /// outside the crate.
    pub fn registry_snapshot_ids(&self) -> Vec<String> {
        self.registry.snapshot().into_iter().map(|e| e.id).collect()
    }

    pub fn has_running_pipeline(&self, camera_id: &str) -> bool {
        self.pipelines.contains_key(camera_id)
    }

    pub fn has_running_recorder(&self, camera_id: &str) -> bool {
        self.recorders.contains_key(camera_id)
    }

    /// The config reactor is the sole mutator of registry membership;
    /// health fields are left untouched here.
    fn reconcile_registry(&mut self, config: &Config) {
        let config_ids: HashSet<&str> = config.cameras.iter().map(|c| c.id.as_str()).collect();
        for cam in &config.cameras {
            self.registry.upsert(cam);
        }
        let stale: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|e| e.id)
            .filter(|id| !config_ids.contains(id.as_str()))
            .collect();
        for id in stale {
            self.registry.remove(&id);
        }
    }

    /// `D = {c : c.enabled ∧ c.detection.enabled}` vs the running set `R`.
    fn reconcile_detection(&mut self, config: &Config) {
        let desired: HashMap<&str, &CameraConfig> = config
            .cameras
            .iter()
            .filter(|c| c.enabled && c.detection.enabled)
            .map(|c| (c.id.as_str(), c))
            .collect();

        let running_ids: Vec<String> = self.pipelines.keys().cloned().collect();
        for id in &running_ids {
            if !desired.contains_key(id.as_str()) {
                self.stop_pipeline(id);
            }
        }

        for (id, cam) in desired {
            match self.pipelines.get(id) {
                None => self.start_pipeline(cam, config),
                // Changed fps: stop-then-start, not a live reconfigure.
                Some(entry) if (entry.fps - cam.detection.fps).abs() > f64::EPSILON => {
                    self.stop_pipeline(id);
                    self.start_pipeline(cam, config);
                }
                Some(_) => {}
            }
        }
    }

    fn start_pipeline(&mut self, cam: &CameraConfig, config: &Config) {
        let cancel = CancellationToken::new();
        let period = sampler::tick_period(cam.detection.fps);
        let (frame_tx, frame_rx) = mpsc::channel(1);

        let sampler_handle = tokio::spawn(sampler::run(
            cam.id.clone(),
            cam.detection.fps,
            self.gateway.clone(),
            frame_tx,
            cancel.clone(),
        ));

        let static_zones: Vec<Zone> = config
            .zones
            .iter()
            .filter(|z| z.camera_id == cam.id)
            .map(Zone::from)
            .collect();

        let pipeline_handle = match detection::start(
            cam.id.clone(),
            cam.detection.min_confidence,
            period,
            frame_rx,
            self.inference.clone(),
            static_zones,
            self.stores.zones.clone(),
            self.stores.events.clone(),
            self.hub.clone(),
            &self.registry,
            cancel.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(camera = %cam.id, error = %e, "failed to start detection pipeline");
                sampler_handle.abort();
                return;
            }
        };

        info!(camera = %cam.id, fps = cam.detection.fps, "detection pipeline started");
        self.pipelines.insert(
            cam.id.clone(),
            PipelineEntry { fps: cam.detection.fps, cancel, sampler_handle, pipeline_handle },
        );
    }

    fn stop_pipeline(&mut self, id: &str) {
        if let Some(entry) = self.pipelines.remove(id) {
            entry.cancel.cancel();
            entry.sampler_handle.abort();
            entry.pipeline_handle.abort();
            info!(camera = %id, "detection pipeline stopped");
        }
    }

    /// Recorder supervisors reconciled against the enabled subset of
    /// cameras, analogous to the detection-pipeline reconciliation above.
    fn reconcile_recorders(&mut self, config: &Config) {
        let desired: HashMap<&str, &CameraConfig> =
            config.cameras.iter().filter(|c| c.enabled).map(|c| (c.id.as_str(), c)).collect();

        let running_ids: Vec<String> = self.recorders.keys().cloned().collect();
        for id in &running_ids {
            if !desired.contains_key(id.as_str()) {
                self.stop_recorder(id);
            }
        }

        for (id, cam) in desired {
            if !self.recorders.contains_key(id) {
                self.start_recorder(cam);
            }
        }
    }

    fn start_recorder(&mut self, cam: &CameraConfig) {
        let supervisor = Arc::new(RecorderSupervisor::new(
            cam.clone(),
            self.segment_duration,
            self.writer_tx.clone(),
            self.hub.clone(),
            self.registry.clone(),
        ));
        supervisor.start();
        self.recorders.insert(cam.id.clone(), supervisor);
    }

    fn stop_recorder(&mut self, id: &str) {
        if let Some(supervisor) = self.recorders.remove(id) {
            supervisor.stop();
        }
    }

    /// Tear down every running supervisor. Called on root cancellation.
    pub fn shutdown(&mut self) {
        let pipeline_ids: Vec<String> = self.pipelines.keys().cloned().collect();
        for id in pipeline_ids {
            self.stop_pipeline(&id);
        }
        let recorder_ids: Vec<String> = self.recorders.keys().cloned().collect();
        for id in recorder_ids {
            self.stop_recorder(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn base_config(cameras: Vec<CameraConfig>) -> Config {
        Config {
            storage: StorageConfig {
                base_path: std::path::PathBuf::from("/tmp/spatialnvr-reactor-test"),
                chunk_size_mb: 1,
                max_pools: 1,
                segment_duration_secs: 60,
                writer_queue_size: 8,
            },
            cameras,
            api: Default::default(),
            gateway: Default::default(),
            inference: Default::default(),
            zones: vec![],
        }
    }

    fn camera(id: &str, detection_enabled: bool) -> CameraConfig {
        CameraConfig {
            id: id.to_string(),
            name: id.to_string(),
            url: "rtsp://example/stream".to_string(),
            max_reconnect_attempts: 0,
            enabled: true,
            detection: crate::config::DetectionConfig { enabled: detection_enabled, fps: 5.0, min_confidence: 0.5 },
        }
    }

    fn reactor() -> Reactor {
        let cancel = CancellationToken::new();
        let hub = crate::hub::spawn(cancel).0;
        let (writer_tx, _rx) = mpsc::channel(8);
        Reactor::new(
            Arc::new(CameraRegistry::new()),
            GatewayClient::new("http://127.0.0.1:9"),
            InferenceClient::new("http://127.0.0.1:9"),
            Stores::default(),
            hub,
            writer_tx,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn reconcile_starts_recorder_but_not_detection_for_detection_disabled_camera() {
        let mut r = reactor();
        let config = base_config(vec![camera("cam1", false)]);
        r.reconcile(&config);
        assert!(r.recorders.contains_key("cam1"));
        assert!(!r.pipelines.contains_key("cam1"));
        r.shutdown();
    }

    #[tokio::test]
    async fn reconcile_starts_detection_pipeline_for_detection_enabled_camera() {
        let mut r = reactor();
        let config = base_config(vec![camera("cam1", true)]);
        r.reconcile(&config);
        assert!(r.pipelines.contains_key("cam1"));
        r.shutdown();
    }

    #[tokio::test]
    async fn removing_camera_from_config_stops_its_supervisors() {
        let mut r = reactor();
        r.reconcile(&base_config(vec![camera("cam1", true)]));
        assert!(r.pipelines.contains_key("cam1"));

        r.reconcile(&base_config(vec![]));
        assert!(!r.pipelines.contains_key("cam1"));
        assert!(!r.recorders.contains_key("cam1"));
        assert!(r.registry.get("cam1").is_none());
    }

    #[tokio::test]
    async fn changed_fps_restarts_the_pipeline() {
        let mut r = reactor();
        r.reconcile(&base_config(vec![camera("cam1", true)]));
        let first_fps = r.pipelines.get("cam1").unwrap().fps;
        assert_eq!(first_fps, 5.0);

        let mut cam = camera("cam1", true);
        cam.detection.fps = 10.0;
        r.reconcile(&base_config(vec![cam]));
        assert_eq!(r.pipelines.get("cam1").unwrap().fps, 10.0);
        r.shutdown();
    }
}
