//! Recorder Supervisor: an explicit state machine layered on top of the
//! GStreamer ingestion pipeline (`camera.rs`, `ingestion.rs`). This
//! module contributes the state machine and hub wiring; the concrete
//! recording mechanism is unchanged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::camera::LifecycleEvent;
use crate::config::CameraConfig;
use crate::hub::HubHandle;
use crate::ingestion::CameraWorker;
use crate::message::HubMessage;
use crate::registry::CameraRegistry;
use crate::storage::global_writer::WriteRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl RecorderState {
    fn as_str(&self) -> &'static str {
        match self {
            RecorderState::Stopped => "stopped",
            RecorderState::Starting => "starting",
            RecorderState::Running => "running",
            RecorderState::Stopping => "stopping",
            RecorderState::Failed => "failed",
        }
    }
}

struct RunningTasks {
    worker: JoinHandle<()>,
    driver: JoinHandle<()>,
}

/// One per enabled camera: exactly one Recorder Supervisor runs per
/// enabled camera at a time.
pub struct RecorderSupervisor {
    camera: CameraConfig,
    segment_duration: Duration,
    state: Arc<Mutex<RecorderState>>,
    tasks: Mutex<Option<RunningTasks>>,
    writer_tx: mpsc::Sender<WriteRequest>,
    hub: HubHandle,
    registry: Arc<CameraRegistry>,
}

impl RecorderSupervisor {
    pub fn new(
        camera: CameraConfig,
        segment_duration: Duration,
        writer_tx: mpsc::Sender<WriteRequest>,
        hub: HubHandle,
        registry: Arc<CameraRegistry>,
    ) -> Self {
        Self {
            camera,
            segment_duration,
            state: Arc::new(Mutex::new(RecorderState::Stopped)),
            tasks: Mutex::new(None),
            writer_tx,
            hub,
            registry,
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock()
    }

    /// Start recording. A no-op when already `Running`.
    pub fn start(&self) {
        self.start_inner();
    }

    /// Stop recording. A no-op when already `Stopped`.
    pub fn stop(&self) {
        self.stop_inner(true);
    }

    /// `Stop` then `Start`, without the supervisor ever observably
    /// reporting `Stopped` in between — the reactor treats Restart as
    /// atomic.
    pub fn restart(&self) {
        self.stop_inner(false);
        self.start_inner();
    }

    fn start_inner(&self) {
        {
            let state = self.state.lock();
            if *state == RecorderState::Running {
                return;
            }
        }
        self.set_state(RecorderState::Starting);

        let (events_tx, events_rx) = mpsc::unbounded_channel::<LifecycleEvent>();
        let worker = CameraWorker::new(self.camera.id.clone(), self.writer_tx.clone());
        let worker_handle = worker.spawn(self.camera.clone(), self.segment_duration, events_tx);

        let state = self.state.clone();
        let hub = self.hub.clone();
        let registry = self.registry.clone();
        let camera_id = self.camera.id.clone();
        let driver_handle = tokio::spawn(Self::drive(camera_id, state, hub, registry, events_rx));

        *self.tasks.lock() = Some(RunningTasks { worker: worker_handle, driver: driver_handle });
    }

    fn stop_inner(&self, emit_stopped: bool) {
        {
            let state = self.state.lock();
            if *state == RecorderState::Stopped {
                return;
            }
        }
        self.set_state(RecorderState::Stopping);

        if let Some(tasks) = self.tasks.lock().take() {
            // The teacher's ingestion/connect tasks carry no cancellation
            // token of their own; abort is the only lever available short
            // of rewriting the GStreamer glue. Dropping the pipeline via
            // `CameraStream`'s `Drop` impl still stops it promptly.
            tasks.worker.abort();
            tasks.driver.abort();
        }

        if emit_stopped {
            self.set_state(RecorderState::Stopped);
        }
    }

    fn set_state(&self, new_state: RecorderState) {
        *self.state.lock() = new_state;
        let (fps, bitrate) = self
            .registry
            .get(&self.camera.id)
            .map(|e| (e.health.fps, e.health.bitrate))
            .unwrap_or((None, None));
        self.hub.publish_to_camera(
            &self.camera.id,
            HubMessage::camera_state(&self.camera.id, new_state.as_str(), fps, bitrate),
        );
        info!(camera = %self.camera.id, state = new_state.as_str(), "recorder state transition");
    }

    async fn drive(
        camera_id: String,
        state: Arc<Mutex<RecorderState>>,
        hub: HubHandle,
        registry: Arc<CameraRegistry>,
        mut events_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            match event {
                LifecycleEvent::Connected => {
                    let mut s = state.lock();
                    if *s != RecorderState::Running {
                        *s = RecorderState::Running;
                        drop(s);
                        Self::publish_transition(&camera_id, RecorderState::Running, &hub, &registry);
                    }
                }
                LifecycleEvent::Disconnected => {
                    debug!(camera = %camera_id, "stream disconnected, awaiting automatic reconnect");
                }
                LifecycleEvent::Failed => {
                    let mut s = state.lock();
                    *s = RecorderState::Failed;
                    drop(s);
                    Self::publish_transition(&camera_id, RecorderState::Failed, &hub, &registry);
                    return;
                }
            }
        }
    }

    fn publish_transition(camera_id: &str, new_state: RecorderState, hub: &HubHandle, registry: &CameraRegistry) {
        let (fps, bitrate) = registry.get(camera_id).map(|e| (e.health.fps, e.health.bitrate)).unwrap_or((None, None));
        hub.publish_to_camera(camera_id, HubMessage::camera_state(camera_id, new_state.as_str(), fps, bitrate));
        info!(camera = %camera_id, state = new_state.as_str(), "recorder state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn camera(id: &str) -> CameraConfig {
        CameraConfig { id: id.to_string(), name: id.to_string(), url: "rtsp://x".to_string(), max_reconnect_attempts: 0, enabled: true, detection: Default::default() }
    }

    fn supervisor(id: &str) -> RecorderSupervisor {
        let (tx, _rx) = mpsc::channel(8);
        let hub = crate::hub::spawn(CancellationToken::new()).0;
        RecorderSupervisor::new(camera(id), Duration::from_secs(60), tx, hub, Arc::new(CameraRegistry::new()))
    }

    #[test]
    fn initial_state_is_stopped() {
        let sup = supervisor("cam1");
        assert_eq!(sup.state(), RecorderState::Stopped);
    }

    #[test]
    fn stop_on_stopped_is_a_noop() {
        let sup = supervisor("cam1");
        sup.stop();
        assert_eq!(sup.state(), RecorderState::Stopped);
    }

    #[test]
    fn state_as_str_matches_spec_vocabulary() {
        assert_eq!(RecorderState::Stopped.as_str(), "stopped");
        assert_eq!(RecorderState::Starting.as_str(), "starting");
        assert_eq!(RecorderState::Running.as_str(), "running");
        assert_eq!(RecorderState::Stopping.as_str(), "stopping");
        assert_eq!(RecorderState::Failed.as_str(), "failed");
    }
}
