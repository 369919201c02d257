// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Recording manager: owns the global chunk pool writer and its segment
//! index. Per-camera ingestion is no longer spawned here — the config
//! reactor (`reactor::Reactor`) starts and stops one `RecorderSupervisor`
//! per enabled camera, and each supervisor drives its own `CameraWorker`
//! against the `writer_tx` this manager hands out.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{NvrError, Result};
use crate::storage::chunk_pool::ChunkPool;
use crate::storage::global_writer::{self, SharedIndex, WriteRequest};

/// Owns the single global chunk writer shared by every camera's recorder.
pub struct RecordingManager {
    writer_handle: JoinHandle<()>,
    pub index: SharedIndex,
    pub writer_tx: mpsc::Sender<WriteRequest>,
    pub segment_duration: Duration,
}

impl RecordingManager {
    /// Create the manager from a validated [`Config`]. Opens the chunk
    /// pool and spawns the single global writer task; callers then clone
    /// `writer_tx` into each camera's `RecorderSupervisor`.
    pub fn new(config: &Config) -> Result<Self> {
        let base = &config.storage.base_path;
        std::fs::create_dir_all(base)
            .map_err(|e| NvrError::Storage(format!("Cannot create base_path: {e}")))?;

        let pool_bytes = config.storage.chunk_size_mb * 1024 * 1024;
        let segment_duration = Duration::from_secs(config.storage.segment_duration_secs);

        let pool = ChunkPool::open(base, pool_bytes, config.storage.max_pools)?;
        let (writer_tx, index, writer_handle) = global_writer::spawn_writer(pool, config.storage.writer_queue_size);

        info!(
            pools = config.storage.max_pools,
            pool_size_mb = config.storage.chunk_size_mb,
            queue = config.storage.writer_queue_size,
            "Global chunk writer started"
        );

        Ok(RecordingManager { writer_handle, index, writer_tx, segment_duration })
    }

    /// Drop the writer sender so the writer task drains and exits, then
    /// wait for it. Camera supervisors must already be stopped by the
    /// caller (the reactor) before this runs.
    pub async fn shutdown(self) {
        drop(self.writer_tx);
        let _ = self.writer_handle.await;
        info!("Global writer stopped");
    }
}
