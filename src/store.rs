//! Event and zone store collaborators.
//!
//! Persistent storage for events and dynamic zones is an opaque
//! repository accessed only through these traits' call surface; the
//! in-memory implementations stand in for a real database, kept separate
//! from the video chunk-pool storage engine in `storage/`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;
use crate::zone::Zone;

/// A persisted, broadcast-worthy detection that passed zone gates.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: String,
    pub camera_id: String,
    pub event_type: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub metadata: Value,
}

/// Persists Events produced by the detection pipeline (B). Out of scope
/// as an implementation; this crate only calls through the trait.
pub trait EventStore: Send + Sync {
    fn persist(&self, event: Event) -> Result<()>;
    fn recent(&self, camera_id: &str, limit: usize) -> Vec<Event>;
}

/// Supplies the dynamic half of a camera's effective zone set — the
/// static half comes from `Config::zones`.
pub trait ZoneStore: Send + Sync {
    fn zones_for(&self, camera_id: &str) -> Vec<Zone>;
}

/// In-memory stand-in for the real event store. Bounded per camera to
/// avoid unbounded growth in a process that otherwise never restarts.
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, Vec<Event>>>,
    cap_per_camera: usize,
}

impl InMemoryEventStore {
    pub fn new(cap_per_camera: usize) -> Self {
        Self { events: RwLock::new(HashMap::new()), cap_per_camera }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventStore for InMemoryEventStore {
    fn persist(&self, event: Event) -> Result<()> {
        let mut events = self.events.write();
        let bucket = events.entry(event.camera_id.clone()).or_default();
        bucket.push(event);
        if bucket.len() > self.cap_per_camera {
            let overflow = bucket.len() - self.cap_per_camera;
            bucket.drain(0..overflow);
        }
        Ok(())
    }

    fn recent(&self, camera_id: &str, limit: usize) -> Vec<Event> {
        let events = self.events.read();
        match events.get(camera_id) {
            Some(bucket) => bucket.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// In-memory stand-in for the dynamic zone store (e.g. zones created
/// through an operator-facing API at runtime, as opposed to the static
/// config file).
pub struct InMemoryZoneStore {
    zones: RwLock<HashMap<String, Vec<Zone>>>,
}

impl InMemoryZoneStore {
    pub fn new() -> Self {
        Self { zones: RwLock::new(HashMap::new()) }
    }

    pub fn upsert(&self, zone: Zone) {
        let mut zones = self.zones.write();
        let bucket = zones.entry(zone.camera_id.clone()).or_default();
        bucket.retain(|z| z.id != zone.id);
        bucket.push(zone);
    }

    pub fn remove(&self, camera_id: &str, zone_id: &str) {
        if let Some(bucket) = self.zones.write().get_mut(camera_id) {
            bucket.retain(|z| z.id != zone_id);
        }
    }
}

impl Default for InMemoryZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneStore for InMemoryZoneStore {
    fn zones_for(&self, camera_id: &str) -> Vec<Zone> {
        self.zones.read().get(camera_id).cloned().unwrap_or_default()
    }
}

/// The two store collaborators bundled for convenient threading through
/// the composition root.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub zones: Arc<dyn ZoneStore>,
}

impl Default for Stores {
    fn default() -> Self {
        Self { events: Arc::new(InMemoryEventStore::default()), zones: Arc::new(InMemoryZoneStore::default()) }
    }
}
