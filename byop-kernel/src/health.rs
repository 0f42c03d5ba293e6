use crate::state::SharedRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub frames_rendered: u64,
    pub last_frame_micros: u64,
    pub grid_frames_received: u64,
    pub last_grid_ingest_micros: u64,
    pub color_source: &'static str,
    pub devices_registered: u32,
    pub devices_up: u32,
    pub devices_unregistered: u32,
    pub memory_usage_mb: f32,
    pub discovery_status: String,
    pub discovery_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    frames: Arc<AtomicU64>,
    last_frame_micros: Arc<AtomicU64>,
    grid_frames: Arc<AtomicU64>,
    last_grid_ingest_micros: Arc<AtomicU64>,
    discovery_reconnects: Arc<AtomicU32>,
    discovery_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames: Arc::new(AtomicU64::new(0)),
            last_frame_micros: Arc::new(AtomicU64::new(0)),
            grid_frames: Arc::new(AtomicU64::new(0)),
            last_grid_ingest_micros: Arc::new(AtomicU64::new(0)),
            discovery_reconnects: Arc::new(AtomicU32::new(0)),
            discovery_status: Arc::new(parking_lot::Mutex::new("disabled".to_string())),
        }
    }

    /// Appelé par le tick de rendu après chaque frame.
    pub fn record_frame(&self, took: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.last_frame_micros.store(took.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Appelé par le récepteur sACN après chaque trame appliquée à la grille.
    pub fn record_grid_frame(&self, took: Duration) {
        self.grid_frames.fetch_add(1, Ordering::Relaxed);
        self.last_grid_ingest_micros.store(took.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn grid_frames_received(&self) -> u64 {
        self.grid_frames.load(Ordering::Relaxed)
    }

    pub fn mark_discovery_connecting(&self) {
        *self.discovery_status.lock() = "connecting".to_string();
    }

    pub fn mark_discovery_connected(&self) {
        *self.discovery_status.lock() = "connected".to_string();
    }

    pub fn mark_discovery_disconnected(&self) {
        *self.discovery_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.discovery_reconnects.fetch_add(1, Ordering::Relaxed);
        self.mark_discovery_disconnected();
    }

    pub fn get_health(&self, registry: &SharedRegistry) -> KernelHealth {
        let (color_source, registered, up, unregistered) = {
            let registry = registry.lock();
            let devices = registry.registered_devices();
            (
                registry.source_label(),
                devices.len() as u32,
                devices.iter().filter(|d| d.health.up).count() as u32,
                registry.unregistered_devices().len() as u32,
            )
        };

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            frames_rendered: self.frames_rendered(),
            last_frame_micros: self.last_frame_micros.load(Ordering::Relaxed),
            grid_frames_received: self.grid_frames_received(),
            last_grid_ingest_micros: self.last_grid_ingest_micros.load(Ordering::Relaxed),
            color_source,
            devices_registered: registered,
            devices_up: up,
            devices_unregistered: unregistered,
            memory_usage_mb: get_memory_usage_mb(),
            discovery_status: self.discovery_status.lock().clone(),
            discovery_reconnects: self.discovery_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
