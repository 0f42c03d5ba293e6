//! The two periodic loops: the pixel tick and the diagnostics poll.

use crate::diagnostics::Diagnostics;
use crate::health::HealthTracker;
use crate::state::SharedRegistry;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rend une frame toutes les `1/fps` secondes. Une frame en retard est
/// sautée, jamais rattrapée en rafale.
pub fn spawn_pixel_loop(registry: SharedRegistry, fps: u32, health: HealthTracker) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(frame_interval(fps));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("pixel loop started at {fps} fps");
        loop {
            interval.tick().await;
            let started = Instant::now();
            registry.lock().update_pixel_colors(now_millis());
            health.record_frame(started.elapsed());
        }
    })
}

/// Polls run to completion, then the loop sleeps for `every`: polls never
/// overlap.
pub fn spawn_diagnostics_loop(diagnostics: Diagnostics, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("diagnostics loop started, every {}s", every.as_secs());
        loop {
            let summary = diagnostics.poll_all().await;
            debug!("diagnostics poll: {} up, {} down", summary.up, summary.down);
            tokio::time::sleep(every).await;
        }
    })
}
