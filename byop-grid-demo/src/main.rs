/**
 * BYOP GRID DEMO - Émetteur E1.31 de démonstration
 *
 * RÔLE : Envoie un arc-en-ciel échantillonné sur une grille 13x13 vers un
 * kernel configuré avec `render.source: grid`.
 *
 * VARIABLES :
 * - BYOP_TARGET : hôte du kernel (défaut 127.0.0.1)
 * - BYOP_DEMO_DURATION : durée d'émission, format humantime ("30s", "5m").
 *   Absente : tourne jusqu'au ctrl-c.
 */

use anyhow::Context;
use byop_kernel::color::rainbow::spatial_rainbow;
use byop_kernel::e131::{DataPacket, FrameSink, UdpSink, DEFAULT_UNIVERSE};
use byop_kernel::resolver::spawn_resolver;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

const ROWS: usize = 13;
const COLS: usize = 13;
const FPS: u64 = 30;
const SOURCE_NAME: &str = "BYOP-demo-dmx";
const CID: [u8; 16] = *b"byop-grid-demo\0\0";

/// Rangées du sud vers le nord, colonnes d'ouest en est, RGB par cellule.
fn render_grid(packet: &mut DataPacket, timestamp_ms: u64) {
    for row in 0..ROWS {
        for col in 0..COLS {
            let g_x = col as f64 / (COLS - 1) as f64;
            let g_y = row as f64 / (ROWS - 1) as f64;
            let rgb = spatial_rainbow(timestamp_ms, g_x, g_y, 0.0, 0.0).to_channels();
            let offset = (row * COLS + col) * 3;
            packet.slots[offset..offset + 3].copy_from_slice(&rgb);
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let target = std::env::var("BYOP_TARGET").unwrap_or_else(|_| "127.0.0.1".into());
    let duration = match std::env::var("BYOP_DEMO_DURATION") {
        Ok(raw) => Some(humantime::parse_duration(&raw).with_context(|| format!("BYOP_DEMO_DURATION={raw}"))?),
        Err(_) => None,
    };

    let mut sink = UdpSink::bind().context("binding UDP socket")?;
    // un nom d'hôte est résolu en tâche de fond, les premières trames partent dans le vide
    spawn_resolver(sink.hosts());
    let mut packet = DataPacket::new(CID, SOURCE_NAME, DEFAULT_UNIVERSE, ROWS * COLS * 3);
    info!("streaming {ROWS}x{COLS} rainbow to {target} at {FPS} fps");

    let started = Instant::now();
    let mut frames: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / FPS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        if duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }

        render_grid(&mut packet, now_millis());
        let bytes = packet.encode()?;
        if let Err(e) = sink.send(&target, &bytes) {
            debug!("send to {target} failed: {e}");
        }
        packet.advance_sequence();
        frames += 1;
    }

    info!("sent {frames} frames");
    Ok(())
}
