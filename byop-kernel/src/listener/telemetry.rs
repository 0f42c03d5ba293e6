//! Live telemetry: the whole field's colors, published once per frame.
//!
//! Writes go to a private frame; `finished_updating_devices` publishes it with
//! one pointer swap so readers (`/api/pixelData`, the websocket feed) only ever
//! see complete frames.

use super::PixelListener;
use crate::color::Rgb;
use crate::device::{Device, Pixel};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryFrame {
    pub source: String,
    pub devices: BTreeMap<u32, TelemetryDevice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDevice {
    pub x: f64,
    pub y: f64,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub pixels: BTreeMap<usize, TelemetryPixel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPixel {
    pub x: f64,
    pub y: f64,
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// Côté lecture : dernière frame publiée + abonnement au flux.
#[derive(Clone)]
pub struct TelemetryFeed {
    published: Arc<ArcSwap<TelemetryFrame>>,
    updates: broadcast::Sender<Arc<TelemetryFrame>>,
}

impl TelemetryFeed {
    pub fn snapshot(&self) -> Arc<TelemetryFrame> {
        self.published.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetryFrame>> {
        self.updates.subscribe()
    }
}

pub struct TelemetryListener {
    write: TelemetryFrame,
    published: Arc<ArcSwap<TelemetryFrame>>,
    updates: broadcast::Sender<Arc<TelemetryFrame>>,
}

impl TelemetryListener {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            write: TelemetryFrame::default(),
            published: Arc::new(ArcSwap::from_pointee(TelemetryFrame::default())),
            updates,
        }
    }

    pub fn feed(&self) -> TelemetryFeed {
        TelemetryFeed { published: self.published.clone(), updates: self.updates.clone() }
    }
}

impl Default for TelemetryListener {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelListener for TelemetryListener {
    fn started_updating_devices(&mut self, source: &str) {
        self.write.source.clear();
        self.write.source.push_str(source);
        self.write.devices.clear();
    }

    fn update_pixel_color(&mut self, device_id: u32, pixel_index: usize, color: Rgb, device: &Device, pixel: &Pixel) {
        let entry = self.write.devices.entry(device_id).or_insert_with(|| TelemetryDevice {
            x: device.x,
            y: device.y,
            min_x: device.bounds.min_x,
            max_x: device.bounds.max_x,
            min_y: device.bounds.min_y,
            max_y: device.bounds.max_y,
            pixels: BTreeMap::new(),
        });
        entry.pixels.insert(
            pixel_index,
            TelemetryPixel { x: pixel.x, y: pixel.y, r: color.r, g: color.g, b: color.b },
        );
    }

    fn finished_updating_devices(&mut self) {
        let frame = Arc::new(std::mem::take(&mut self.write));
        let previous = self.published.swap(frame.clone());
        // pas d'abonné : send échoue, rien à faire
        let _ = self.updates.send(frame);
        // l'ancienne frame redevient le buffer d'écriture si plus personne ne la lit
        self.write = Arc::try_unwrap(previous).unwrap_or_default();
    }
}
