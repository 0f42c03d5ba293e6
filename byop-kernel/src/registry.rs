/**
 * DEVICE REGISTRY - Cœur du champ de pixels
 *
 * RÔLE :
 * Possède les devices, les bornes du champ, les hosts aperçus mais pas
 * encore enregistrés, la source de couleur, le listener et le store.
 *
 * FONCTIONNEMENT :
 * - register/update : parse des pixels, bornes, normalisation, notification, persistance
 * - champ dynamique : bornes = min/max des positions, tout est renormalisé si elles bougent
 * - champ statique : bornes fixes, positions ramenées dans la boîte
 * - update_pixel_colors : un tick de rendu complet (source -> listener)
 *
 * CONCURRENCE : un seul écrivain, partagé en Arc<Mutex<_>> (voir state.rs).
 * Aucune méthode n'est async : le verrou n'est jamais tenu à travers un await.
 */

use crate::color::{ColorSource, Rgb};
use crate::device::{parse_pixels, Device, DeviceHealth, ParseError, PixelLocation, Sighting};
use crate::geometry::Bounds;
use crate::listener::PixelListener;
use crate::store::{DeviceRecord, DeviceStore, StoreError};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("host {0} already belongs to a registered device")]
    DuplicateHost(String),
    #[error("device {0} not found")]
    NotFound(u32),
}

/// Fixed for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldMode {
    Dynamic,
    Static(Bounds),
}

pub struct DeviceRegistry {
    devices: Vec<Device>,
    unregistered: BTreeMap<String, Sighting>,
    mode: FieldMode,
    bounds: Option<Bounds>,
    next_id: u32,
    source: Box<dyn ColorSource>,
    listener: Box<dyn PixelListener>,
    store: Box<dyn DeviceStore>,
    /// (device, pixel) en erreur à la frame précédente : warn une seule fois.
    failing: HashSet<(u32, usize)>,
}

impl DeviceRegistry {
    pub fn new(
        mode: FieldMode,
        source: Box<dyn ColorSource>,
        listener: Box<dyn PixelListener>,
        store: Box<dyn DeviceStore>,
    ) -> Self {
        let bounds = match mode {
            FieldMode::Dynamic => None,
            FieldMode::Static(b) => Some(b),
        };
        Self {
            devices: Vec::new(),
            unregistered: BTreeMap::new(),
            mode,
            bounds,
            next_id: 0,
            source,
            listener,
            store,
            failing: HashSet::new(),
        }
    }

    pub fn register_device(&mut self, x: f64, y: f64, host: Option<String>, pixel_spec: &Value) -> Result<u32, RegistryError> {
        let locations = parse_pixels(pixel_spec)?;
        if let Some(h) = host.as_deref() {
            if self.host_taken(h) {
                return Err(RegistryError::DuplicateHost(h.to_string()));
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let index = self.insert(id, x, y, host, locations);
        info!("registered device {id} ({} pixels)", self.devices[index].pixel_count());
        self.persist(index);
        Ok(id)
    }

    /// Moves and/or re-shapes a device. Host and health are kept.
    pub fn update_device(&mut self, id: u32, x: f64, y: f64, pixel_spec: &Value) -> Result<(), RegistryError> {
        let locations = parse_pixels(pixel_spec)?;
        let index = self.index_of(id).ok_or(RegistryError::NotFound(id))?;
        let (x, y) = self.place(x, y);

        let device = &mut self.devices[index];
        device.x = x;
        device.y = y;
        device.set_pixels(locations);
        self.refresh_field(index);
        self.failing.retain(|(device_id, _)| *device_id != id);

        let device = &self.devices[index];
        self.listener.new_device(id, device.host.as_deref(), device.pixel_count());
        debug!("updated device {id}");
        self.persist(index);
        Ok(())
    }

    /// Re-registers every stored device under its stored id. Returns how
    /// many were restored.
    pub fn restore(&mut self) -> Result<usize, StoreError> {
        let records = self.store.load()?;
        let mut restored = 0;
        for record in records {
            let locations = match parse_pixels(&record.pixels) {
                Ok(l) => l,
                Err(e) => {
                    warn!("skipping stored device {}: {e}", record.id);
                    continue;
                }
            };
            if self.index_of(record.id).is_some() {
                warn!("skipping stored device {}: id already restored", record.id);
                continue;
            }
            if let Some(h) = record.host.as_deref() {
                if self.host_taken(h) {
                    warn!("skipping stored device {}: host {h} already registered", record.id);
                    continue;
                }
            }
            self.insert(record.id, record.x, record.y, record.host, locations);
            self.next_id = self.next_id.max(record.id.saturating_add(1));
            restored += 1;
        }
        info!("restored {restored} devices from store");
        Ok(restored)
    }

    pub fn shutdown(&mut self) {
        match self.store.shutdown() {
            Ok(()) => info!("device store shut down"),
            Err(e) => warn!("device store shutdown failed: {e}"),
        }
    }

    pub fn device(&self, id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Registration order.
    pub fn registered_devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn unregistered_devices(&self) -> &BTreeMap<String, Sighting> {
        &self.unregistered
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// `None` in dynamic mode until the first device is registered.
    pub fn field_bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn source_label(&self) -> &'static str {
        self.source.source()
    }

    pub fn health_mut(&mut self, id: u32) -> Option<&mut DeviceHealth> {
        self.devices.iter_mut().find(|d| d.id == id).map(|d| &mut d.health)
    }

    pub fn mark_device_up(&mut self, host: &str) {
        self.sighting_up(host, OffsetDateTime::now_utc());
    }

    pub fn mark_device_down(&mut self, host: &str) {
        self.sighting_down(host, OffsetDateTime::now_utc());
    }

    fn sighting_up(&mut self, host: &str, now: OffsetDateTime) {
        if self.host_taken(host) {
            return;
        }
        let sighting = self.unregistered.entry(host.to_string()).or_insert_with(|| {
            info!("new unregistered device up: {host}");
            Sighting { first_seen: now, last_up: None, up: true }
        });
        sighting.last_up = Some(now);
        sighting.up = true;
    }

    fn sighting_down(&mut self, host: &str, now: OffsetDateTime) {
        if self.host_taken(host) {
            return;
        }
        let sighting = self
            .unregistered
            .entry(host.to_string())
            .or_insert_with(|| Sighting { first_seen: now, last_up: None, up: false });
        sighting.last_up = None;
        sighting.up = false;
    }

    /// Un tick : une couleur par pixel, dans l'ordre d'enregistrement.
    /// Un pixel en erreur passe en noir pour cette frame. L'erreur est
    /// signalée en warn à la première frame, en debug ensuite.
    pub fn update_pixel_colors(&mut self, timestamp_ms: u64) {
        let Self { devices, source, listener, failing, .. } = self;
        listener.started_updating_devices(source.source());
        for device in devices.iter() {
            for (index, pixel) in device.pixels.iter().enumerate() {
                let color = match source.calculate(timestamp_ms, pixel, device.id, index) {
                    Ok(color) => {
                        if !failing.is_empty() && failing.remove(&(device.id, index)) {
                            debug!("pixel {index} of device {} recovered", device.id);
                        }
                        color
                    }
                    Err(e) => {
                        if failing.insert((device.id, index)) {
                            warn!("{e}");
                        } else {
                            debug!("{e}");
                        }
                        Rgb::BLACK
                    }
                };
                listener.update_pixel_color(device.id, index, color, device, pixel);
            }
            listener.finished_updating_device(device.id);
        }
        listener.finished_updating_devices();
    }

    fn host_taken(&self, host: &str) -> bool {
        self.devices.iter().any(|d| d.host.as_deref() == Some(host))
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.devices.iter().position(|d| d.id == id)
    }

    /// Static mode clamps positions into the configured box.
    fn place(&self, x: f64, y: f64) -> (f64, f64) {
        match self.mode {
            FieldMode::Dynamic => (x, y),
            FieldMode::Static(b) => b.clamp(x, y),
        }
    }

    fn insert(&mut self, id: u32, x: f64, y: f64, host: Option<String>, locations: Vec<PixelLocation>) -> usize {
        let (x, y) = self.place(x, y);
        let mut device = Device::new(id, x, y, host, locations);
        if let Some(sighting) = device.host.as_deref().and_then(|h| self.unregistered.remove(h)) {
            device.health = DeviceHealth::from(&sighting);
        }
        self.devices.push(device);
        let index = self.devices.len() - 1;
        self.refresh_field(index);

        let device = &self.devices[index];
        self.listener.new_device(id, device.host.as_deref(), device.pixel_count());
        index
    }

    /// Recalcule les bornes après un changement du device `index`.
    /// Si elles bougent, tous les devices sont renormalisés.
    fn refresh_field(&mut self, index: usize) {
        if let FieldMode::Dynamic = self.mode {
            let bounds = Bounds::enclosing(self.devices.iter().map(|d| (d.x, d.y)));
            if bounds != self.bounds {
                self.bounds = bounds;
                if let Some(b) = bounds {
                    debug!("field bounds changed to {b:?}, renormalizing {} devices", self.devices.len());
                    for device in &mut self.devices {
                        device.place_in_field(&b);
                    }
                }
                return;
            }
        }
        if let Some(b) = self.bounds {
            self.devices[index].place_in_field(&b);
        }
    }

    fn persist(&mut self, index: usize) {
        let record = DeviceRecord::from(&self.devices[index]);
        if let Err(e) = self.store.save(&record) {
            warn!("could not persist device {}: {e}", record.id);
        }
    }
}
