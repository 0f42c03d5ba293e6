/**
 * DIAGNOSTICS - Santé et configuration des contrôleurs du champ
 *
 * RÔLE :
 * Interroge périodiquement chaque device (GET /json/info + /json/cfg),
 * met à jour son état up/down et ses findings, et applique les corrections
 * demandées par l'utilisateur.
 *
 * FONCTIONNEMENT :
 * - snapshot (id, host, nb pixels) sous le verrou, puis verrou relâché
 * - tous les devices interrogés en parallèle (join_all), chaque échec isolé
 * - reprise du verrou pour appliquer les résultats ; un device re-dimensionné
 *   pendant le poll garde son état, le résultat est jeté
 * - une correction réussie relance un poll du device
 */

pub mod classify;
pub mod wled;

pub use classify::{classify, DmxMode, RemoteStatus};
pub use wled::WledClient;

use crate::device::{DeviceHealth, FixId, Finding};
use crate::e131::E131_PORT;
use crate::registry::DeviceRegistry;
use crate::state::SharedRegistry;
use futures::future::join_all;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("device {0} not found")]
    NotFound(u32),
    #[error("device {0} has no host")]
    NoHost(u32),
    #[error("device at {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },
    #[error("cannot fix device {id}: {reason}")]
    Config { id: u32, reason: String },
    #[error("device at {0} rejected the configuration")]
    Rejected(String),
}

/// Ce qu'il faut interroger, copié hors du verrou.
#[derive(Debug, Clone)]
struct Target {
    id: u32,
    host: Option<String>,
    pixel_count: usize,
}

#[derive(Debug)]
pub enum Outcome {
    Up(Vec<Finding>),
    Down,
    NoHost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub up: usize,
    pub down: usize,
}

/// Applies one poll result to a health record. `last_up` only moves on a
/// down -> up transition.
pub fn apply_outcome(health: &mut DeviceHealth, outcome: Outcome, now: OffsetDateTime) {
    match outcome {
        Outcome::Up(findings) => {
            if !health.up {
                health.last_up = Some(now);
                health.first_seen.get_or_insert(now);
            }
            health.up = true;
            health.warnings = findings;
        }
        Outcome::Down | Outcome::NoHost => {
            health.up = false;
            health.warnings.clear();
        }
    }
}

/// Applies a poll result unless the device is gone or its pixel count
/// changed since `target` was taken.
fn apply_if_current(registry: &mut DeviceRegistry, target: &Target, outcome: Outcome, now: OffsetDateTime) -> bool {
    let current = registry.device(target.id).map(|d| d.pixel_count());
    if current != Some(target.pixel_count) {
        debug!("device {}: changed during poll, result dropped", target.id);
        return false;
    }
    match registry.health_mut(target.id) {
        Some(health) => {
            apply_outcome(health, outcome, now);
            true
        }
        None => false,
    }
}

#[derive(Clone)]
pub struct Diagnostics {
    registry: SharedRegistry,
    client: WledClient,
}

impl Diagnostics {
    pub fn new(registry: SharedRegistry, client: WledClient) -> Self {
        Self { registry, client }
    }

    /// Polls every registered device once.
    pub async fn poll_all(&self) -> PollSummary {
        let targets: Vec<Target> = {
            let registry = self.registry.lock();
            registry
                .registered_devices()
                .iter()
                .map(|d| Target { id: d.id, host: d.host.clone(), pixel_count: d.pixel_count() })
                .collect()
        };

        let outcomes = join_all(targets.iter().map(|t| self.check(t))).await;

        let now = OffsetDateTime::now_utc();
        let mut summary = PollSummary::default();
        let mut registry = self.registry.lock();
        for (target, outcome) in targets.iter().zip(outcomes) {
            if matches!(outcome, Outcome::Up(_)) {
                summary.up += 1;
            } else {
                summary.down += 1;
            }
            apply_if_current(&mut registry, target, outcome, now);
        }
        summary
    }

    /// Polls one device and returns its updated health record.
    pub async fn poll_device(&self, id: u32) -> Result<DeviceHealth, DiagnosticsError> {
        let target = self.target(id)?;
        let outcome = self.check(&target).await;
        let mut registry = self.registry.lock();
        apply_if_current(&mut registry, &target, outcome, OffsetDateTime::now_utc());
        let device = registry.device(id).ok_or(DiagnosticsError::NotFound(id))?;
        Ok(device.health.clone())
    }

    /// Enables E1.31 receive on the standard port, in the DMX mode matching
    /// the device's pixel count.
    pub async fn fix_live_mode(&self, id: u32) -> Result<(), DiagnosticsError> {
        let (host, pixel_count) = self.host_of(id)?;
        let body = json!({
            "if": {"live": {
                "en": true,
                "port": E131_PORT,
                "dmx": {"mode": DmxMode::wled_code_for(pixel_count)}
            }}
        });
        self.client.post_cfg(&host, &body).await?;
        info!("device {id}: live mode fixed");
        self.poll_device(id).await?;
        Ok(())
    }

    /// Sets the controller's LED count to the device's pixel count. Only
    /// possible with exactly one physical output.
    pub async fn fix_wled_pixel_count(&self, id: u32) -> Result<(), DiagnosticsError> {
        let (host, pixel_count) = self.host_of(id)?;
        let cfg = self.client.cfg(&host).await?;
        let [input] = cfg.hw.led.ins.as_slice() else {
            return Err(DiagnosticsError::Config {
                id,
                reason: format!("expected exactly one LED output, found {}", cfg.hw.led.ins.len()),
            });
        };
        let body = json!({"hw": {"led": {"ins": [{"pin": input.pin.clone(), "len": pixel_count}]}}});
        self.client.post_cfg(&host, &body).await?;
        info!("device {id}: LED count set to {pixel_count}");
        self.poll_device(id).await?;
        Ok(())
    }

    pub async fn apply_fix(&self, id: u32, fix: FixId) -> Result<(), DiagnosticsError> {
        match fix {
            FixId::LiveMode => self.fix_live_mode(id).await,
            FixId::WledPixelCount => self.fix_wled_pixel_count(id).await,
            FixId::WledPixelCountAndMode => {
                self.fix_wled_pixel_count(id).await?;
                self.fix_live_mode(id).await
            }
            FixId::ByopPixelCount | FixId::ByopPixelCountAndMode => Err(DiagnosticsError::Config {
                id,
                reason: format!("{} is fixed by editing the device's pixels", fix.as_str()),
            }),
        }
    }

    async fn check(&self, target: &Target) -> Outcome {
        let Some(host) = target.host.as_deref() else {
            return Outcome::NoHost;
        };
        match self.client.status(host).await {
            Ok(status) => Outcome::Up(classify(&status, target.pixel_count)),
            Err(e) => {
                debug!("device {}: {e}", target.id);
                Outcome::Down
            }
        }
    }

    fn target(&self, id: u32) -> Result<Target, DiagnosticsError> {
        let registry = self.registry.lock();
        let device = registry.device(id).ok_or(DiagnosticsError::NotFound(id))?;
        Ok(Target { id, host: device.host.clone(), pixel_count: device.pixel_count() })
    }

    fn host_of(&self, id: u32) -> Result<(String, usize), DiagnosticsError> {
        let target = self.target(id)?;
        let host = target.host.ok_or(DiagnosticsError::NoHost(id))?;
        Ok((host, target.pixel_count))
    }
}
