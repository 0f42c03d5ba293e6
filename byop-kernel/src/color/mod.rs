/**
 * SOURCES DE COULEUR - Calcul de la couleur de chaque pixel à chaque frame
 *
 * RÔLE :
 * Une source reçoit les coordonnées normalisées d'un pixel (gX, gY, lX, lY)
 * et un timestamp, et renvoie une couleur RGB dans [0,1].
 *
 * VARIANTES :
 * - RainbowSource : générateur procédural (arc-en-ciel qui traverse le champ)
 * - GridSource : interpolation bilinéaire d'une grille reçue en E1.31
 *
 * CONTRAINTE : tout est local et en mémoire, le tick couleur ne bloque jamais.
 */

pub mod grid;
pub mod rainbow;

pub use grid::{Grid, GridFeed, GridSource};
pub use rainbow::RainbowSource;

use crate::device::Pixel;
use serde::Serialize;

/// Per-pixel color failure. Isolated by the registry: logged, never fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("color computation failed for device {device_id} pixel {pixel_index}: {reason}")]
pub struct ColorComputeError {
    pub device_id: u32,
    pub pixel_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0.0, g: 0.0, b: 0.0 };

    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }

    /// Valeurs de canal sur 8 bits : `round(c * 255)`, bornées à [0, 255].
    pub fn to_channels(&self) -> [u8; 3] {
        [to_channel(self.r), to_channel(self.g), to_channel(self.b)]
    }
}

fn to_channel(c: f64) -> u8 {
    (c * 255.0).round().clamp(0.0, 255.0) as u8
}

/// A pluggable per-pixel color generator.
pub trait ColorSource: Send + Sync {
    /// Label echoed to telemetry consumers.
    fn source(&self) -> &'static str;

    fn calculate(
        &self,
        timestamp_ms: u64,
        pixel: &Pixel,
        device_id: u32,
        pixel_index: usize,
    ) -> Result<Rgb, ColorComputeError>;
}

/// HSL -> RGB, all components in [0, 1].
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> Rgb {
    if s == 0.0 {
        // achromatique
        return Rgb::new(l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    Rgb::new(
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 0.5 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}
