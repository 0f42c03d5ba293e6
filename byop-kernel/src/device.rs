//! Device model: devices, their pixels, health records and sightings.

use crate::geometry::{normalize, Bounds};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

/// Malformed pixel specification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Couldn't parse {}: {reason}", subject(.index))]
pub struct ParseError {
    /// Index of the offending pixel, `None` when the whole value is unusable.
    pub index: Option<usize>,
    pub reason: String,
}

fn subject(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!("pixel {i}"),
        None => "pixels".to_string(),
    }
}

/// Position brute d'un pixel, en unités locales au device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelLocation {
    pub x: f64,
    pub y: f64,
}

impl PixelLocation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One addressable LED with its derived normalized coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pixel {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "lX")]
    pub l_x: f64,
    #[serde(rename = "lY")]
    pub l_y: f64,
    #[serde(rename = "gX")]
    pub g_x: f64,
    #[serde(rename = "gY")]
    pub g_y: f64,
}

impl Pixel {
    /// Pixel at the given normalized coordinates, with a zero local offset.
    pub fn at(g_x: f64, g_y: f64, l_x: f64, l_y: f64) -> Self {
        Self { x: 0.0, y: 0.0, l_x, l_y, g_x, g_y }
    }
}

/// Corrections connues. Les `Byop*` se règlent en éditant le device local,
/// les `Wled*` et `LiveMode` en poussant une config au contrôleur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixId {
    LiveMode,
    WledPixelCount,
    WledPixelCountAndMode,
    ByopPixelCount,
    ByopPixelCountAndMode,
}

impl FixId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixId::LiveMode => "liveMode",
            FixId::WledPixelCount => "wledPixelCount",
            FixId::WledPixelCountAndMode => "wledPixelCountAndMode",
            FixId::ByopPixelCount => "byopPixelCount",
            FixId::ByopPixelCountAndMode => "byopPixelCountAndMode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            FixId::LiveMode,
            FixId::WledPixelCount,
            FixId::WledPixelCountAndMode,
            FixId::ByopPixelCount,
            FixId::ByopPixelCountAndMode,
        ]
        .into_iter()
        .find(|f| f.as_str() == s)
    }
}

/// Result of one diagnostics check. `fix_id: None` means informational only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub fix_id: Option<FixId>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_data: Option<u32>,
}

impl Finding {
    pub fn fix(fix_id: FixId, description: impl Into<String>) -> Self {
        Self { fix_id: Some(fix_id), description: description.into(), fix_data: None }
    }

    pub fn fix_with(fix_id: FixId, fix_data: u32, description: impl Into<String>) -> Self {
        Self { fix_id: Some(fix_id), description: description.into(), fix_data: Some(fix_data) }
    }

    pub fn info(description: impl Into<String>) -> Self {
        Self { fix_id: None, description: description.into(), fix_data: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub up: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_seen: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_up: Option<OffsetDateTime>,
    pub warnings: Vec<Finding>,
}

/// Host vu par la découverte mais pas encore enregistré.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sighting {
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_up: Option<OffsetDateTime>,
    pub up: bool,
}

impl From<&Sighting> for DeviceHealth {
    fn from(s: &Sighting) -> Self {
        Self {
            up: s.up,
            first_seen: Some(s.first_seen),
            last_up: s.last_up,
            warnings: Vec::new(),
        }
    }
}

/// One physical LED controller placed in the field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub host: Option<String>,
    pub pixels: Vec<Pixel>,
    /// Local bounding box over the pixel offsets.
    pub bounds: Bounds,
    pub health: DeviceHealth,
}

impl Device {
    /// Builds a device and computes its local normalization. Global
    /// coordinates are left at 0 until the registry places it in the field.
    pub fn new(id: u32, x: f64, y: f64, host: Option<String>, locations: Vec<PixelLocation>) -> Self {
        let mut device = Self {
            id,
            x,
            y,
            host,
            pixels: Vec::new(),
            bounds: Bounds::point(0.0, 0.0),
            health: DeviceHealth::default(),
        };
        device.set_pixels(locations);
        device
    }

    /// Remplace les pixels et recalcule boîte locale + coordonnées locales.
    pub fn set_pixels(&mut self, locations: Vec<PixelLocation>) {
        let locations = if locations.is_empty() {
            vec![PixelLocation::new(0.0, 0.0)]
        } else {
            locations
        };
        self.bounds = Bounds::enclosing(locations.iter().map(|p| (p.x, p.y)))
            .unwrap_or_else(|| Bounds::point(0.0, 0.0));

        let b = self.bounds;
        self.pixels = locations
            .into_iter()
            .map(|p| Pixel {
                x: p.x,
                y: p.y,
                l_x: normalize(p.x, b.min_x, b.max_x),
                l_y: normalize(p.y, b.min_y, b.max_y),
                g_x: 0.0,
                g_y: 0.0,
            })
            .collect();
    }

    /// Recomputes `gX, gY` of every pixel against the field bounds.
    pub fn place_in_field(&mut self, field: &Bounds) {
        let (g_x, g_y) = field.normalize(self.x, self.y);
        for pixel in &mut self.pixels {
            pixel.g_x = g_x;
            pixel.g_y = g_y;
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }
}

/// Parses the accepted pixel specification shapes.
///
/// `null` and `[]` give a single pixel at the local origin. Otherwise every
/// element must be `[x, y]`, `[x, y, z]` or an object with numeric `x` and `y`;
/// the third dimension is dropped since the field is mapped in 2D.
pub fn parse_pixels(spec: &Value) -> Result<Vec<PixelLocation>, ParseError> {
    let items = match spec {
        Value::Null => return Ok(vec![PixelLocation::new(0.0, 0.0)]),
        Value::Array(items) => items,
        other => {
            return Err(ParseError {
                index: None,
                reason: format!("expected an array, got {other}"),
            })
        }
    };

    if items.is_empty() {
        return Ok(vec![PixelLocation::new(0.0, 0.0)]);
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_pixel(index, item))
        .collect()
}

fn parse_pixel(index: usize, item: &Value) -> Result<PixelLocation, ParseError> {
    let fail = |reason: String| ParseError { index: Some(index), reason };

    match item {
        Value::Array(coords) => {
            if coords.len() == 3 {
                debug!("ignoring the 3rd dimension for pixel {index} as we only map in 2D");
            } else if coords.len() != 2 {
                return Err(fail(format!("expected 2 or 3 coordinates, got {item}")));
            }
            match (coords[0].as_f64(), coords[1].as_f64()) {
                (Some(x), Some(y)) => Ok(PixelLocation::new(x, y)),
                _ => Err(fail(format!("non-numeric coordinates {item}"))),
            }
        }
        Value::Object(map) => {
            if map.contains_key("z") {
                debug!("ignoring the 3rd dimension for pixel {index} as we only map in 2D");
            }
            match (map.get("x").and_then(Value::as_f64), map.get("y").and_then(Value::as_f64)) {
                (Some(x), Some(y)) => Ok(PixelLocation::new(x, y)),
                _ => Err(fail(format!("object without numeric x and y {item}"))),
            }
        }
        other => Err(fail(format!("unsupported pixel {other}"))),
    }
}
