//! Coordinate model: bounding boxes and normalization into the unit square.
//!
//! Pure data and functions, no I/O. Every normalized coordinate in the kernel
//! goes through [`normalize`] so the degenerate-axis rule lives in one place.

use serde::{Deserialize, Serialize};

/// Axis-aligned box `(min_x, max_x, min_y, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Box reduced to a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self { min_x: x, max_x: x, min_y: y, max_y: y }
    }

    /// Smallest box enclosing every point, `None` for an empty iterator.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points
            .into_iter()
            .fold(None, |acc: Option<Bounds>, (x, y)| match acc {
                None => Some(Bounds::point(x, y)),
                Some(b) => Some(b.extend(x, y)),
            })
    }

    pub fn extend(self, x: f64, y: f64) -> Self {
        Self {
            min_x: self.min_x.min(x),
            max_x: self.max_x.max(x),
            min_y: self.min_y.min(y),
            max_y: self.max_y.max(y),
        }
    }

    /// Ramène un point dans la boîte (mode champ statique).
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        // pas f64::clamp : il panique si min > max
        (x.max(self.min_x).min(self.max_x), y.max(self.min_y).min(self.max_y))
    }

    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Position normalisée `(nx, ny)` d'un point dans la boîte.
    pub fn normalize(&self, x: f64, y: f64) -> (f64, f64) {
        (
            normalize(x, self.min_x, self.max_x),
            normalize(y, self.min_y, self.max_y),
        )
    }
}

/// Maps `value` from `[min, max]` to `[0, 1]`; a degenerate axis maps to 0.5.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max == min {
        0.5
    } else {
        (value - min) / (max - min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_points() {
        let b = Bounds::enclosing(vec![(1.0, 1.0), (11.0, 11.0), (6.0, 6.0), (3.0, 10.0)]).unwrap();
        assert_eq!(b, Bounds { min_x: 1.0, max_x: 11.0, min_y: 1.0, max_y: 11.0 });
        assert!(Bounds::enclosing(Vec::new()).is_none());
    }

    #[test]
    fn test_normalize_degenerate_axis() {
        assert_eq!(normalize(3.0, 3.0, 3.0), 0.5);
        assert_eq!(normalize(3.0, 1.0, 11.0), 0.2);
        assert_eq!(normalize(1.0, 1.0, 11.0), 0.0);
    }

    #[test]
    fn test_clamp_inverted_box_does_not_panic() {
        let b = Bounds { min_x: 0.0, max_x: 10.0, min_y: 0.0, max_y: 5.0 };
        assert_eq!(b.clamp(-4.0, 9.0), (0.0, 5.0));
        assert_eq!(b.clamp(4.0, 2.0), (4.0, 2.0));

        let inverted = Bounds { min_x: 1.0, max_x: 0.0, min_y: 0.0, max_y: 0.0 };
        assert!(!inverted.is_valid());
        let _ = inverted.clamp(0.5, 0.0);
    }
}
