//! Grid-interpolated color source.
//!
//! The grid is fed from outside (E1.31 frames) through a [`GridFeed`] and read
//! by the color tick through an atomic pointer, so a frame arriving mid-tick
//! never tears the grid.

use super::{ColorComputeError, ColorSource, Rgb};
use crate::device::Pixel;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::warn;

/// Local position is exaggerated relative to physical scale so the internal
/// layout of a device stays visible.
const LOCAL_WEIGHT: f64 = 0.2;
const DEMO_SOURCE_NAME: &str = "BYOP-demo-dmx";
/// A full DMX universe; senders often pad to it.
const FULL_UNIVERSE: usize = 512;

/// `rows x cols` samples, row-major, row 0 at the south edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<[f64; 3]>,
    source: String,
}

impl Grid {
    /// Single black cell with an empty source tag.
    pub fn blank() -> Self {
        Self { rows: 1, cols: 1, cells: vec![[0.0; 3]], source: String::new() }
    }

    /// Reshapes flat 8-bit RGB slot data into a grid. Extra values are
    /// ignored and missing ones read as 0.
    pub fn from_slots(slots: &[u8], rows: usize, cols: usize, source: &str) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let value = |i: usize| slots.get(i).map(|v| *v as f64 / 255.0).unwrap_or(0.0);
        let cells = (0..rows * cols)
            .map(|cell| [value(cell * 3), value(cell * 3 + 1), value(cell * 3 + 2)])
            .collect();
        Self { rows, cols, cells, source: source.to_string() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn cell(&self, row: usize, col: usize) -> [f64; 3] {
        self.cells[row.min(self.rows - 1) * self.cols + col.min(self.cols - 1)]
    }

    /// Bilinear sample at `(n_x, n_y) ∈ [0,1)²`.
    ///
    /// Corners keep the asymmetric floor/ceil pairing: north corners sit on
    /// `ceil(y)`, south on `floor(y)`, west on `floor(x)`, east on `ceil(x)`.
    pub fn sample(&self, n_x: f64, n_y: f64) -> Rgb {
        let fx = n_x * (self.cols - 1) as f64;
        let fy = n_y * (self.rows - 1) as f64;
        let (west, east) = (fx.floor() as usize, fx.ceil() as usize);
        let (south, north) = (fy.floor() as usize, fy.ceil() as usize);

        let nw = self.cell(north, west);
        let ne = self.cell(north, east);
        let se = self.cell(south, east);
        let sw = self.cell(south, west);

        let frac_x = fx % 1.0;
        let frac_y = fy % 1.0;
        let channel = |c: usize| interpolate(nw[c], ne[c], se[c], sw[c], frac_x, frac_y);
        Rgb::new(channel(0), channel(1), channel(2))
    }
}

/// Linear in Y on each side, then linear in X between the sides.
fn interpolate(nw: f64, ne: f64, se: f64, sw: f64, frac_x: f64, frac_y: f64) -> f64 {
    let w = nw * frac_y + sw * (1.0 - frac_y);
    let e = ne * frac_y + se * (1.0 - frac_y);
    e * frac_x + w * (1.0 - frac_x)
}

/// Écriture de la grille (côté réception E1.31).
#[derive(Clone)]
pub struct GridFeed {
    current: Arc<ArcSwap<Grid>>,
    rows: usize,
    cols: usize,
}

impl GridFeed {
    pub fn expected_len(&self) -> usize {
        self.rows * self.cols * 3
    }

    /// Accepts one frame of slot data. A length mismatch is logged but the
    /// data is reshaped anyway.
    pub fn apply_frame(&self, slots: &[u8], source_name: &str) {
        let expected = self.expected_len();
        if slots.len() != expected && slots.len() != FULL_UNIVERSE {
            warn!(
                "received wrong amount of grid data. Got {} but was expecting {} ({} x {} x 3)",
                slots.len(),
                expected,
                self.rows,
                self.cols
            );
        }
        let source = source_name.trim_end_matches('\0');
        self.current
            .store(Arc::new(Grid::from_slots(slots, self.rows, self.cols, source)));
    }

    pub fn current(&self) -> Arc<Grid> {
        self.current.load_full()
    }
}

/// Samples an externally supplied grid at each pixel's effective position.
pub struct GridSource {
    current: Arc<ArcSwap<Grid>>,
    rows: usize,
    cols: usize,
}

impl GridSource {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(Grid::blank())),
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub fn feed(&self) -> GridFeed {
        GridFeed { current: self.current.clone(), rows: self.rows, cols: self.cols }
    }
}

/// Effective sample position: global plus over-weighted local, wrapped to [0,1).
pub fn effective_position(pixel: &Pixel) -> (f64, f64) {
    (
        (pixel.g_x + LOCAL_WEIGHT * pixel.l_x).rem_euclid(1.0),
        (pixel.g_y + LOCAL_WEIGHT * pixel.l_y).rem_euclid(1.0),
    )
}

impl ColorSource for GridSource {
    fn source(&self) -> &'static str {
        let grid = self.current.load();
        if grid.source().trim_end_matches('\0').trim() == DEMO_SOURCE_NAME {
            "demo-dmx"
        } else {
            "dmx"
        }
    }

    fn calculate(
        &self,
        _timestamp_ms: u64,
        pixel: &Pixel,
        device_id: u32,
        pixel_index: usize,
    ) -> Result<Rgb, ColorComputeError> {
        let (n_x, n_y) = effective_position(pixel);
        let color = self.current.load().sample(n_x, n_y);
        if color.is_finite() {
            Ok(color)
        } else {
            Err(ColorComputeError {
                device_id,
                pixel_index,
                reason: format!("non-finite sample at ({n_x}, {n_y})"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rgb(actual: Rgb, r: f64, g: f64, b: f64) {
        let ok = (actual.r - r).abs() < 1e-9 && (actual.g - g).abs() < 1e-9 && (actual.b - b).abs() < 1e-9;
        assert!(ok, "expected ({r}, {g}, {b}), got {actual:?}");
    }

    fn source_with(rows: usize, cols: usize, slots: &[u8]) -> GridSource {
        let source = GridSource::new(rows, cols);
        source.feed().apply_frame(slots, "anything-else");
        source
    }

    fn sample(source: &GridSource, g_x: f64, g_y: f64, l_x: f64, l_y: f64) -> Rgb {
        source.calculate(1, &Pixel::at(g_x, g_y, l_x, l_y), 0, 0).unwrap()
    }

    #[test]
    fn test_reshape_row_major() {
        let grid = Grid::from_slots(&[255, 127, 0, 255, 255, 255, 255, 0, 255, 0, 255, 255], 2, 2, "t");
        assert_eq!(grid.cell(0, 0), [1.0, 127.0 / 255.0, 0.0]);
        assert_eq!(grid.cell(0, 1), [1.0, 1.0, 1.0]);
        assert_eq!(grid.cell(1, 0), [1.0, 0.0, 1.0]);
        assert_eq!(grid.cell(1, 1), [0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_reshape_wide_and_tall() {
        let wide = Grid::from_slots(&[255; 18], 2, 3, "t");
        assert_eq!((wide.rows(), wide.cols()), (2, 3));
        assert_eq!(wide.cell(1, 2), [1.0, 1.0, 1.0]);

        let tall = Grid::from_slots(&[255; 18], 3, 2, "t");
        assert_eq!((tall.rows(), tall.cols()), (3, 2));
        assert_eq!(tall.cell(2, 1), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_short_frame_reads_missing_as_black() {
        let grid = Grid::from_slots(&[255, 255, 255, 255], 2, 2, "t");
        assert_eq!(grid.cell(0, 0), [1.0, 1.0, 1.0]);
        assert_eq!(grid.cell(0, 1), [1.0, 0.0, 0.0]);
        assert_eq!(grid.cell(1, 1), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_source_label_strips_padding() {
        let source = GridSource::new(2, 2);
        assert_eq!(source.source(), "dmx");

        source.feed().apply_frame(&[255; 12], "BYOP-demo-dmx\0\0\0\0");
        assert_eq!(source.source(), "demo-dmx");
        assert_eq!(source.feed().current().source(), "BYOP-demo-dmx");

        source.feed().apply_frame(&[255; 12], "anything-else");
        assert_eq!(source.source(), "dmx");
    }

    #[test]
    fn test_uniform_grid_is_uniform_everywhere() {
        let slots: Vec<u8> = [51u8, 102, 204].repeat(9);
        let source = source_with(3, 3, &slots);
        for &(g, l) in &[(0.0, 0.0), (0.13, 0.7), (0.5, 0.5), (0.91, 0.33), (1.0, 1.0)] {
            assert_rgb(sample(&source, g, 1.0 - g, l, l), 0.2, 0.4, 0.8);
        }
    }

    #[test]
    fn test_half_gray_between_white_and_black_rows() {
        // rangée 0 blanche, rangée 1 noire
        let source = source_with(2, 2, &[255, 255, 255, 255, 255, 255, 0, 0, 0, 0, 0, 0]);

        assert_rgb(sample(&source, 0.0, 0.0, 0.0, 0.0), 1.0, 1.0, 1.0);
        // nY = 0.4 + 0.2 * 0.5 = 0.5
        assert_rgb(sample(&source, 0.4, 0.4, 0.5, 0.5), 0.5, 0.5, 0.5);
        // nY = 0.75 + 0.1 = 0.85
        assert_rgb(sample(&source, 0.4, 0.75, 0.5, 0.5), 0.15, 0.15, 0.15);
    }

    #[test]
    fn test_half_gray_between_white_and_black_columns() {
        let source = source_with(2, 2, &[255, 255, 255, 0, 0, 0, 255, 255, 255, 0, 0, 0]);
        assert_rgb(sample(&source, 0.0, 0.4, 0.0, 0.5), 1.0, 1.0, 1.0);
        assert_rgb(sample(&source, 0.4, 0.4, 0.5, 0.5), 0.5, 0.5, 0.5);
    }

    #[test]
    fn test_effective_position_wraps_past_the_far_edge() {
        let (n_x, n_y) = effective_position(&Pixel::at(0.9, 1.0, 1.0, 0.5));
        assert!((n_x - 0.1).abs() < 1e-9);
        assert!((n_y - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_interpolates_across_a_bigger_input() {
        #[rustfmt::skip]
        let slots = [
            255, 0, 0,   170, 0, 0,   85, 0, 0,   // rangée sud : rouge
            0, 255, 0,   0, 170, 0,   0, 85, 0,   // milieu : vert
            0, 0, 255,   0, 0, 170,   0, 0, 85,   // rangée nord : bleu
        ];
        let source = source_with(3, 3, &slots);

        // pile sur l'échantillon central
        assert_rgb(sample(&source, 0.4, 0.4, 0.5, 0.5), 0.0, 170.0 / 255.0, 0.0);
        // quadrant sud-ouest, nX = nY = 0.25
        let q = (0.5 + 1.0 / 3.0) / 2.0;
        assert_rgb(sample(&source, 0.2, 0.2, 0.25, 0.25), q, q, 0.0);
    }

    #[test]
    fn test_non_finite_coordinates_fail() {
        let source = source_with(2, 2, &[255; 12]);
        let err = source
            .calculate(0, &Pixel::at(f64::NAN, 0.0, 0.0, 0.0), 3, 7)
            .unwrap_err();
        assert_eq!((err.device_id, err.pixel_index), (3, 7));
    }
}
