use super::{hsl_to_rgb, ColorComputeError, ColorSource, Rgb};
use crate::device::Pixel;

const PERIOD_MS: u64 = 5000;
const LOCAL_WEIGHT: f64 = 0.5;
const SATURATION: f64 = 0.5;
const LIGHTNESS: f64 = 0.3;

/// Arc-en-ciel qui traverse le champ en diagonale, légèrement modulé par la
/// disposition interne des pixels de chaque device.
#[derive(Debug, Clone, Copy, Default)]
pub struct RainbowSource;

impl RainbowSource {
    pub fn new() -> Self {
        Self
    }
}

/// Phase in [0, 1) of the traveling gradient for one pixel.
pub fn rainbow_phase(timestamp_ms: u64, g_x: f64, g_y: f64, l_x: f64, l_y: f64) -> f64 {
    let t = (timestamp_ms % PERIOD_MS) as f64 / PERIOD_MS as f64;
    let w = LOCAL_WEIGHT;
    let offset = (g_x + 2.0 * g_y + 2.0 * w * (l_x - 0.5) + w * (l_y - 0.5)) / (3.0 + 3.0 * w);
    (t + offset).rem_euclid(1.0)
}

/// Rainbow color at normalized coordinates, usable outside the registry
/// (the grid demo samples it directly).
pub fn spatial_rainbow(timestamp_ms: u64, g_x: f64, g_y: f64, l_x: f64, l_y: f64) -> Rgb {
    hsl_to_rgb(rainbow_phase(timestamp_ms, g_x, g_y, l_x, l_y), SATURATION, LIGHTNESS)
}

impl ColorSource for RainbowSource {
    fn source(&self) -> &'static str {
        "demo-api"
    }

    fn calculate(
        &self,
        timestamp_ms: u64,
        pixel: &Pixel,
        _device_id: u32,
        _pixel_index: usize,
    ) -> Result<Rgb, ColorComputeError> {
        Ok(spatial_rainbow(timestamp_ms, pixel.g_x, pixel.g_y, pixel.l_x, pixel.l_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_origin() {
        // centre du device, coin du champ, t = 0
        assert_eq!(rainbow_phase(0, 0.0, 0.0, 0.5, 0.5), 0.0);
        assert_eq!(rainbow_phase(5000, 0.0, 0.0, 0.5, 0.5), 0.0);
        assert_eq!(rainbow_phase(2500, 0.0, 0.0, 0.5, 0.5), 0.5);
    }

    #[test]
    fn test_phase_wraps() {
        let p = rainbow_phase(4000, 1.0, 1.0, 1.0, 1.0);
        assert!((0.0..1.0).contains(&p));
        // 0.8 + (1 + 2 + 0.5 + 0.25) / 4.5
        let expected = (0.8_f64 + 3.75 / 4.5).rem_euclid(1.0);
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn test_color_is_red_at_phase_zero() {
        let c = RainbowSource::new()
            .calculate(0, &Pixel::at(0.0, 0.0, 0.5, 0.5), 0, 0)
            .unwrap();
        // h = 0, s = 0.5, l = 0.3 : q = 0.45, p = 0.15
        assert!((c.r - 0.45).abs() < 1e-12);
        assert!((c.g - 0.15).abs() < 1e-12);
        assert!((c.b - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_source_label() {
        assert_eq!(RainbowSource::new().source(), "demo-api");
    }
}
