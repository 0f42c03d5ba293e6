use super::PixelListener;
use crate::color::Rgb;
use crate::device::{Device, Pixel};

/// Forwards every call to each delegate, in order.
#[derive(Default)]
pub struct CompositeListener {
    delegates: Vec<Box<dyn PixelListener>>,
}

impl CompositeListener {
    pub fn new(delegates: Vec<Box<dyn PixelListener>>) -> Self {
        Self { delegates }
    }
}

impl PixelListener for CompositeListener {
    fn new_device(&mut self, device_id: u32, host: Option<&str>, pixel_count: usize) {
        for d in &mut self.delegates {
            d.new_device(device_id, host, pixel_count);
        }
    }

    fn started_updating_devices(&mut self, source: &str) {
        for d in &mut self.delegates {
            d.started_updating_devices(source);
        }
    }

    fn update_pixel_color(&mut self, device_id: u32, pixel_index: usize, color: Rgb, device: &Device, pixel: &Pixel) {
        for d in &mut self.delegates {
            d.update_pixel_color(device_id, pixel_index, color, device, pixel);
        }
    }

    fn finished_updating_device(&mut self, device_id: u32) {
        for d in &mut self.delegates {
            d.finished_updating_device(device_id);
        }
    }

    fn finished_updating_devices(&mut self) {
        for d in &mut self.delegates {
            d.finished_updating_devices();
        }
    }
}
