/**
 * PIXEL LISTENERS - Destinataires des couleurs calculées à chaque frame
 *
 * RÔLE :
 * Le registre pousse chaque couleur vers un listener, qui la route vers
 * un ou plusieurs puits : télémétrie live (websocket) et émission E1.31.
 *
 * ORDRE D'APPEL PAR FRAME :
 * started_updating_devices(source)
 *   -> pour chaque device : update_pixel_color x pixels, puis finished_updating_device
 * finished_updating_devices()
 *
 * new_device est appelé à l'enregistrement et à chaque mise à jour d'un device.
 */

pub mod composite;
pub mod telemetry;
pub mod transmit;

pub use composite::CompositeListener;
pub use telemetry::{TelemetryFeed, TelemetryFrame, TelemetryListener};
pub use transmit::TransmitListener;

use crate::color::Rgb;
use crate::device::{Device, Pixel};

pub trait PixelListener: Send {
    fn new_device(&mut self, _device_id: u32, _host: Option<&str>, _pixel_count: usize) {}

    fn started_updating_devices(&mut self, _source: &str) {}

    fn update_pixel_color(
        &mut self,
        device_id: u32,
        pixel_index: usize,
        color: Rgb,
        device: &Device,
        pixel: &Pixel,
    );

    fn finished_updating_device(&mut self, _device_id: u32) {}

    fn finished_updating_devices(&mut self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::state::{new_state, Shared};

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        NewDevice(u32, Option<String>, usize),
        Started(String),
        Pixel(u32, usize, Rgb),
        FinishedDevice(u32),
        Finished,
    }

    /// Listener de test : journalise chaque appel dans un vecteur partagé.
    #[derive(Clone)]
    pub struct RecordingListener {
        pub calls: Shared<Vec<Call>>,
    }

    impl RecordingListener {
        pub fn new() -> Self {
            Self { calls: new_state(Vec::new()) }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn pixel_calls(&self) -> usize {
            self.calls.lock().iter().filter(|c| matches!(c, Call::Pixel(..))).count()
        }
    }

    impl PixelListener for RecordingListener {
        fn new_device(&mut self, device_id: u32, host: Option<&str>, pixel_count: usize) {
            self.calls
                .lock()
                .push(Call::NewDevice(device_id, host.map(str::to_string), pixel_count));
        }

        fn started_updating_devices(&mut self, source: &str) {
            self.calls.lock().push(Call::Started(source.to_string()));
        }

        fn update_pixel_color(&mut self, device_id: u32, pixel_index: usize, color: Rgb, _: &Device, _: &Pixel) {
            self.calls.lock().push(Call::Pixel(device_id, pixel_index, color));
        }

        fn finished_updating_device(&mut self, device_id: u32) {
            self.calls.lock().push(Call::FinishedDevice(device_id));
        }

        fn finished_updating_devices(&mut self) {
            self.calls.lock().push(Call::Finished);
        }
    }
}
