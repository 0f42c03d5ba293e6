use super::PixelListener;
use crate::color::Rgb;
use crate::device::{Device, Pixel};
use crate::e131::{DataPacket, FrameSink, UdpSink, DEFAULT_UNIVERSE, MAX_SLOTS, SOURCE_NAME};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

struct Outbound {
    host: String,
    packet: DataPacket,
}

/// Emits one E1.31 frame per device with a host, at the end of each device's
/// update.
pub struct TransmitListener<S: FrameSink = UdpSink> {
    sink: S,
    cid: [u8; 16],
    universe: u16,
    frames: HashMap<u32, Outbound>,
}

impl<S: FrameSink> TransmitListener<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            cid: *Uuid::new_v4().as_bytes(),
            universe: DEFAULT_UNIVERSE,
            frames: HashMap::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: FrameSink> PixelListener for TransmitListener<S> {
    fn new_device(&mut self, device_id: u32, host: Option<&str>, pixel_count: usize) {
        let Some(host) = host else {
            self.frames.remove(&device_id);
            return;
        };

        let mut slots = pixel_count * 3;
        if slots > MAX_SLOTS {
            warn!("device {device_id} has {pixel_count} pixels, only the first {} fit in one universe", MAX_SLOTS / 3);
            slots = MAX_SLOTS;
        }

        let mut packet = DataPacket::new(self.cid, SOURCE_NAME, self.universe, slots);
        if let Some(previous) = self.frames.get(&device_id) {
            packet.sequence = previous.packet.sequence;
        }
        self.frames.insert(device_id, Outbound { host: host.to_string(), packet });
    }

    fn update_pixel_color(&mut self, device_id: u32, pixel_index: usize, color: Rgb, _: &Device, _: &Pixel) {
        let Some(out) = self.frames.get_mut(&device_id) else { return };
        let offset = pixel_index * 3;
        for (k, value) in color.to_channels().into_iter().enumerate() {
            if let Some(slot) = out.packet.slots.get_mut(offset + k) {
                *slot = value;
            }
        }
    }

    fn finished_updating_device(&mut self, device_id: u32) {
        let Some(out) = self.frames.get_mut(&device_id) else { return };
        match out.packet.encode() {
            Ok(bytes) => {
                if let Err(e) = self.sink.send(&out.host, &bytes) {
                    debug!("could not send frame to {}: {e}", out.host);
                }
            }
            Err(e) => warn!("could not encode frame for device {device_id}: {e}"),
        }
        out.packet.advance_sequence();
    }
}
