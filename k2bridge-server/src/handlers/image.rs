use super::{acquire_or_skip, system_clock, Clock, ModalityHandler, Tick, TickOutcome};
use crate::broadcast::PacketSink;
use crate::driver::{FrameReference, ImageFrame};
use crate::error::HandlerError;
use k2bridge_core::{FrameGeometry, Modality, WirePacker};
use std::sync::Arc;

/// Publishes color, depth or infrared frames as raw wire buffers.
pub struct ImageHandler {
    modality: Modality,
    samples: Vec<u8>,
    packer: WirePacker,
    sink: Arc<dyn PacketSink>,
    clock: Clock,
}

impl ImageHandler {
    /// Buffers are sized once from `geometry` and reused for every frame.
    pub fn new(modality: Modality, geometry: FrameGeometry, sink: Arc<dyn PacketSink>) -> Self {
        Self {
            modality,
            samples: vec![0; geometry.sample_len()],
            packer: WirePacker::new(geometry),
            sink,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl ModalityHandler for ImageHandler {
    type Frame = ImageFrame;

    fn label(&self) -> String {
        self.modality.to_string()
    }

    fn on_frame_arrived(&mut self, reference: FrameReference<ImageFrame>) -> TickOutcome {
        let timestamp = (self.clock)();
        let frame = match acquire_or_skip(reference)? {
            Ok(frame) => frame,
            Err(tick) => return Ok(tick),
        };

        // The geometry was fixed when the reader was opened
        if frame.data.len() != self.samples.len() {
            return Err(HandlerError::Fatal(k2bridge_core::Error::GeometryMismatch {
                expected: self.samples.len(),
                actual: frame.data.len(),
            }));
        }
        frame.copy_frame_data_to(&mut self.samples)?;

        let wire = self.packer.pack(&self.samples, timestamp).map_err(HandlerError::Fatal)?;
        self.sink.broadcast(wire);
        Ok(Tick::Published(1))
    }
}
