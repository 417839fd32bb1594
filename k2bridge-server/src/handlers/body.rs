use super::{acquire_or_skip, system_clock, Clock, ModalityHandler, Tick, TickOutcome};
use crate::broadcast::PacketSink;
use crate::driver::{BodyFrame, FaceSource, FrameReference};
use crate::error::HandlerError;
use k2bridge_core::{to_line, BodyRecord, BodySnapshot, SharedBodies, TrackedBody};
use std::sync::Arc;
use tracing::debug;

/// Publishes body records, refreshes the shared body snapshot and hands
/// tracking ids to the face slot of the same index.
pub struct BodyHandler {
    body_count: usize,
    shared: SharedBodies,
    faces: Vec<Arc<dyn FaceSource>>,
    sink: Arc<dyn PacketSink>,
    clock: Clock,
    sequence: u64,
}

impl BodyHandler {
    pub fn new(
        body_count: usize,
        shared: SharedBodies,
        faces: Vec<Arc<dyn FaceSource>>,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            body_count,
            shared,
            faces,
            sink,
            clock: system_clock(),
            sequence: 0,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn bind_faces(&self, slots: &[TrackedBody]) {
        for (body, face) in slots.iter().zip(&self.faces) {
            if body.is_tracked && face.tracking_id() != Some(body.tracking_id) {
                debug!("face[{}] now follows body {}", face.slot(), body.tracking_id);
                face.set_tracking_id(body.tracking_id);
            }
        }
    }
}

impl ModalityHandler for BodyHandler {
    type Frame = BodyFrame;

    fn label(&self) -> String {
        "body".to_string()
    }

    fn on_frame_arrived(&mut self, reference: FrameReference<BodyFrame>) -> TickOutcome {
        let time = (self.clock)();
        let frame = match acquire_or_skip(reference)? {
            Ok(frame) => frame,
            Err(tick) => return Ok(tick),
        };

        let mut slots = vec![TrackedBody::untracked(); self.body_count];
        frame.refresh_body_data(&mut slots);
        self.bind_faces(&slots);

        let line = to_line(&BodyRecord::from_slots(time, &slots))
            .map_err(|e| HandlerError::Unexpected(e.to_string()))?;

        self.sequence += 1;
        self.shared.publish(BodySnapshot::new(self.sequence, slots));
        self.sink.broadcast(line);
        Ok(Tick::Published(1))
    }
}
