use super::{acquire_or_skip, system_clock, Clock, ModalityHandler, SkipReason, Tick, TickOutcome};
use crate::broadcast::PacketSink;
use crate::driver::{FaceFrame, FrameReference};
use crate::error::HandlerError;
use k2bridge_core::{to_line, FaceRecord};
use std::sync::Arc;

/// Publishes the result of one face tracking slot. All slots share the face channel.
pub struct FaceHandler {
    slot: usize,
    sink: Arc<dyn PacketSink>,
    clock: Clock,
}

impl FaceHandler {
    pub fn new(slot: usize, sink: Arc<dyn PacketSink>) -> Self {
        Self { slot, sink, clock: system_clock() }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl ModalityHandler for FaceHandler {
    type Frame = FaceFrame;

    fn label(&self) -> String {
        format!("face[{}]", self.slot)
    }

    fn on_frame_arrived(&mut self, reference: FrameReference<FaceFrame>) -> TickOutcome {
        let time = (self.clock)();
        let frame = match acquire_or_skip(reference)? {
            Ok(frame) => frame,
            Err(tick) => return Ok(tick),
        };
        let Some(result) = frame.result else {
            return Ok(Tick::Skipped(SkipReason::NoFaceResult));
        };

        let line = to_line(&FaceRecord::new(time, &result))
            .map_err(|e| HandlerError::Unexpected(e.to_string()))?;
        self.sink.broadcast(line);
        Ok(Tick::Published(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{fixed_clock, RecordingSink};
    use k2bridge_core::types::{DetectionResult, FacePointType, FaceProperty, PointF, Quaternion};
    use k2bridge_core::FaceResult;
    use std::collections::BTreeMap;

    #[test]
    fn test_face_result_is_published() {
        let sink = RecordingSink::new();
        let mut handler = FaceHandler::new(3, sink.clone()).with_clock(fixed_clock(5.0));

        let result = FaceResult {
            tracking_id: 7,
            orientation: Quaternion::default(),
            properties: BTreeMap::from([(FaceProperty::Happy, DetectionResult::Yes)]),
            points: BTreeMap::from([(FacePointType::Nose, PointF { x: 10.0, y: 20.0 })]),
        };
        let tick = handler
            .on_frame_arrived(FrameReference::ready(FaceFrame { result: Some(result) }))
            .unwrap();
        assert_eq!(tick, Tick::Published(1));

        let lines = sink.lines();
        assert_eq!(lines[0]["TrackingId"], 7);
        assert_eq!(lines[0]["Time"], 5.0);
        assert_eq!(lines[0]["Properties"]["Happy"], "Yes");
    }

    #[test]
    fn test_slot_without_face_publishes_nothing() {
        let sink = RecordingSink::new();
        let mut handler = FaceHandler::new(0, sink.clone());

        let tick = handler
            .on_frame_arrived(FrameReference::ready(FaceFrame { result: None }))
            .unwrap();
        assert_eq!(tick, Tick::Skipped(SkipReason::NoFaceResult));
        assert!(sink.packets.lock().is_empty());
        assert_eq!(handler.label(), "face[0]");
    }
}
