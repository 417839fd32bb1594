use super::{system_clock, Clock, ModalityHandler, SkipReason, Tick, TickOutcome};
use crate::broadcast::PacketSink;
use crate::driver::{AudioBeamFrameList, FrameReference};
use crate::error::HandlerError;
use k2bridge_core::{aggregate_volume, to_line, AudioFormat, AudioRecord, AudioSubFrame, SharedBodies, VolumeWeighting};
use std::sync::Arc;
use tracing::{debug, trace};

/// Publishes one energy record per sub-frame of the first audio beam.
pub struct AudioHandler {
    format: AudioFormat,
    samples: Vec<f32>,
    shared: SharedBodies,
    weighting: VolumeWeighting,
    sink: Arc<dyn PacketSink>,
    clock: Clock,
}

impl AudioHandler {
    pub fn new(
        format: AudioFormat,
        shared: SharedBodies,
        weighting: VolumeWeighting,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self {
            format,
            samples: vec![0.0; format.samples_per_frame()],
            shared,
            weighting,
            sink,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Copy a sub-frame into the fixed-length sample buffer. A short
    /// sub-frame is zero padded and a long one truncated.
    fn load_samples(&mut self, sub_frame: &AudioSubFrame) {
        let count = sub_frame.samples.len().min(self.samples.len());
        if count != self.samples.len() || count != sub_frame.samples.len() {
            trace!(
                "audio sub-frame holds {} samples, buffer holds {}",
                sub_frame.samples.len(),
                self.samples.len()
            );
        }
        self.samples[..count].copy_from_slice(&sub_frame.samples[..count]);
        self.samples[count..].fill(0.0);
    }
}

impl ModalityHandler for AudioHandler {
    type Frame = AudioBeamFrameList;

    fn label(&self) -> String {
        "audio".to_string()
    }

    fn on_frame_arrived(&mut self, reference: FrameReference<AudioBeamFrameList>) -> TickOutcome {
        let time = (self.clock)();
        // Audio dropouts are routine
        let list = match reference.acquire() {
            Ok(Some(list)) => list,
            Ok(None) => return Ok(Tick::Skipped(SkipReason::FrameUnavailable)),
            Err(e) => {
                debug!("audio frame list not acquired: {}", e);
                return Ok(Tick::Skipped(SkipReason::AcquisitionFailed));
            }
        };
        let Some(beam) = list.beams.first() else {
            return Ok(Tick::Skipped(SkipReason::EmptyBeamList));
        };
        if beam.sub_frames.is_empty() {
            return Ok(Tick::Skipped(SkipReason::EmptyBeamList));
        }

        for sub_frame in &beam.sub_frames {
            self.load_samples(sub_frame);
            let snapshot = self.shared.load();
            let volume = aggregate_volume(&self.samples, &sub_frame.correlations, &snapshot, self.weighting);

            let record = AudioRecord::describe(&self.format, &self.samples).build(
                (self.clock)(),
                sub_frame.beam_angle,
                sub_frame.beam_angle_confidence,
                &sub_frame.correlations,
                time,
                sub_frame.relative_time.as_nanos() as f64 / 1e6,
                volume,
            );
            let line = to_line(&record).map_err(|e| HandlerError::Unexpected(e.to_string()))?;
            self.sink.broadcast(line);
        }

        Ok(Tick::Published(beam.sub_frames.len()))
    }
}
