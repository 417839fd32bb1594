//! Simulated sensor device
//!
//! Produces synthetic frames for every modality at the configured rate so the
//! bridge can run and be exercised without hardware. Frame content is
//! deterministic for a given seed.

use crate::driver::{
    frame_channel, AudioBeamFrame, AudioBeamFrameList, BodyFrame, FaceFrame, FaceSource, FrameReader,
    FrameReference, ImageFrame, SensorDevice,
};
use crate::error::DriverError;
use crate::speech::{RecognizerInfo, SpeechEngine};
use bytes::Bytes;
use k2bridge_core::config::SimulationConfig;
use k2bridge_core::types::{
    CameraSpacePoint, DetectionResult, FacePointType, FaceProperty, HandState, Joint, PointF, Quaternion,
    TrackingState,
};
use k2bridge_core::{AudioBodyCorrelation, AudioFormat, AudioSubFrame, FaceFeatures, FaceResult, FrameGeometry, Modality, TrackedBody};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Tracking ids handed out by the simulated body tracker start here.
const TRACKING_ID_BASE: u64 = 72_057_594_037_928_000;

const SUB_FRAMES_PER_LIST: usize = 4;

const TONE_HZ: f64 = 440.0;

const JOINTS: [(&str, f32); 6] = [
    ("SpineBase", 0.0),
    ("SpineMid", 0.3),
    ("Neck", 0.55),
    ("Head", 0.7),
    ("HandLeft", 0.1),
    ("HandRight", 0.1),
];

/// Pending notifications per reader; frames are perishable.
const NOTIFY_CAPACITY: usize = 2;

pub struct SimulatedDevice {
    config: SimulationConfig,
    audio: AudioFormat,
    attached: bool,
    open: AtomicBool,
    availability: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl SimulatedDevice {
    pub fn new(config: SimulationConfig, audio: AudioFormat) -> Self {
        let (availability, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(true);
        Self {
            config,
            audio,
            attached: true,
            open: AtomicBool::new(false),
            availability,
            shutdown,
        }
    }

    /// A device that is never found.
    pub fn unplugged(config: SimulationConfig, audio: AudioFormat) -> Self {
        Self { attached: false, ..Self::new(config, audio) }
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.config.frame_rate.max(1)))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn spawn<F, G>(&self, label: String, period: Duration, produce: G) -> Option<Box<dyn FrameReader<F>>>
    where
        F: Send + 'static,
        G: FnMut(u64) -> FrameReference<F> + Send + 'static,
    {
        if !self.is_open() {
            return None;
        }
        spawn_generator(label, period, self.shutdown.subscribe(), produce)
    }

    fn image_frames(&self, geometry: FrameGeometry) -> [Bytes; 2] {
        let len = geometry.sample_len();
        let gradient: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let inverted: Vec<u8> = gradient.iter().map(|b| !b).collect();
        [Bytes::from(gradient), Bytes::from(inverted)]
    }
}

impl SensorDevice for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self) -> Result<(), DriverError> {
        if !self.attached {
            return Err(DriverError::NotFound);
        }
        if self.open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.send_replace(false);
        self.availability.send_replace(true);
        info!(
            "Simulated device opened: color {}, depth {}, infrared {}, {} bodies @ {} fps",
            self.config.color, self.config.depth, self.config.infrared, self.config.body_count, self.config.frame_rate
        );
        Ok(())
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        self.availability.send_replace(false);
        info!("Simulated device closed");
    }

    fn is_available(&self) -> bool {
        *self.availability.borrow()
    }

    fn availability(&self) -> watch::Receiver<bool> {
        self.availability.subscribe()
    }

    fn body_count(&self) -> usize {
        self.config.body_count
    }

    fn frame_geometry(&self, modality: Modality) -> Option<FrameGeometry> {
        match modality {
            Modality::Color => Some(self.config.color),
            Modality::Depth => Some(self.config.depth),
            Modality::Infrared => Some(self.config.infrared),
            _ => None,
        }
    }

    fn open_image_reader(&self, modality: Modality) -> Option<Box<dyn FrameReader<ImageFrame>>> {
        let geometry = self.frame_geometry(modality)?;
        let frames = self.image_frames(geometry);
        let drop_every = u64::from(self.config.drop_every);

        self.spawn(modality.to_string(), self.frame_period(), move |tick| {
            if drop_every > 0 && tick % drop_every == 0 {
                return FrameReference::expired();
            }
            FrameReference::ready(ImageFrame::new(frames[(tick % 2) as usize].clone()))
        })
    }

    fn open_body_reader(&self) -> Option<Box<dyn FrameReader<BodyFrame>>> {
        let body_count = self.config.body_count;
        let tracked = self.config.tracked_bodies;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let period = self.frame_period().as_secs_f32();

        self.spawn("body".to_string(), self.frame_period(), move |tick| {
            let t = tick as f32 * period;
            let bodies = (0..body_count)
                .map(|slot| {
                    if slot < tracked {
                        simulated_body(slot, t, &mut rng)
                    } else {
                        TrackedBody::untracked()
                    }
                })
                .collect();
            FrameReference::ready(BodyFrame { bodies })
        })
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        Some(self.audio)
    }

    fn open_audio_reader(&self) -> Option<Box<dyn FrameReader<AudioBeamFrameList>>> {
        let format = self.audio;
        let samples_per_frame = format.samples_per_frame();
        let sub_frame_len = Duration::from_secs_f64(format.frame_lifetime_secs);
        let speaker = (self.config.tracked_bodies > 0).then_some(TRACKING_ID_BASE);
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let mut emitted: u64 = 0;

        self.spawn(
            "audio".to_string(),
            sub_frame_len * SUB_FRAMES_PER_LIST as u32,
            move |_| {
                let sub_frames = (0..SUB_FRAMES_PER_LIST)
                    .map(|_| {
                        let start = emitted * samples_per_frame as u64;
                        let samples = (0..samples_per_frame)
                            .map(|i| {
                                let n = (start + i as u64) as f64;
                                let cycles = (TONE_HZ * n / f64::from(format.sampling_frequency)).fract();
                                let phase = (2.0 * std::f64::consts::PI * cycles) as f32;
                                0.2 * phase.sin() + rng.gen_range(-0.01f32..0.01)
                            })
                            .collect();
                        let sub_frame = AudioSubFrame {
                            beam_angle: (emitted as f32 * 0.01).sin() * 0.8,
                            beam_angle_confidence: 0.75,
                            samples,
                            correlations: speaker
                                .map(|id| vec![AudioBodyCorrelation { body_tracking_id: id, weight: 1.0 }])
                                .unwrap_or_default(),
                            relative_time: sub_frame_len * emitted as u32,
                        };
                        emitted += 1;
                        sub_frame
                    })
                    .collect();
                FrameReference::ready(AudioBeamFrameList { beams: vec![AudioBeamFrame { sub_frames }] })
            },
        )
    }

    fn create_face_source(&self, slot: usize, features: FaceFeatures) -> Option<Arc<dyn FaceSource>> {
        if !self.is_open() || slot >= self.config.body_count {
            return None;
        }
        debug!("face[{}] created with {:?}", slot, features);
        Some(Arc::new(SimulatedFace {
            slot,
            tracking_id: Arc::new(AtomicU64::new(0)),
            period: self.frame_period(),
            shutdown: self.shutdown.subscribe(),
        }))
    }

    fn installed_recognizers(&self) -> Result<Vec<RecognizerInfo>, DriverError> {
        Ok(Vec::new())
    }

    fn open_speech_engine(&self, _recognizer: &RecognizerInfo) -> Option<Box<dyn SpeechEngine>> {
        None
    }
}

struct SimulatedFace {
    slot: usize,
    /// 0 until a body is assigned
    tracking_id: Arc<AtomicU64>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl FaceSource for SimulatedFace {
    fn slot(&self) -> usize {
        self.slot
    }

    fn tracking_id(&self) -> Option<u64> {
        match self.tracking_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    fn set_tracking_id(&self, tracking_id: u64) {
        self.tracking_id.store(tracking_id, Ordering::Release);
    }

    fn open_reader(&self) -> Option<Box<dyn FrameReader<FaceFrame>>> {
        if *self.shutdown.borrow() {
            return None;
        }
        let tracking_id = Arc::clone(&self.tracking_id);
        let period = self.period.as_secs_f32();

        spawn_generator(format!("face[{}]", self.slot), self.period, self.shutdown.clone(), move |tick| {
            let result = match tracking_id.load(Ordering::Acquire) {
                0 => None,
                id => Some(simulated_face(id, tick as f32 * period)),
            };
            FrameReference::ready(FaceFrame { result })
        })
    }
}

/// Run `produce` once per `period` until `shutdown` flips or the reader is dropped.
fn spawn_generator<F, G>(
    label: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut produce: G,
) -> Option<Box<dyn FrameReader<F>>>
where
    F: Send + 'static,
    G: FnMut(u64) -> FrameReference<F> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let (notifier, reader) = frame_channel(NOTIFY_CAPACITY);

    runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if notifier.is_closed() {
                break;
            }
            tick += 1;
            if !notifier.notify(produce(tick)) {
                trace!("{} reader busy, frame {} dropped", label, tick);
            }
        }
        debug!("{} generator stopped after {} frames", label, tick);
    });

    Some(Box::new(reader))
}

fn simulated_body(slot: usize, t: f32, rng: &mut StdRng) -> TrackedBody {
    let mut body = TrackedBody::tracked(TRACKING_ID_BASE + slot as u64);
    let sway = (t * 0.5 + slot as f32).sin() * 0.2;
    let origin_x = slot as f32 * 0.6 - 1.0 + sway;

    for (name, height) in JOINTS {
        let side = match name {
            "HandLeft" => -0.35,
            "HandRight" => 0.35,
            _ => 0.0,
        };
        let position = CameraSpacePoint {
            x: origin_x + side + rng.gen_range(-0.005f32..0.005),
            y: height - 0.4 + rng.gen_range(-0.005f32..0.005),
            z: 2.0 + rng.gen_range(-0.005f32..0.005),
        };
        body.joints.insert(
            name.to_string(),
            Joint { joint_type: name.to_string(), position, tracking_state: TrackingState::Tracked },
        );
    }

    body.hand_left_state = if (t as u64) % 4 < 2 { HandState::Open } else { HandState::Closed };
    body.hand_right_state = HandState::Open;
    body.lean = PointF { x: sway, y: 0.0 };
    body.lean_tracking_state = TrackingState::Tracked;
    body
}

fn simulated_face(tracking_id: u64, t: f32) -> FaceResult {
    let yaw = (t * 0.7).sin() * 0.2;
    let orientation = Quaternion { x: 0.0, y: yaw.sin(), z: 0.0, w: yaw.cos() };

    let happy = if (t as u64) % 6 < 3 { DetectionResult::Yes } else { DetectionResult::No };
    let properties = BTreeMap::from([
        (FaceProperty::Happy, happy),
        (FaceProperty::Engaged, DetectionResult::Yes),
        (FaceProperty::WearingGlasses, DetectionResult::No),
        (FaceProperty::LeftEyeClosed, DetectionResult::No),
        (FaceProperty::RightEyeClosed, DetectionResult::No),
        (FaceProperty::MouthOpen, DetectionResult::Maybe),
        (FaceProperty::MouthMoved, DetectionResult::Maybe),
        (FaceProperty::LookingAway, DetectionResult::No),
    ]);

    let dx = yaw * 100.0;
    let points = BTreeMap::from([
        (FacePointType::EyeLeft, PointF { x: 920.0 + dx, y: 480.0 }),
        (FacePointType::EyeRight, PointF { x: 1000.0 + dx, y: 480.0 }),
        (FacePointType::Nose, PointF { x: 960.0 + dx, y: 530.0 }),
        (FacePointType::MouthCornerLeft, PointF { x: 930.0 + dx, y: 580.0 }),
        (FacePointType::MouthCornerRight, PointF { x: 990.0 + dx, y: 580.0 }),
    ]);

    FaceResult { tracking_id, orientation, properties, points }
}
