#![allow(dead_code)]

use k2bridge_core::config::SimulationConfig;
use k2bridge_core::{AudioFormat, BridgeConfig, FaceFeatures, FrameGeometry, Modality};
use k2bridge_server::driver::{AudioBeamFrameList, BodyFrame, FaceSource, FrameReader, ImageFrame, SensorDevice};
use async_trait::async_trait;
use k2bridge_server::speech::{Recognition, RecognizerInfo, SpeechEngine};
use k2bridge_server::{DriverError, SimulatedDevice};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

/// Small frames, fast ticks, ephemeral loopback ports.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.ports.bind_address = "127.0.0.1".to_string();
    for modality in Modality::ALL {
        config.ports.set_port(modality, 0);
    }
    config.speech.enabled = false;
    config.simulation = SimulationConfig {
        color: FrameGeometry::new(8, 4, 4),
        depth: FrameGeometry::new(4, 4, 2),
        infrared: FrameGeometry::new(4, 4, 2),
        body_count: 2,
        tracked_bodies: 1,
        frame_rate: 100,
        drop_every: 0,
        seed: 3,
    };
    config
}

/// Simulated device with injectable startup faults.
pub struct ScriptedDevice {
    inner: SimulatedDevice,
    pub missing_reader: Option<Modality>,
    pub missing_geometry: Option<Modality>,
    pub reported_geometry: Option<(Modality, FrameGeometry)>,
    pub missing_audio_source: bool,
    pub missing_face_source: Option<usize>,
    pub readerless_face: Option<usize>,
    pub recognizers: Vec<RecognizerInfo>,
    pub recognizer_listing_fails: bool,
    /// Recognitions the speech engine yields; `None` means it fails to open
    pub speech_script: Option<Vec<Recognition>>,
}

impl ScriptedDevice {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            inner: SimulatedDevice::new(config.simulation.clone(), config.audio.format()),
            missing_reader: None,
            missing_geometry: None,
            reported_geometry: None,
            missing_audio_source: false,
            missing_face_source: None,
            readerless_face: None,
            recognizers: Vec::new(),
            recognizer_listing_fails: false,
            speech_script: None,
        }
    }
}

impl SensorDevice for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self) -> Result<(), DriverError> {
        self.inner.open()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn availability(&self) -> watch::Receiver<bool> {
        self.inner.availability()
    }

    fn body_count(&self) -> usize {
        self.inner.body_count()
    }

    fn frame_geometry(&self, modality: Modality) -> Option<FrameGeometry> {
        if self.missing_geometry == Some(modality) {
            return None;
        }
        match self.reported_geometry {
            Some((m, geometry)) if m == modality => Some(geometry),
            _ => self.inner.frame_geometry(modality),
        }
    }

    fn open_image_reader(&self, modality: Modality) -> Option<Box<dyn FrameReader<ImageFrame>>> {
        if self.missing_reader == Some(modality) {
            return None;
        }
        self.inner.open_image_reader(modality)
    }

    fn open_body_reader(&self) -> Option<Box<dyn FrameReader<BodyFrame>>> {
        if self.missing_reader == Some(Modality::Body) {
            return None;
        }
        self.inner.open_body_reader()
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        if self.missing_audio_source {
            return None;
        }
        self.inner.audio_format()
    }

    fn open_audio_reader(&self) -> Option<Box<dyn FrameReader<AudioBeamFrameList>>> {
        if self.missing_reader == Some(Modality::Audio) {
            return None;
        }
        self.inner.open_audio_reader()
    }

    fn create_face_source(&self, slot: usize, features: FaceFeatures) -> Option<Arc<dyn FaceSource>> {
        if self.missing_face_source == Some(slot) {
            return None;
        }
        if self.readerless_face == Some(slot) {
            return Some(Arc::new(StubFace { slot, tracking_id: parking_lot::Mutex::new(None) }));
        }
        self.inner.create_face_source(slot, features)
    }

    fn installed_recognizers(&self) -> Result<Vec<RecognizerInfo>, DriverError> {
        if self.recognizer_listing_fails {
            return Err(DriverError::Unavailable("speech runtime missing".to_string()));
        }
        Ok(self.recognizers.clone())
    }

    fn open_speech_engine(&self, _recognizer: &RecognizerInfo) -> Option<Box<dyn SpeechEngine>> {
        let script = self.speech_script.clone()?;
        Some(Box::new(ScriptedEngine { script: script.into() }))
    }
}

/// Recognizer entry as a speech runtime would list it.
pub fn recognizer(culture: &str, device_compatible: bool) -> RecognizerInfo {
    let flag = if device_compatible { "True" } else { "False" };
    RecognizerInfo {
        id: format!("SR_{}", culture),
        name: format!("Recognizer {}", culture),
        culture: culture.to_string(),
        additional_info: HashMap::from([("Kinect".to_string(), flag.to_string())]),
    }
}

/// Yields its script, then idles until shut down.
pub struct ScriptedEngine {
    script: VecDeque<Recognition>,
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn next_recognition(&mut self) -> Option<Recognition> {
        match self.script.pop_front() {
            Some(recognition) => Some(recognition),
            None => std::future::pending().await,
        }
    }
}

/// Packet sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    packets: parking_lot::Mutex<Vec<bytes::Bytes>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> Vec<bytes::Bytes> {
        self.packets.lock().clone()
    }

    /// Packets parsed as newline-terminated JSON records.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.packets()
            .iter()
            .map(|p| {
                assert_eq!(p.last(), Some(&b'\n'), "record must end with a newline");
                serde_json::from_slice(&p[..p.len() - 1]).unwrap()
            })
            .collect()
    }
}

impl k2bridge_server::PacketSink for RecordingSink {
    fn broadcast(&self, packet: bytes::Bytes) {
        self.packets.lock().push(packet);
    }
}

/// Face slot that only remembers the body it was told to follow.
pub struct StubFace {
    pub slot: usize,
    pub tracking_id: parking_lot::Mutex<Option<u64>>,
}

impl StubFace {
    pub fn slots(count: usize) -> Vec<Arc<StubFace>> {
        (0..count)
            .map(|slot| Arc::new(StubFace { slot, tracking_id: parking_lot::Mutex::new(None) }))
            .collect()
    }
}

impl FaceSource for StubFace {
    fn slot(&self) -> usize {
        self.slot
    }

    fn tracking_id(&self) -> Option<u64> {
        *self.tracking_id.lock()
    }

    fn set_tracking_id(&self, tracking_id: u64) {
        *self.tracking_id.lock() = Some(tracking_id);
    }

    fn open_reader(&self) -> Option<Box<dyn FrameReader<k2bridge_server::driver::FaceFrame>>> {
        None
    }
}
