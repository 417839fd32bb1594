//! Bridge lifecycle
//!
//! [`BridgeService::start`] opens the device and every reader, binds the six
//! broadcast channels and spawns one task per modality handler. Any missing
//! piece aborts startup with a distinct [`BridgeError`]. [`BridgeService::stop`]
//! unregisters the readers and closes every channel.

use crate::broadcast::{BroadcastChannel, PacketSink};
use crate::driver::{FrameReader, SensorDevice};
use crate::error::{BridgeError, HandlerError};
use crate::handlers::{
    run_handler, AudioHandler, BodyHandler, FaceHandler, HandlerStats, ImageHandler, ModalityHandler,
};
use crate::speech::SpeechPath;
use k2bridge_core::{BridgeConfig, FaceFeatures, Modality, SharedBodies};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Time handler tasks get to drain after shutdown before they are aborted.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one handler task.
#[derive(Debug)]
pub struct HandlerExit {
    pub label: String,
    pub result: Result<HandlerStats, HandlerError>,
}

/// Tick counters of every handler that finished, keyed by handler label.
#[derive(Debug, Default, Clone)]
pub struct ServiceReport {
    pub handlers: BTreeMap<String, HandlerStats>,
}

impl ServiceReport {
    pub fn total_packets(&self) -> u64 {
        self.handlers.values().map(|s| s.packets).sum()
    }
}

pub struct BridgeService {
    device: Arc<dyn SensorDevice>,
    channels: BTreeMap<Modality, Arc<BroadcastChannel>>,
    shutdown: watch::Sender<bool>,
    handlers: JoinSet<HandlerExit>,
    background: Vec<JoinHandle<()>>,
    speech_enabled: bool,
    report: ServiceReport,
}

impl BridgeService {
    pub async fn start(device: Arc<dyn SensorDevice>, config: &BridgeConfig) -> Result<Self, BridgeError> {
        if let Err(e) = config.validate() {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }

        info!("Starting bridge with {} device", device.name());
        if let Err(e) = device.open() {
            error!("No sensor device detected: {}", e);
            return Err(BridgeError::DeviceNotFound(e.to_string()));
        }

        match Self::assemble(Arc::clone(&device), config).await {
            Ok(service) => {
                info!("Bridge started, streaming {} channels", service.channels.len());
                Ok(service)
            }
            Err(e) => {
                error!("Bridge failed to start: {}", e);
                device.close();
                Err(e)
            }
        }
    }

    async fn assemble(device: Arc<dyn SensorDevice>, config: &BridgeConfig) -> Result<Self, BridgeError> {
        let body_count = device.body_count();

        let body_reader = device
            .open_body_reader()
            .ok_or(BridgeError::ReaderUnavailable(Modality::Body))?;

        let mut image_readers = Vec::new();
        for modality in Modality::ALL.into_iter().filter(Modality::is_image) {
            let reader = device
                .open_image_reader(modality)
                .ok_or(BridgeError::ReaderUnavailable(modality))?;
            let geometry = device
                .frame_geometry(modality)
                .ok_or(BridgeError::GeometryUnavailable(modality))?;
            info!("{} frames: {} ({} bytes)", modality, geometry, geometry.sample_len());
            image_readers.push((modality, geometry, reader));
        }

        let format = device.audio_format().ok_or(BridgeError::AudioSourceUnavailable)?;
        info!(
            "Audio: {} Hz, {} samples per sub-frame",
            format.sampling_frequency,
            format.samples_per_frame()
        );
        let audio_reader = device.open_audio_reader();
        if audio_reader.is_none() {
            warn!("Audio beam reader could not be opened; audio channel stays silent");
        }

        let mut faces = Vec::with_capacity(body_count);
        let mut face_readers = Vec::with_capacity(body_count);
        for slot in 0..body_count {
            let source = device
                .create_face_source(slot, FaceFeatures::ALL)
                .ok_or(BridgeError::FaceSourceUnavailable(slot))?;
            let reader = source
                .open_reader()
                .ok_or(BridgeError::FaceReaderUnavailable(slot))?;
            faces.push(source);
            face_readers.push((slot, reader));
        }

        let speech = SpeechPath::probe(device.as_ref(), &config.speech);

        let mut channels = BTreeMap::new();
        for modality in Modality::ALL {
            let address = format!("{}:{}", config.ports.bind_address, config.ports.port_for(modality));
            let channel =
                BroadcastChannel::listen(modality, &address, config.channels.capacity_for(modality)).await?;
            channels.insert(modality, Arc::new(channel));
        }
        let sink = |modality: Modality| -> Arc<dyn PacketSink> { Arc::clone(&channels[&modality]) as Arc<dyn PacketSink> };

        let shared = SharedBodies::new(body_count);
        let (shutdown, _) = watch::channel(false);
        let mut handlers = JoinSet::new();

        for (modality, geometry, reader) in image_readers {
            let handler = ImageHandler::new(modality, geometry, sink(modality));
            spawn_handler(&mut handlers, reader, handler, shutdown.subscribe());
        }

        let body = BodyHandler::new(body_count, shared.clone(), faces, sink(Modality::Body));
        spawn_handler(&mut handlers, body_reader, body, shutdown.subscribe());

        for (slot, reader) in face_readers {
            spawn_handler(&mut handlers, reader, FaceHandler::new(slot, sink(Modality::Face)), shutdown.subscribe());
        }

        if let Some(reader) = audio_reader {
            let audio = AudioHandler::new(format, shared.clone(), config.audio.volume_weighting, sink(Modality::Audio));
            spawn_handler(&mut handlers, reader, audio, shutdown.subscribe());
        }

        let mut background = vec![watch_availability(device.as_ref(), shutdown.subscribe())];
        let speech_enabled = speech.is_some();
        if let Some(path) = speech {
            let stop = shutdown.subscribe();
            let name = path.recognizer().name.clone();
            background.push(tokio::spawn(async move {
                let accepted = path.run(stop).await;
                debug!("{} stopped after {} recognitions", name, accepted);
            }));
        }

        Ok(Self {
            device,
            channels,
            shutdown,
            handlers,
            background,
            speech_enabled,
            report: ServiceReport::default(),
        })
    }

    /// Whether the sensor device currently reports itself available.
    pub fn is_connected(&self) -> bool {
        self.device.is_available()
    }

    pub fn local_addr(&self, modality: Modality) -> Option<SocketAddr> {
        self.channels.get(&modality).map(|c| c.local_addr())
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    /// Wait until every handler has finished. Returns early with
    /// [`BridgeError::Pipeline`] when a handler hits a fatal error.
    pub async fn wait(&mut self) -> Result<(), BridgeError> {
        while let Some(joined) = self.handlers.join_next().await {
            match joined {
                Ok(HandlerExit { label, result: Ok(stats) }) => {
                    self.report.handlers.insert(label, stats);
                }
                Ok(HandlerExit { label, result: Err(source) }) => {
                    return Err(BridgeError::Pipeline { label, source });
                }
                Err(e) => warn!("Handler task ended abnormally: {}", e),
            }
        }
        Ok(())
    }

    /// Unregister every reader, close every channel and collect handler counters.
    pub async fn stop(mut self) -> ServiceReport {
        info!("Stopping bridge");
        let _ = self.shutdown.send(true);
        self.device.close();
        for channel in self.channels.values() {
            channel.close();
        }

        let handlers = &mut self.handlers;
        let report = &mut self.report;
        let drain = async move {
            while let Some(joined) = handlers.join_next().await {
                if let Ok(HandlerExit { label, result: Ok(stats) }) = joined {
                    report.handlers.insert(label, stats);
                }
            }
        };
        if tokio::time::timeout(STOP_TIMEOUT, drain).await.is_err() {
            warn!("Handlers did not stop within {:?}; aborting", STOP_TIMEOUT);
            self.handlers.abort_all();
        }

        for task in self.background.drain(..) {
            task.abort();
        }

        info!("Bridge stopped, {} packets published", self.report.total_packets());
        std::mem::take(&mut self.report)
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.device.close();
    }
}

fn spawn_handler<H>(
    set: &mut JoinSet<HandlerExit>,
    reader: Box<dyn FrameReader<H::Frame>>,
    handler: H,
    shutdown: watch::Receiver<bool>,
) where
    H: ModalityHandler + 'static,
{
    let label = handler.label();
    set.spawn(async move {
        let result = run_handler(reader, handler, shutdown).await;
        HandlerExit { label, result }
    });
}

fn watch_availability(device: &dyn SensorDevice, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let mut availability = device.availability();
    let name = device.name().to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = availability.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *availability.borrow_and_update() {
                        info!("{} device available", name);
                    } else {
                        warn!("{} device unavailable", name);
                    }
                }
            }
        }
    })
}
