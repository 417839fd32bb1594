//! Device driver interface
//!
//! The bridge never talks to sensor hardware directly. A [`SensorDevice`]
//! opens per-modality [`FrameReader`]s; each reader yields one
//! [`FrameReference`] per frame-arrival notification, and the frame behind a
//! reference may already be gone by the time it is acquired.

use crate::error::DriverError;
use crate::speech::{RecognizerInfo, SpeechEngine};
use async_trait::async_trait;
use bytes::Bytes;
use k2bridge_core::{AudioFormat, AudioSubFrame, FaceFeatures, FaceResult, FrameGeometry, Modality, TrackedBody};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Handle to a frame delivered by a frame-arrival notification.
#[derive(Debug)]
pub struct FrameReference<F> {
    acquired: Result<Option<F>, DriverError>,
}

impl<F> FrameReference<F> {
    pub fn ready(frame: F) -> Self {
        Self { acquired: Ok(Some(frame)) }
    }

    /// A notification whose frame expired before it could be acquired.
    pub fn expired() -> Self {
        Self { acquired: Ok(None) }
    }

    pub fn failed(err: DriverError) -> Self {
        Self { acquired: Err(err) }
    }

    /// Take the frame. `Ok(None)` means the frame is no longer available.
    pub fn acquire(self) -> Result<Option<F>, DriverError> {
        self.acquired
    }
}

/// Stream of frame-arrival notifications for one modality.
#[async_trait]
pub trait FrameReader<F: Send>: Send {
    /// Next notification, or `None` once the reader has been closed.
    async fn next_arrival(&mut self) -> Option<FrameReference<F>>;
}

/// Producer side of a [`ChannelReader`].
pub struct FrameNotifier<F> {
    tx: mpsc::Sender<FrameReference<F>>,
}

impl<F> Clone for FrameNotifier<F> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<F> FrameNotifier<F> {
    /// Queue a notification without waiting.
    ///
    /// Returns `false` if the reader is busy or gone; frames are perishable
    /// so a notification that cannot be queued is dropped.
    pub fn notify(&self, reference: FrameReference<F>) -> bool {
        self.tx.try_send(reference).is_ok()
    }

    /// Queue a notification, waiting for room in the reader's queue.
    pub async fn notify_wait(&self, reference: FrameReference<F>) -> bool {
        self.tx.send(reference).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// [`FrameReader`] fed through a bounded channel.
pub struct ChannelReader<F> {
    rx: mpsc::Receiver<FrameReference<F>>,
}

#[async_trait]
impl<F: Send> FrameReader<F> for ChannelReader<F> {
    async fn next_arrival(&mut self) -> Option<FrameReference<F>> {
        self.rx.recv().await
    }
}

/// Create a notifier/reader pair holding at most `capacity` pending notifications.
pub fn frame_channel<F>(capacity: usize) -> (FrameNotifier<F>, ChannelReader<F>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameNotifier { tx }, ChannelReader { rx })
}

/// A color, depth or infrared frame.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub data: Bytes,
}

impl ImageFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Copy the raw samples into `dst`, which must be exactly the frame size.
    pub fn copy_frame_data_to(&self, dst: &mut [u8]) -> Result<(), DriverError> {
        if dst.len() != self.data.len() {
            return Err(DriverError::BufferSize { expected: dst.len(), actual: self.data.len() });
        }
        dst.copy_from_slice(&self.data);
        Ok(())
    }
}

/// Body tracker output for one tick.
#[derive(Debug, Clone, Default)]
pub struct BodyFrame {
    pub bodies: Vec<TrackedBody>,
}

impl BodyFrame {
    /// Overwrite `slots` with this frame's bodies. Slots the frame does not
    /// cover become untracked.
    pub fn refresh_body_data(&self, slots: &mut [TrackedBody]) {
        for (index, slot) in slots.iter_mut().enumerate() {
            *slot = self.bodies.get(index).cloned().unwrap_or_default();
        }
    }
}

/// Output of one face tracking slot; `result` is absent while the slot has no face.
#[derive(Debug, Clone, Default)]
pub struct FaceFrame {
    pub result: Option<FaceResult>,
}

#[derive(Debug, Clone, Default)]
pub struct AudioBeamFrame {
    pub sub_frames: Vec<AudioSubFrame>,
}

/// Frames of every audio beam delivered together.
#[derive(Debug, Clone, Default)]
pub struct AudioBeamFrameList {
    pub beams: Vec<AudioBeamFrame>,
}

/// One face tracking slot, bound to a body slot of the same index.
pub trait FaceSource: Send + Sync {
    fn slot(&self) -> usize;

    /// Body this slot follows, if one was assigned.
    fn tracking_id(&self) -> Option<u64>;

    fn set_tracking_id(&self, tracking_id: u64);

    fn open_reader(&self) -> Option<Box<dyn FrameReader<FaceFrame>>>;
}

/// A multi-modal sensor device.
pub trait SensorDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Open the device. Fails with [`DriverError::NotFound`] when no device is attached.
    fn open(&self) -> Result<(), DriverError>;

    /// Close the device; open readers end after draining.
    fn close(&self);

    fn is_available(&self) -> bool;

    /// Availability changes.
    fn availability(&self) -> watch::Receiver<bool>;

    /// Number of body slots reported by the tracker.
    fn body_count(&self) -> usize;

    fn frame_geometry(&self, modality: Modality) -> Option<FrameGeometry>;

    fn open_image_reader(&self, modality: Modality) -> Option<Box<dyn FrameReader<ImageFrame>>>;

    fn open_body_reader(&self) -> Option<Box<dyn FrameReader<BodyFrame>>>;

    /// Format of the audio source, `None` when the device has no audio source.
    fn audio_format(&self) -> Option<AudioFormat>;

    fn open_audio_reader(&self) -> Option<Box<dyn FrameReader<AudioBeamFrameList>>>;

    fn create_face_source(&self, slot: usize, features: FaceFeatures) -> Option<Arc<dyn FaceSource>>;

    fn installed_recognizers(&self) -> Result<Vec<RecognizerInfo>, DriverError>;

    fn open_speech_engine(&self, recognizer: &RecognizerInfo) -> Option<Box<dyn SpeechEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_rejects_wrong_size() {
        let frame = ImageFrame::new(vec![1u8; 8]);
        let mut dst = vec![0u8; 6];
        assert_eq!(
            frame.copy_frame_data_to(&mut dst),
            Err(DriverError::BufferSize { expected: 6, actual: 8 })
        );

        let mut dst = vec![0u8; 8];
        frame.copy_frame_data_to(&mut dst).unwrap();
        assert_eq!(dst, vec![1u8; 8]);
    }

    #[test]
    fn test_refresh_clears_uncovered_slots() {
        let frame = BodyFrame { bodies: vec![TrackedBody::tracked(3)] };
        let mut slots = vec![TrackedBody::tracked(9); 3];
        frame.refresh_body_data(&mut slots);
        assert_eq!(slots[0].tracking_id, 3);
        assert!(!slots[1].is_tracked);
        assert!(!slots[2].is_tracked);
    }

    #[tokio::test]
    async fn test_channel_reader_ends_when_notifier_dropped() {
        let (notifier, mut reader) = frame_channel::<u32>(2);
        assert!(notifier.notify(FrameReference::ready(1)));
        assert!(notifier.notify(FrameReference::expired()));
        // queue full
        assert!(!notifier.notify(FrameReference::ready(3)));
        drop(notifier);

        assert_eq!(reader.next_arrival().await.unwrap().acquire(), Ok(Some(1)));
        assert_eq!(reader.next_arrival().await.unwrap().acquire(), Ok(None));
        assert!(reader.next_arrival().await.is_none());
    }
}
