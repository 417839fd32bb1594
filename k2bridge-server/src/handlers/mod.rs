//! Modality handlers
//!
//! A handler turns one frame-arrival notification into zero or more packets
//! on its channel. Handlers are synchronous; [`run_handler`] drives one from
//! its reader on a dedicated task and contains every failure of a single tick
//! except a fatal contract violation.

mod audio;
mod body;
mod face;
mod image;

pub use audio::AudioHandler;
pub use body::BodyHandler;
pub use face::FaceHandler;
pub use image::ImageHandler;

use crate::driver::{FrameReader, FrameReference};
use crate::error::HandlerError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, trace};

/// Source of the `Time` stamped on every packet, in UTC seconds.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(k2bridge_core::utc_now_seconds)
}

/// Why a tick produced no packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The frame expired before it was acquired.
    FrameUnavailable,
    /// A face slot has no face this tick.
    NoFaceResult,
    AcquisitionFailed,
    EmptyBeamList,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::FrameUnavailable => "frame_unavailable",
            SkipReason::NoFaceResult => "no_face_result",
            SkipReason::AcquisitionFailed => "acquisition_failed",
            SkipReason::EmptyBeamList => "empty_beam_list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Number of packets broadcast.
    Published(usize),
    Skipped(SkipReason),
}

pub type TickOutcome = Result<Tick, HandlerError>;

pub trait ModalityHandler: Send {
    type Frame: Send + 'static;

    /// Name used in logs and metrics, e.g. `color` or `face[2]`.
    fn label(&self) -> String;

    fn on_frame_arrived(&mut self, reference: FrameReference<Self::Frame>) -> TickOutcome;
}

/// Tick counters of one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub ticks: u64,
    pub packets: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Drive `handler` until the reader closes or `shutdown` flips.
///
/// Skipped and failed ticks are counted and the loop continues. Only
/// [`HandlerError::Fatal`] ends it early.
pub async fn run_handler<H>(
    mut reader: Box<dyn FrameReader<H::Frame>>,
    mut handler: H,
    mut shutdown: watch::Receiver<bool>,
) -> Result<HandlerStats, HandlerError>
where
    H: ModalityHandler,
{
    let label = handler.label();
    let mut stats = HandlerStats::default();
    debug!("{} handler started", label);

    loop {
        let reference = tokio::select! {
            _ = shutdown.changed() => break,
            arrival = reader.next_arrival() => match arrival {
                Some(reference) => reference,
                None => break,
            },
        };

        stats.ticks += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.on_frame_arrived(reference)));

        match outcome {
            Ok(Ok(Tick::Published(count))) => {
                stats.packets += count as u64;
                metrics::counter!("k2bridge_packets_total", "channel" => label.clone()).increment(count as u64);
            }
            Ok(Ok(Tick::Skipped(reason))) => {
                stats.skipped += 1;
                trace!("{} tick skipped: {}", label, reason.as_str());
                metrics::counter!("k2bridge_ticks_skipped_total", "channel" => label.clone(), "reason" => reason.as_str())
                    .increment(1);
            }
            Ok(Err(HandlerError::Fatal(e))) => {
                error!("{} handler stopping: {}", label, e);
                return Err(HandlerError::Fatal(e));
            }
            Ok(Err(e)) => {
                stats.failed += 1;
                error!("{} tick dropped: {}", label, e);
                metrics::counter!("k2bridge_ticks_failed_total", "channel" => label.clone()).increment(1);
            }
            Err(payload) => {
                stats.failed += 1;
                error!("{} handler panicked: {}", label, panic_message(payload.as_ref()));
                metrics::counter!("k2bridge_ticks_failed_total", "channel" => label.clone()).increment(1);
            }
        }
    }

    debug!("{} handler finished: {:?}", label, stats);
    Ok(stats)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Take the frame behind `reference`, mapping an expired frame to a skip.
fn acquire_or_skip<F>(reference: FrameReference<F>) -> Result<Result<F, Tick>, HandlerError> {
    match reference.acquire()? {
        Some(frame) => Ok(Ok(frame)),
        None => Ok(Err(Tick::Skipped(SkipReason::FrameUnavailable))),
    }
}
