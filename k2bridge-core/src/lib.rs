//! k2bridge-core: wire formats and correlation for a multi-modal sensor bridge
//!
//! Provides:
//! - Binary wire buffers for color, depth and infrared frames
//! - Single-line JSON records for body, face and audio channels
//! - Body-attributed audio energy
//! - The shared tracked-body snapshot
//! - Bridge configuration

pub mod error;
pub mod types;
pub mod codec;
pub mod record;
pub mod correlation;
pub mod snapshot;
pub mod config;

pub use error::{Error, Result};
pub use types::{
    AudioBodyCorrelation, AudioFormat, AudioSubFrame, FaceFeatures, FaceResult, FrameGeometry,
    Modality, TrackedBody,
};
pub use codec::{split_wire_buffer, WirePacker, TIMESTAMP_LEN};
pub use record::{to_line, AudioRecord, BodyRecord, FaceRecord};
pub use correlation::{aggregate_volume, mean_square, VolumeWeighting};
pub use snapshot::{BodySnapshot, SharedBodies};
pub use config::BridgeConfig;

/// Current wall-clock time as UTC seconds since the Unix epoch.
pub fn utc_now_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
}
