//! Domain types shared by the codec, correlation engine and modality handlers.
//!
//! Structured types serialize with the field names downstream clients of the
//! bridge already parse (`TrackingId`, `Joints`, `BodyTrackingId`, ...).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One sensing channel of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Color,
    Depth,
    Infrared,
    Body,
    Face,
    Audio,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::Color,
        Modality::Depth,
        Modality::Infrared,
        Modality::Body,
        Modality::Face,
        Modality::Audio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Modality::Color => "color",
            Modality::Depth => "depth",
            Modality::Infrared => "infrared",
            Modality::Body => "body",
            Modality::Face => "face",
            Modality::Audio => "audio",
        }
    }

    /// Modalities published as raw [`crate::codec::WirePacker`] buffers.
    pub fn is_image(&self) -> bool {
        matches!(self, Modality::Color | Modality::Depth | Modality::Infrared)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed frame geometry of an image modality, discovered when its reader is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self { width, height, bytes_per_pixel }
    }

    /// BGRA color at 1920x1080.
    pub const COLOR_1080P: FrameGeometry = FrameGeometry::new(1920, 1080, 4);
    /// 16-bit depth at 512x424.
    pub const DEPTH_512: FrameGeometry = FrameGeometry::new(512, 424, 2);
    /// 16-bit infrared at 512x424.
    pub const INFRARED_512: FrameGeometry = FrameGeometry::new(512, 424, 2);

    /// Size of one frame's raw samples in bytes.
    pub fn sample_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.bytes_per_pixel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandState {
    #[default]
    Unknown,
    NotTracked,
    Open,
    Closed,
    Lasso,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraSpacePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Joint {
    pub joint_type: String,
    pub position: CameraSpacePoint,
    pub tracking_state: TrackingState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JointOrientation {
    pub joint_type: String,
    pub orientation: Quaternion,
}

/// A skeletal subject reported by the body tracker.
///
/// Joint and pose data are passed through from the driver untouched; the
/// bridge itself only looks at `tracking_id` and `is_tracked`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackedBody {
    pub tracking_id: u64,
    pub is_tracked: bool,
    pub is_restricted: bool,
    pub joints: BTreeMap<String, Joint>,
    pub joint_orientations: BTreeMap<String, JointOrientation>,
    pub hand_left_state: HandState,
    pub hand_right_state: HandState,
    pub lean: PointF,
    pub lean_tracking_state: TrackingState,
    pub clipped_edges: u32,
}

impl TrackedBody {
    /// An occupied slot whose subject is currently followed by the tracker.
    pub fn tracked(tracking_id: u64) -> Self {
        Self { tracking_id, is_tracked: true, ..Default::default() }
    }

    /// An empty slot.
    pub fn untracked() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaceProperty {
    Happy,
    Engaged,
    WearingGlasses,
    LeftEyeClosed,
    RightEyeClosed,
    MouthOpen,
    MouthMoved,
    LookingAway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectionResult {
    #[default]
    Unknown,
    No,
    Maybe,
    Yes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FacePointType {
    EyeLeft,
    EyeRight,
    Nose,
    MouthCornerLeft,
    MouthCornerRight,
}

/// Features requested from every face tracking slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceFeatures {
    pub bounding_box_in_color_space: bool,
    pub bounding_box_in_infrared_space: bool,
    pub points_in_color_space: bool,
    pub points_in_infrared_space: bool,
    pub rotation_orientation: bool,
    pub engagement: bool,
    pub glasses: bool,
    pub happy: bool,
    pub left_eye_closed: bool,
    pub right_eye_closed: bool,
    pub looking_away: bool,
    pub mouth_moved: bool,
    pub mouth_open: bool,
}

impl FaceFeatures {
    pub const ALL: FaceFeatures = FaceFeatures {
        bounding_box_in_color_space: true,
        bounding_box_in_infrared_space: true,
        points_in_color_space: true,
        points_in_infrared_space: true,
        rotation_orientation: true,
        engagement: true,
        glasses: true,
        happy: true,
        left_eye_closed: true,
        right_eye_closed: true,
        looking_away: true,
        mouth_moved: true,
        mouth_open: true,
    };
}

/// Output of one face tracking slot for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub tracking_id: u64,
    pub orientation: Quaternion,
    pub properties: BTreeMap<FaceProperty, DetectionResult>,
    pub points: BTreeMap<FacePointType, PointF>,
}

/// Statistical link between an audio beam and a tracked body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioBodyCorrelation {
    pub body_tracking_id: u64,
    pub weight: f32,
}

/// One analysis window of a steered audio beam.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSubFrame {
    /// Beam direction in radians.
    pub beam_angle: f32,
    pub beam_angle_confidence: f32,
    pub samples: Vec<f32>,
    pub correlations: Vec<AudioBodyCorrelation>,
    /// Offset of this sub-frame from the start of the audio stream.
    pub relative_time: Duration,
}

/// Fixed audio stream format of the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sampling_frequency: u32,
    pub frame_lifetime_secs: f64,
}

impl AudioFormat {
    pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

    /// Number of samples in one sub-frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sampling_frequency as f64 * self.frame_lifetime_secs).round() as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self { sampling_frequency: 16_000, frame_lifetime_secs: 0.016 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_geometry_sample_len() {
        assert_eq!(FrameGeometry::COLOR_1080P.sample_len(), 1920 * 1080 * 4);
    }

    #[test]
    fn test_default_audio_frame_length() {
        assert_eq!(AudioFormat::default().samples_per_frame(), 256);
    }

    #[test]
    fn test_body_serializes_with_client_field_names() {
        let json = serde_json::to_value(TrackedBody::tracked(7)).unwrap();
        assert_eq!(json["TrackingId"], 7);
        assert_eq!(json["IsTracked"], true);
        assert!(json["Joints"].is_object());
    }

    #[test]
    fn test_modality_names_are_unique() {
        let mut names: Vec<_> = Modality::ALL.iter().map(|m| m.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
