//! Single-line text records for the body, face and audio channels.
//!
//! Every record is one JSON object terminated by `\n`. Required fields are
//! always written, with empty sequences standing in for absent sub-data.

use crate::error::Result;
use crate::types::{
    AudioBodyCorrelation, AudioFormat, DetectionResult, FacePointType, FaceProperty, FaceResult,
    PointF, Quaternion, TrackedBody,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;

/// Serialize `record` as one newline-terminated JSON line.
pub fn to_line<T: Serialize>(record: &T) -> Result<Bytes> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// `{"Time": T, "Bodies": [...]}` with only tracked bodies listed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BodyRecord<'a> {
    pub time: f64,
    pub bodies: Vec<&'a TrackedBody>,
}

impl<'a> BodyRecord<'a> {
    /// Build from a full slot array; untracked slots are left out.
    pub fn from_slots(time: f64, slots: &'a [TrackedBody]) -> Self {
        Self {
            time,
            bodies: slots.iter().filter(|body| body.is_tracked).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceRecord<'a> {
    pub time: f64,
    pub tracking_id: u64,
    pub orientation: &'a Quaternion,
    pub properties: &'a BTreeMap<FaceProperty, DetectionResult>,
    pub points: &'a BTreeMap<FacePointType, PointF>,
}

impl<'a> FaceRecord<'a> {
    pub fn new(time: f64, result: &'a FaceResult) -> Self {
        Self {
            time,
            tracking_id: result.tracking_id,
            orientation: &result.orientation,
            properties: &result.properties,
            points: &result.points,
        }
    }
}

/// Per sub-frame audio record.
///
/// The leading camelCase fields describe the audio stream and the sub-frame;
/// the PascalCase tail carries correlation, timing and loudness.
#[derive(Debug, Serialize)]
pub struct AudioRecord<'a> {
    #[serde(rename = "samplingFrequency")]
    pub sampling_frequency: u32,
    #[serde(rename = "frameLifeTime")]
    pub frame_lifetime: f64,
    #[serde(rename = "numSamplesPerFrame")]
    pub num_samples_per_frame: usize,
    #[serde(rename = "numBytesPerSample")]
    pub num_bytes_per_sample: usize,
    #[serde(rename = "audioStream")]
    pub audio_stream: &'a [f32],
    #[serde(rename = "utcTime")]
    pub utc_time: f64,
    #[serde(rename = "beamAngle")]
    pub beam_angle: f32,
    #[serde(rename = "beamAngleConfidence")]
    pub beam_angle_confidence: f32,
    #[serde(rename = "Correlations")]
    pub correlations: &'a [AudioBodyCorrelation],
    /// Capture time of the beam frame list this sub-frame arrived in.
    #[serde(rename = "Time")]
    pub time: f64,
    /// Sub-frame offset in milliseconds.
    #[serde(rename = "RelativeTime")]
    pub relative_time_ms: f64,
    #[serde(rename = "Volume")]
    pub volume: f32,
}

impl<'a> AudioRecord<'a> {
    pub fn describe(format: &AudioFormat, audio_stream: &'a [f32]) -> AudioRecordBuilder<'a> {
        AudioRecordBuilder {
            format: *format,
            audio_stream,
        }
    }
}

/// Fills the stream description so handlers only supply per sub-frame values.
pub struct AudioRecordBuilder<'a> {
    format: AudioFormat,
    audio_stream: &'a [f32],
}

impl<'a> AudioRecordBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        self,
        utc_time: f64,
        beam_angle: f32,
        beam_angle_confidence: f32,
        correlations: &'a [AudioBodyCorrelation],
        time: f64,
        relative_time_ms: f64,
        volume: f32,
    ) -> AudioRecord<'a> {
        AudioRecord {
            sampling_frequency: self.format.sampling_frequency,
            frame_lifetime: self.format.frame_lifetime_secs,
            num_samples_per_frame: self.format.samples_per_frame(),
            num_bytes_per_sample: AudioFormat::BYTES_PER_SAMPLE,
            audio_stream: self.audio_stream,
            utc_time,
            beam_angle,
            beam_angle_confidence,
            correlations,
            time,
            relative_time_ms,
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(line: &Bytes) -> Value {
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        serde_json::from_slice(&line[..line.len() - 1]).unwrap()
    }

    #[test]
    fn test_body_record_lists_only_tracked() {
        let slots = vec![TrackedBody::tracked(7), TrackedBody::untracked()];
        let line = to_line(&BodyRecord::from_slots(12.5, &slots)).unwrap();
        let json = parse(&line);

        assert_eq!(json["Time"], 12.5);
        let bodies = json["Bodies"].as_array().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["TrackingId"], 7);
    }

    #[test]
    fn test_body_record_empty_list_is_kept() {
        let slots = vec![TrackedBody::untracked(); 6];
        let json = parse(&to_line(&BodyRecord::from_slots(1.0, &slots)).unwrap());
        assert_eq!(json["Bodies"], Value::Array(vec![]));
    }

    #[test]
    fn test_face_record_fields() {
        let mut result = FaceResult {
            tracking_id: 42,
            orientation: Quaternion::default(),
            properties: BTreeMap::new(),
            points: BTreeMap::new(),
        };
        result.properties.insert(FaceProperty::Happy, DetectionResult::Yes);
        result.points.insert(FacePointType::Nose, PointF { x: 10.0, y: 20.0 });

        let json = parse(&to_line(&FaceRecord::new(3.0, &result)).unwrap());
        assert_eq!(json["TrackingId"], 42);
        assert_eq!(json["Orientation"]["W"], 1.0);
        assert_eq!(json["Properties"]["Happy"], "Yes");
        assert_eq!(json["Points"]["Nose"]["X"], 10.0);
    }

    #[test]
    fn test_audio_record_without_correlations() {
        let samples = vec![0.0f32; 4];
        let record = AudioRecord::describe(&AudioFormat::default(), &samples)
            .build(100.0, 0.5, 0.9, &[], 99.0, 16.0, 0.0);
        let json = parse(&to_line(&record).unwrap());

        assert_eq!(json["Correlations"], Value::Array(vec![]));
        assert_eq!(json["numSamplesPerFrame"], 256);
        assert_eq!(json["numBytesPerSample"], 4);
        assert_eq!(json["audioStream"].as_array().unwrap().len(), 4);
        assert_eq!(json["RelativeTime"], 16.0);
        assert_eq!(json["Volume"], 0.0);
    }
}
