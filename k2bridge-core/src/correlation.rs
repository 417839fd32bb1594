//! Body-attributed audio energy.
//!
//! A sub-frame's volume is the mean-square energy of its samples over the whole
//! sub-frame, attributed to the beam only when at least one of the beam's
//! correlations names a body tracked in the current snapshot.

use crate::snapshot::BodySnapshot;
use crate::types::AudioBodyCorrelation;
use serde::{Deserialize, Serialize};

/// How matched correlations scale the sub-frame energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeWeighting {
    /// Full energy once any correlation matches a tracked body.
    #[default]
    Identity,
    /// Energy scaled by the summed weight of matched correlations.
    Correlation,
}

/// Mean-square energy of `samples`. Non-finite samples count as silence.
pub fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| if s.is_finite() { s as f64 * s as f64 } else { 0.0 })
        .sum();
    (sum / samples.len() as f64) as f32
}

/// Correlations whose body is tracked in `snapshot`.
pub fn matched_correlations<'a>(
    correlations: &'a [AudioBodyCorrelation],
    snapshot: &'a BodySnapshot,
) -> impl Iterator<Item = &'a AudioBodyCorrelation> + 'a {
    correlations
        .iter()
        .filter(move |c| snapshot.find_tracked(c.body_tracking_id).is_some())
}

/// Aggregated volume of one sub-frame. Always finite and non-negative.
pub fn aggregate_volume(
    samples: &[f32],
    correlations: &[AudioBodyCorrelation],
    snapshot: &BodySnapshot,
    weighting: VolumeWeighting,
) -> f32 {
    let factor = match weighting {
        VolumeWeighting::Identity => {
            if matched_correlations(correlations, snapshot).next().is_some() {
                1.0
            } else {
                0.0
            }
        }
        VolumeWeighting::Correlation => matched_correlations(correlations, snapshot)
            .map(|c| if c.weight.is_finite() { c.weight.max(0.0) } else { 0.0 })
            .sum::<f32>(),
    };
    if factor == 0.0 {
        return 0.0;
    }

    let volume = mean_square(samples) * factor;
    if volume.is_finite() {
        volume
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackedBody;

    fn snapshot_with(ids: &[u64]) -> BodySnapshot {
        BodySnapshot::new(1, ids.iter().map(|&id| TrackedBody::tracked(id)).collect())
    }

    fn corr(id: u64, weight: f32) -> AudioBodyCorrelation {
        AudioBodyCorrelation { body_tracking_id: id, weight }
    }

    #[test]
    fn test_mean_square_over_whole_window() {
        assert_eq!(mean_square(&[1.0, -1.0, 1.0, -1.0]), 1.0);
        assert_eq!(mean_square(&[2.0, 0.0, 0.0, 0.0]), 1.0);
        assert_eq!(mean_square(&[]), 0.0);
    }

    #[test]
    fn test_mean_square_ignores_non_finite() {
        assert_eq!(mean_square(&[f32::NAN, 2.0]), 2.0);
        assert_eq!(mean_square(&[f32::INFINITY]), 0.0);
    }

    #[test]
    fn test_volume_attributed_to_tracked_body() {
        let snapshot = snapshot_with(&[7]);
        let volume = aggregate_volume(&[0.5; 8], &[corr(7, 0.3)], &snapshot, VolumeWeighting::Identity);
        assert_eq!(volume, 0.25);
    }

    #[test]
    fn test_volume_zero_without_match() {
        let snapshot = snapshot_with(&[7]);
        let volume = aggregate_volume(&[0.5; 8], &[corr(8, 1.0)], &snapshot, VolumeWeighting::Identity);
        assert_eq!(volume, 0.0);
        let volume = aggregate_volume(&[0.5; 8], &[], &snapshot, VolumeWeighting::Identity);
        assert_eq!(volume, 0.0);
    }

    #[test]
    fn test_identity_does_not_double_count() {
        let snapshot = snapshot_with(&[1, 2]);
        let volume = aggregate_volume(
            &[1.0; 4],
            &[corr(1, 0.5), corr(2, 0.5)],
            &snapshot,
            VolumeWeighting::Identity,
        );
        assert_eq!(volume, 1.0);
    }

    #[test]
    fn test_correlation_weighting_scales_energy() {
        let snapshot = snapshot_with(&[1, 2]);
        let correlations = [corr(1, 0.25), corr(2, 0.5), corr(3, 10.0)];
        let volume = aggregate_volume(&[1.0; 4], &correlations, &snapshot, VolumeWeighting::Correlation);
        assert_eq!(volume, 0.75);
    }

    #[test]
    fn test_negative_weights_never_make_volume_negative() {
        let snapshot = snapshot_with(&[1]);
        let volume = aggregate_volume(&[1.0; 4], &[corr(1, -3.0)], &snapshot, VolumeWeighting::Correlation);
        assert_eq!(volume, 0.0);
    }

    #[test]
    fn test_silence_is_exactly_zero() {
        let snapshot = snapshot_with(&[1]);
        for weighting in [VolumeWeighting::Identity, VolumeWeighting::Correlation] {
            assert_eq!(aggregate_volume(&[0.0; 256], &[corr(1, 1.0)], &snapshot, weighting), 0.0);
        }
    }
}
