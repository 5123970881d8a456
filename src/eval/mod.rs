//! Trajectory evaluation: rigid SVD alignment of the estimate against ground
//! truth with timestamp interpolation, reporting the absolute trajectory error.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tracing::info;

use crate::io::{GroundTruthEntry, TrajectorySample};
use crate::map::types::Timestamp;

/// Ground-truth samples further apart than this around an estimate timestamp
/// are considered a gap; the estimate sample is skipped.
const MAX_INTERPOLATION_GAP_NS: i64 = 110_000_000;

/// Rigid transform mapping estimate positions into the ground-truth frame,
/// plus the residual error after alignment.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub rms_ate: f64,
    pub num_associations: usize,
}

/// Umeyama-style alignment (rotation + translation, no scale).
///
/// For each estimate sample, the bracketing ground-truth pair is linearly
/// interpolated at the estimate's timestamp; samples without a bracket or with
/// a bracketing gap beyond [`MAX_INTERPOLATION_GAP_NS`] are skipped. Returns
/// `None` when fewer than three associations survive.
pub fn align_svd(est: &[TrajectorySample], gt: &[GroundTruthEntry]) -> Option<AlignmentResult> {
    let mut est_points: Vec<Vector3<f64>> = Vec::new();
    let mut gt_points: Vec<Vector3<f64>> = Vec::new();

    for sample in est {
        let Some(p_gt) = interpolate_gt(gt, sample.t_ns) else {
            continue;
        };
        est_points.push(sample.t_w_i.translation);
        gt_points.push(p_gt);
    }

    if est_points.len() < 3 {
        return None;
    }

    let n = est_points.len() as f64;
    let mean_est: Vector3<f64> = est_points.iter().sum::<Vector3<f64>>() / n;
    let mean_gt: Vector3<f64> = gt_points.iter().sum::<Vector3<f64>>() / n;

    let mut cov = Matrix3::<f64>::zeros();
    for (e, g) in est_points.iter().zip(&gt_points) {
        cov += (g - mean_gt) * (e - mean_est).transpose();
    }

    let svd = cov.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // Reflection correction: flip the smallest singular direction when the
    // determinant product is negative.
    let mut s = Matrix3::identity();
    if (u.determinant() * v_t.determinant()) < 0.0 {
        s[(2, 2)] = -1.0;
    }
    let r = u * s * v_t;
    let t = mean_gt - r * mean_est;

    let mut sq_sum = 0.0;
    for (e, g) in est_points.iter().zip(&gt_points) {
        sq_sum += (r * e + t - g).norm_squared();
    }
    let rms_ate = (sq_sum / n).sqrt();

    let rotation =
        UnitQuaternion::from_rotation_matrix(&nalgebra::Rotation3::from_matrix_unchecked(r));

    info!(
        associations = est_points.len(),
        rms_ate, "aligned trajectory against ground truth"
    );
    Some(AlignmentResult {
        rotation,
        translation: t,
        rms_ate,
        num_associations: est_points.len(),
    })
}

/// Linear position interpolation at `t_ns`, or `None` without a usable bracket.
fn interpolate_gt(gt: &[GroundTruthEntry], t_ns: Timestamp) -> Option<Vector3<f64>> {
    let idx = gt.partition_point(|e| e.t_ns < t_ns);
    if idx == 0 || idx >= gt.len() {
        return None;
    }
    let (prev, next) = (&gt[idx - 1], &gt[idx]);
    if next.t_ns - prev.t_ns > MAX_INTERPOLATION_GAP_NS {
        return None;
    }
    let alpha = (t_ns - prev.t_ns) as f64 / (next.t_ns - prev.t_ns) as f64;
    Some(
        prev.t_w_i.translation * (1.0 - alpha) + next.t_w_i.translation * alpha,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;

    fn circle_trajectory(n: usize, step_ns: i64) -> Vec<TrajectorySample> {
        (0..n)
            .map(|i| {
                let a = i as f64 * 0.1;
                TrajectorySample {
                    t_ns: i as i64 * step_ns,
                    t_w_i: SE3 {
                        rotation: UnitQuaternion::identity(),
                        translation: Vector3::new(a.cos(), a.sin(), 0.05 * i as f64),
                    },
                }
            })
            .collect()
    }

    fn as_groundtruth(samples: &[TrajectorySample]) -> Vec<GroundTruthEntry> {
        samples
            .iter()
            .map(|s| GroundTruthEntry {
                t_ns: s.t_ns,
                t_w_i: s.t_w_i.clone(),
            })
            .collect()
    }

    #[test]
    fn self_alignment_is_identity_with_zero_error() {
        let est = circle_trajectory(50, 50_000_000);
        let gt = as_groundtruth(&est);

        let result = align_svd(&est, &gt).unwrap();
        assert_eq!(result.num_associations, 49); // first sample has no bracket
        assert!(result.rms_ate < 1e-9, "rms {}", result.rms_ate);
        assert!(result.rotation.angle() < 1e-9);
        assert!(result.translation.norm() < 1e-9);
    }

    #[test]
    fn recovers_known_rigid_offset() {
        let est = circle_trajectory(60, 50_000_000);

        let r = UnitQuaternion::from_scaled_axis(Vector3::new(0.1, -0.2, 0.3));
        let t = Vector3::new(4.0, -1.0, 2.5);
        let gt: Vec<GroundTruthEntry> = est
            .iter()
            .map(|s| GroundTruthEntry {
                t_ns: s.t_ns,
                t_w_i: SE3 {
                    rotation: r,
                    translation: r * s.t_w_i.translation + t,
                },
            })
            .collect();

        let result = align_svd(&est, &gt).unwrap();
        assert!(result.rms_ate < 1e-9, "rms {}", result.rms_ate);
        assert!((result.rotation.inverse() * r).angle() < 1e-9);
        assert!((result.translation - t).norm() < 1e-9);
    }

    #[test]
    fn skips_samples_across_groundtruth_gaps() {
        let est = circle_trajectory(40, 50_000_000);
        // Remove a block of ground truth, creating a > 110 ms hole.
        let mut gt = as_groundtruth(&est);
        gt.drain(10..20);

        let result = align_svd(&est, &gt).unwrap();
        // First sample has no bracket; the 11 estimates spanning the hole are
        // skipped by the gap threshold.
        assert_eq!(result.num_associations, 28);
        assert!(result.rms_ate < 1e-9);
    }

    #[test]
    fn too_few_associations_yield_none() {
        let est = circle_trajectory(2, 50_000_000);
        let gt = as_groundtruth(&est);
        assert!(align_svd(&est, &gt).is_none());
    }
}
