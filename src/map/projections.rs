//! Reprojection cache: per-image arena of value records, recomputed from the
//! current cameras and landmarks. Used for outlier bookkeeping and reporting.

use std::collections::BTreeMap;

use nalgebra::{Vector2, Vector3};

use super::landmark::{Cameras, Landmarks};
use super::types::{Corners, FrameCamId, TrackId};
use crate::geometry::PinholeCamera;

/// One reprojected landmark observation.
#[derive(Debug, Clone)]
pub struct ProjectedLandmark {
    pub track_id: TrackId,
    pub point_measured: Vector2<f64>,
    pub point_reprojected: Vector2<f64>,
    pub point_3d_c: Vector3<f64>,
    pub reprojection_error: f64,
    pub is_outlier: bool,
}

/// Reprojections of all landmark observations, indexed by image.
pub type ImageProjections = BTreeMap<FrameCamId, Vec<ProjectedLandmark>>;

/// Recompute the full projection cache.
pub fn compute_projections(
    cameras: &Cameras,
    landmarks: &Landmarks,
    corners: &Corners,
    intrinsics: &[PinholeCamera],
) -> ImageProjections {
    let mut projections = ImageProjections::new();

    for (track_id, lm) in landmarks {
        let sets = [(lm.obs(), false), (lm.outlier_obs(), true)];
        for (set, is_outlier) in sets {
            for (fcid, feature) in set {
                let Some(cam) = cameras.get(fcid) else {
                    continue;
                };
                let Some(kd) = corners.get(fcid) else {
                    continue;
                };
                let point_measured = kd.corners[*feature];
                let p_c = cam.t_w_c.inverse().transform_point(&lm.p);
                let point_reprojected = intrinsics[fcid.cam_id].project(&p_c);
                let reprojection_error = (point_measured - point_reprojected).norm();

                projections.entry(*fcid).or_default().push(ProjectedLandmark {
                    track_id: *track_id,
                    point_measured,
                    point_reprojected,
                    point_3d_c: p_c,
                    reprojection_error,
                    is_outlier,
                });
            }
        }
    }
    projections
}

/// Move observations across the obs/outlier boundary by reprojection error.
/// Returns the number of observations that changed side.
pub fn reflag_outliers(
    cameras: &Cameras,
    landmarks: &mut Landmarks,
    corners: &Corners,
    intrinsics: &[PinholeCamera],
    threshold_px: f64,
) -> usize {
    let mut changed = 0;

    for lm in landmarks.values_mut() {
        let mut demote = Vec::new();
        let mut promote = Vec::new();

        let classify = |fcid: &FrameCamId, feature: usize| -> Option<bool> {
            let cam = cameras.get(fcid)?;
            let kd = corners.get(fcid)?;
            let p_c = cam.t_w_c.inverse().transform_point(&lm.p);
            if p_c.z <= 0.0 {
                return Some(false);
            }
            let reproj = intrinsics[fcid.cam_id].project(&p_c);
            Some((kd.corners[feature] - reproj).norm() <= threshold_px)
        };

        for (fcid, feature) in lm.obs() {
            if classify(fcid, *feature) == Some(false) {
                demote.push(*fcid);
            }
        }
        for (fcid, feature) in lm.outlier_obs() {
            if classify(fcid, *feature) == Some(true) {
                promote.push(*fcid);
            }
        }

        for fcid in demote {
            lm.mark_outlier(fcid);
            changed += 1;
        }
        for fcid in promote {
            lm.mark_inlier(fcid);
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::KeypointsData;
    use crate::map::landmark::{Camera, Landmark};
    use crate::map::types::FrameCamId;

    fn cam() -> PinholeCamera {
        PinholeCamera {
            fx: 400.0,
            fy: 400.0,
            cx: 376.0,
            cy: 240.0,
            width: 752.0,
            height: 480.0,
        }
    }

    #[test]
    fn reflag_moves_bad_observation_to_outliers() {
        let intrinsics = vec![cam()];
        let fcid = FrameCamId::new(0, 0);

        let mut cameras = Cameras::new();
        cameras.insert(fcid, Camera::default());

        let p = nalgebra::Vector3::new(0.0, 0.0, 2.0);
        let mut lm = Landmark::new(p);
        lm.add_obs(fcid, 0);
        let mut landmarks = Landmarks::new();
        landmarks.insert(0, lm);

        // Measured corner displaced 20 px from the true projection.
        let mut kd = KeypointsData::default();
        let true_uv = intrinsics[0].project(&p);
        kd.corners.push(true_uv + nalgebra::Vector2::new(20.0, 0.0));
        kd.corner_angles.push(0.0);
        kd.corner_descriptors.push(Default::default());
        let mut corners = Corners::new();
        corners.insert(fcid, kd);

        let changed = reflag_outliers(&cameras, &mut landmarks, &corners, &intrinsics, 3.0);
        assert_eq!(changed, 1);
        let lm = &landmarks[&0];
        assert!(lm.obs().is_empty());
        assert!(lm.outlier_obs().contains_key(&fcid));

        let proj = compute_projections(&cameras, &landmarks, &corners, &intrinsics);
        let recs = &proj[&fcid];
        assert_eq!(recs.len(), 1);
        assert!(recs[0].is_outlier);
        assert!((recs[0].reprojection_error - 20.0).abs() < 1e-9);
    }
}
