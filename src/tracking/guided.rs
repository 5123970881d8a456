//! Guided matching and localization against the current map.
//!
//! Instead of matching every detected keypoint against every landmark, the
//! landmarks are first projected into the image with the current pose estimate;
//! candidates are then searched in a 2D radius around each keypoint. Pose
//! estimation refines the motion prior with Huber-weighted Gauss-Newton and
//! splits correspondences into inliers/outliers at a pixel threshold.

use nalgebra::{Matrix2x3, Matrix6, SMatrix, Vector3, Vector6};

use crate::features::{match_descriptors, KeypointsData};
use crate::geometry::{compute_essential, hat, triangulate, PinholeCamera, SE3};
use crate::io::Calibration;
use crate::map::types::{
    Corners, FrameCamId, LandmarkMatchData, MatchData, ProjectedCandidate, TrackId,
};
use crate::map::{Landmark, Landmarks};

/// Project all landmarks in front of the camera into the image.
pub fn project_landmarks(
    t_w_c: &SE3,
    cam: &PinholeCamera,
    landmarks: &Landmarks,
    cam_z_threshold: f64,
) -> Vec<ProjectedCandidate> {
    let t_c_w = t_w_c.inverse();
    let mut projected = Vec::new();
    for (track_id, lm) in landmarks {
        let p_c = t_c_w.transform_point(&lm.p);
        if p_c.z < cam_z_threshold {
            continue;
        }
        let point = cam.project(&p_c);
        if !cam.in_image(&point) {
            continue;
        }
        projected.push(ProjectedCandidate {
            point,
            track_id: *track_id,
        });
    }
    projected
}

/// Stereo matching for one frame: brute-force descriptor matching followed by
/// an epipolar-constraint filter against the known rig extrinsic.
pub fn match_stereo(
    kd_l: &KeypointsData,
    kd_r: &KeypointsData,
    calib: &Calibration,
    feature_match_max_dist: u32,
    feature_match_test_next_best: f64,
    epipolar_error_threshold: f64,
    md: &mut MatchData,
) {
    md.t_i_j = calib.t_0_1();
    match_descriptors(
        &kd_l.corner_descriptors,
        &kd_r.corner_descriptors,
        feature_match_max_dist,
        feature_match_test_next_best,
        &mut md.matches,
    );

    let e = compute_essential(&md.t_i_j);
    md.inliers.clear();
    for &(fl, fr) in &md.matches {
        let bl = calib.intrinsics[0].unproject(&kd_l.corners[fl]);
        let br = calib.intrinsics[1].unproject(&kd_r.corners[fr]);
        if bl.dot(&(e * br)).abs() <= epipolar_error_threshold {
            md.inliers.push((fl, fr));
        }
    }
}

/// Match detected keypoints against projected landmarks: for each keypoint,
/// candidates within `match_max_dist_2d` pixels are scored by the minimum
/// descriptor distance over the landmark's stored observations, with a
/// next-best-ratio test over competing landmarks.
pub fn find_matches_landmarks(
    kd: &KeypointsData,
    landmarks: &Landmarks,
    corners: &Corners,
    projected: &[ProjectedCandidate],
    match_max_dist_2d: f64,
    feature_match_max_dist: u32,
    feature_match_test_next_best: f64,
    md: &mut LandmarkMatchData,
) {
    md.matches.clear();

    for (feature_id, (uv, desc)) in kd
        .corners
        .iter()
        .zip(&kd.corner_descriptors)
        .enumerate()
    {
        let mut best = u32::MAX;
        let mut second = u32::MAX;
        let mut best_track: Option<TrackId> = None;

        for cand in projected {
            if (cand.point - uv).norm() > match_max_dist_2d {
                continue;
            }
            let Some(lm) = landmarks.get(&cand.track_id) else {
                continue;
            };

            let mut dist = u32::MAX;
            for (obs_fcid, obs_feature) in lm.obs() {
                if let Some(obs_kd) = corners.get(obs_fcid) {
                    dist = dist.min(desc.distance(&obs_kd.corner_descriptors[*obs_feature]));
                }
            }

            if dist < best {
                second = best;
                best = dist;
                best_track = Some(cand.track_id);
            } else if dist < second {
                second = dist;
            }
        }

        if let Some(track_id) = best_track {
            if best <= feature_match_max_dist
                && (best as f64) * feature_match_test_next_best <= second as f64
            {
                md.matches.push((feature_id, track_id));
            }
        }
    }
}

/// Localize one camera from 2D-3D correspondences, starting at the motion
/// prior. Gauss-Newton with a Huber kernel; correspondences within the pixel
/// threshold of the refined pose become inliers.
pub fn localize_camera(
    prior_t_w_c: &SE3,
    cam: &PinholeCamera,
    kd: &KeypointsData,
    landmarks: &Landmarks,
    reprojection_error_pnp_inlier_threshold_pixel: f64,
    md: &mut LandmarkMatchData,
) {
    md.inliers.clear();
    if md.matches.is_empty() {
        md.t_w_c = prior_t_w_c.clone();
        return;
    }

    let huber = reprojection_error_pnp_inlier_threshold_pixel;
    let mut t_c_w = prior_t_w_c.inverse();

    for _ in 0..10 {
        let mut h = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();

        for &(feature_id, track_id) in &md.matches {
            let Some(lm) = landmarks.get(&track_id) else {
                continue;
            };
            let p_c = t_c_w.transform_point(&lm.p);
            if p_c.z <= 1e-6 {
                continue;
            }
            let r = cam.project(&p_c) - kd.corners[feature_id];

            let e = r.norm();
            let w = if e <= huber { 1.0 } else { huber / e };

            let j_proj = projection_jacobian(cam, &p_c);
            let mut jac = SMatrix::<f64, 2, 6>::zeros();
            jac.fixed_view_mut::<2, 3>(0, 0)
                .copy_from(&(j_proj * (-hat(&p_c))));
            jac.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);

            h += w * jac.transpose() * jac;
            b += w * jac.transpose() * r;
        }

        for i in 0..6 {
            h[(i, i)] += 1e-9;
        }
        let Some(chol) = h.cholesky() else {
            break;
        };
        let delta = chol.solve(&(-b));
        t_c_w = t_c_w.update_left(
            &Vector3::new(delta[0], delta[1], delta[2]),
            &Vector3::new(delta[3], delta[4], delta[5]),
        );
        if delta.norm() < 1e-10 {
            break;
        }
    }

    md.t_w_c = t_c_w.inverse();
    for &(feature_id, track_id) in &md.matches {
        let Some(lm) = landmarks.get(&track_id) else {
            continue;
        };
        let p_c = t_c_w.transform_point(&lm.p);
        if p_c.z <= 1e-6 {
            continue;
        }
        let err = (cam.project(&p_c) - kd.corners[feature_id]).norm();
        if err <= reprojection_error_pnp_inlier_threshold_pixel {
            md.inliers.push((feature_id, track_id));
        }
    }
}

/// Grow the map at a keyframe: add observations for stereo features already
/// explained by a track, then triangulate the remaining verified stereo
/// correspondences into new landmarks with fresh ids.
#[allow(clippy::too_many_arguments)]
pub fn add_new_landmarks(
    fcid_l: FrameCamId,
    fcid_r: FrameCamId,
    kd_l: &KeypointsData,
    kd_r: &KeypointsData,
    calib: &Calibration,
    stereo: &MatchData,
    lmd: &LandmarkMatchData,
    landmarks: &mut Landmarks,
    next_track_id: &mut TrackId,
) -> usize {
    let t_0_1 = calib.t_0_1();
    let mut consumed = vec![false; kd_l.len()];

    // Existing tracks: record the new observations.
    for &(feature_l, track_id) in &lmd.inliers {
        let Some(lm) = landmarks.get_mut(&track_id) else {
            continue;
        };
        lm.add_obs(fcid_l, feature_l);
        consumed[feature_l] = true;
        if let Some(&(_, feature_r)) = stereo.inliers.iter().find(|(fl, _)| *fl == feature_l) {
            lm.add_obs(fcid_r, feature_r);
        }
    }

    // Unexplained stereo inliers become new landmarks.
    let mut added = 0;
    for &(feature_l, feature_r) in &stereo.inliers {
        if consumed[feature_l] {
            continue;
        }
        let bl = calib.intrinsics[0].unproject(&kd_l.corners[feature_l]);
        let br = calib.intrinsics[1].unproject(&kd_r.corners[feature_r]);
        let Some(p_c0) = triangulate(&bl, &br, &t_0_1) else {
            continue;
        };
        if p_c0.z <= 0.0 || !p_c0.z.is_finite() {
            continue;
        }

        let mut lm = Landmark::new(lmd.t_w_c.transform_point(&p_c0));
        lm.add_obs(fcid_l, feature_l);
        lm.add_obs(fcid_r, feature_r);
        landmarks.insert(*next_track_id, lm);
        *next_track_id += 1;
        added += 1;
    }
    added
}

fn projection_jacobian(cam: &PinholeCamera, p_c: &Vector3<f64>) -> Matrix2x3<f64> {
    let z_inv = 1.0 / p_c.z;
    let z_inv2 = z_inv * z_inv;
    Matrix2x3::new(
        cam.fx * z_inv,
        0.0,
        -cam.fx * p_c.x * z_inv2,
        0.0,
        cam.fy * z_inv,
        -cam.fy * p_c.y * z_inv2,
    )
}
