//! Bundle adjustment: joint refinement of camera poses, landmark positions and
//! (optionally) intrinsics and inertial states.
//!
//! Gauss-Newton with per-landmark 3x3 elimination (Schur complement): landmark
//! blocks are inverted independently, the reduced dense system over poses,
//! intrinsics and velocities is solved by Cholesky. Robustness comes from a
//! Huber kernel on the reprojection residuals and a rollback step control.
//!
//! Poses are parameterized per *frame* as the left camera's world-to-camera
//! transform; the right camera is chained through the fixed stereo extrinsic,
//! so the stereo rig stays rigid through optimization.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector, Matrix2x3, Matrix3, SMatrix, SVector, Vector2, Vector3};
use tracing::{debug, info};

use crate::geometry::{hat, PinholeCamera, SE3};
use crate::imu::{IntegratedImuMeasurement, PoseVelState, GRAVITY};
use crate::io::Calibration;
use crate::map::types::{Corners, FrameCamId, FrameId, Timestamp, TrackId};
use crate::map::{Cameras, Landmarks};

/// Optimization tunables.
#[derive(Debug, Clone)]
pub struct BundleAdjustmentOptions {
    pub optimize_intrinsics: bool,
    pub use_huber: bool,
    /// Huber kernel width in pixels.
    pub huber_parameter: f64,
    pub max_num_iterations: usize,
    pub verbosity_level: usize,
}

impl Default for BundleAdjustmentOptions {
    fn default() -> Self {
        Self {
            optimize_intrinsics: false,
            use_huber: true,
            huber_parameter: 1.0,
            max_num_iterations: 20,
            verbosity_level: 1,
        }
    }
}

/// Outcome of one optimization round. Non-convergence is reported, not an error.
#[derive(Debug, Clone)]
pub struct BaStats {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub converged: bool,
}

/// Inertial side of the problem: keyframe states keyed by timestamp, the
/// preintegrated factors linking them (keyed by the *end* timestamp), and the
/// frame-index-to-timestamp mapping.
pub struct InertialContext<'a> {
    pub frame_states: &'a mut BTreeMap<Timestamp, PoseVelState>,
    pub imu_measurements: &'a BTreeMap<Timestamp, IntegratedImuMeasurement>,
    pub timestamps: &'a [Timestamp],
}

struct Observation {
    landmark_idx: usize,
    frame_id: FrameId,
    /// Pose variable index, `None` when the frame is gauge-fixed.
    var_idx: Option<usize>,
    cam_id: usize,
    measured: Vector2<f64>,
}

struct InertialTerm {
    state_i: usize,
    state_j: usize,
    /// Row weights: sqrt of the information diagonal from the preintegrated
    /// covariance.
    sqrt_info: SVector<f64, 9>,
}

const DAMPING: f64 = 1e-8;
const CONVERGENCE_EPS: f64 = 1e-8;

/// Visual-only bundle adjustment.
pub fn bundle_adjustment(
    corners: &Corners,
    options: &BundleAdjustmentOptions,
    fixed_cameras: &BTreeSet<FrameCamId>,
    calib: &mut Calibration,
    cameras: &mut Cameras,
    landmarks: &mut Landmarks,
) -> BaStats {
    optimize(corners, options, fixed_cameras, calib, cameras, landmarks, None)
}

/// Visual-inertial bundle adjustment: reprojection plus preintegration factors,
/// optimizing per-keyframe velocities alongside the poses.
pub fn bundle_adjustment_inertial(
    corners: &Corners,
    options: &BundleAdjustmentOptions,
    fixed_cameras: &BTreeSet<FrameCamId>,
    calib: &mut Calibration,
    cameras: &mut Cameras,
    landmarks: &mut Landmarks,
    inertial: InertialContext<'_>,
) -> BaStats {
    optimize(
        corners,
        options,
        fixed_cameras,
        calib,
        cameras,
        landmarks,
        Some(inertial),
    )
}

#[allow(clippy::too_many_lines)]
fn optimize(
    corners: &Corners,
    options: &BundleAdjustmentOptions,
    fixed_cameras: &BTreeSet<FrameCamId>,
    calib: &mut Calibration,
    cameras: &mut Cameras,
    landmarks: &mut Landmarks,
    mut inertial: Option<InertialContext<'_>>,
) -> BaStats {
    let t_0_1 = calib.t_0_1();
    let t_1_0 = t_0_1.inverse();
    let t_i_c0_inv = calib.t_i_c[0].inverse();

    let fixed_frames: BTreeSet<FrameId> = fixed_cameras.iter().map(|f| f.frame_id).collect();

    // One pose variable per frame with a localized left camera.
    let all_frames: BTreeSet<FrameId> = cameras
        .keys()
        .filter(|f| f.cam_id == 0)
        .map(|f| f.frame_id)
        .collect();
    let var_frames: Vec<FrameId> = all_frames
        .iter()
        .filter(|f| !fixed_frames.contains(f))
        .copied()
        .collect();
    let frame_to_idx: BTreeMap<FrameId, usize> = var_frames
        .iter()
        .enumerate()
        .map(|(i, &f)| (f, i))
        .collect();

    let mut poses_cw: BTreeMap<FrameId, SE3> = all_frames
        .iter()
        .map(|&f| {
            let cam = &cameras[&FrameCamId::new(f, 0)];
            (f, cam.t_w_c.inverse())
        })
        .collect();

    // Landmarks with at least one usable observation, and their observations.
    let lm_ids: Vec<TrackId> = landmarks
        .iter()
        .filter(|(_, lm)| {
            lm.obs()
                .keys()
                .any(|fcid| all_frames.contains(&fcid.frame_id))
        })
        .map(|(id, _)| *id)
        .collect();
    let mut lm_positions: Vec<Vector3<f64>> = lm_ids.iter().map(|id| landmarks[id].p).collect();

    let mut observations = Vec::new();
    for (lm_idx, id) in lm_ids.iter().enumerate() {
        for (fcid, feature) in landmarks[id].obs() {
            if !all_frames.contains(&fcid.frame_id) {
                continue;
            }
            let Some(kd) = corners.get(fcid) else {
                continue;
            };
            observations.push(Observation {
                landmark_idx: lm_idx,
                frame_id: fcid.frame_id,
                var_idx: frame_to_idx.get(&fcid.frame_id).copied(),
                cam_id: fcid.cam_id,
                measured: kd.corners[*feature],
            });
        }
    }

    // Dense variable layout: [poses | intrinsics? | velocities?].
    let num_pose_params = var_frames.len() * 6;
    let num_intr_params = if options.optimize_intrinsics {
        calib.intrinsics.len() * 4
    } else {
        0
    };
    let intr_offset = num_pose_params;

    // Inertial bookkeeping: keyframe states ordered by timestamp, one velocity
    // variable per state whose frame is in the snapshot.
    let mut state_times: Vec<Timestamp> = Vec::new();
    let mut velocities: Vec<Vector3<f64>> = Vec::new();
    let mut state_frame: Vec<FrameId> = Vec::new();
    let mut inertial_terms: Vec<InertialTerm> = Vec::new();

    if let Some(ctx) = inertial.as_ref() {
        let time_to_frame: BTreeMap<Timestamp, FrameId> = ctx
            .timestamps
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i as FrameId))
            .collect();

        for (t_ns, state) in ctx.frame_states.iter() {
            let Some(&frame) = time_to_frame.get(t_ns) else {
                continue;
            };
            if !all_frames.contains(&frame) {
                continue;
            }
            state_times.push(*t_ns);
            velocities.push(state.vel_w_i);
            state_frame.push(frame);
        }

        for idx_i in 0..state_times.len().saturating_sub(1) {
            let idx_j = idx_i + 1;
            let Some(meas) = ctx.imu_measurements.get(&state_times[idx_j]) else {
                continue;
            };
            if meas.dt() <= 0.0 {
                continue;
            }
            let mut sqrt_info = SVector::<f64, 9>::zeros();
            for k in 0..9 {
                sqrt_info[k] = 1.0 / (meas.cov[(k, k)] + 1e-12).sqrt();
            }
            inertial_terms.push(InertialTerm {
                state_i: idx_i,
                state_j: idx_j,
                sqrt_info,
            });
        }
    }

    let vel_offset = num_pose_params + num_intr_params;
    let num_dense = vel_offset + velocities.len() * 3;

    let mut intr = calib.intrinsics.clone();

    let cost_fn = |poses_cw: &BTreeMap<FrameId, SE3>,
                   lm_positions: &[Vector3<f64>],
                   intr: &[PinholeCamera],
                   velocities: &[Vector3<f64>]| {
        let mut cost =
            reprojection_cost(&observations, poses_cw, lm_positions, intr, &t_1_0, options);
        if let Some(ctx) = inertial.as_ref() {
            cost += inertial_cost(
                &inertial_terms,
                &state_times,
                &state_frame,
                poses_cw,
                velocities,
                ctx,
                &t_i_c0_inv,
            );
        }
        cost
    };

    let initial_cost = cost_fn(&poses_cw, &lm_positions, &intr, &velocities);
    let mut current_cost = initial_cost;
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..options.max_num_iterations {
        iterations = iter + 1;

        let num_lm = lm_positions.len();
        let mut h_dd = DMatrix::<f64>::zeros(num_dense, num_dense);
        let mut b_d = DVector::<f64>::zeros(num_dense);
        let mut h_ll: Vec<Matrix3<f64>> = vec![Matrix3::zeros(); num_lm];
        let mut b_l: Vec<Vector3<f64>> = vec![Vector3::zeros(); num_lm];
        let mut h_dl = DMatrix::<f64>::zeros(num_dense, num_lm * 3);

        // Reprojection terms.
        for obs in &observations {
            let t_cw0 = &poses_cw[&obs.frame_id];
            let p_w = lm_positions[obs.landmark_idx];
            let p_c0 = t_cw0.transform_point(&p_w);
            let p_c = if obs.cam_id == 0 {
                p_c0
            } else {
                t_1_0.transform_point(&p_c0)
            };
            if p_c.z <= 1e-6 {
                continue;
            }

            let cam = &intr[obs.cam_id];
            let predicted = cam.project(&p_c);
            let r = predicted - obs.measured;
            let w = huber_weight(r.norm(), options);

            let j_proj = projection_jacobian(cam, &p_c);
            // d residual / d p_c0: for cam 1, chain through the rig rotation.
            let chain = if obs.cam_id == 0 {
                j_proj
            } else {
                j_proj * t_1_0.rotation_matrix()
            };
            let j_lm = chain * t_cw0.rotation_matrix();

            let wj_lm_t = w * j_lm.transpose();
            h_ll[obs.landmark_idx] += wj_lm_t * j_lm;
            b_l[obs.landmark_idx] += wj_lm_t * r;

            // Pose blocks: left-multiplicative delta on T_cw0.
            let mut j_pose = SMatrix::<f64, 2, 6>::zeros();
            if obs.var_idx.is_some() {
                j_pose
                    .fixed_view_mut::<2, 3>(0, 0)
                    .copy_from(&(chain * (-hat(&p_c0))));
                j_pose.fixed_view_mut::<2, 3>(0, 3).copy_from(&chain);
            }

            if let Some(vi) = obs.var_idx {
                let fi = vi * 6;
                let wj_pose_t = w * j_pose.transpose();
                let block = wj_pose_t * j_pose;
                for a in 0..6 {
                    for b in 0..6 {
                        h_dd[(fi + a, fi + b)] += block[(a, b)];
                    }
                }
                let bb = wj_pose_t * r;
                for a in 0..6 {
                    b_d[fi + a] += bb[a];
                }
                let cross = wj_pose_t * j_lm;
                for a in 0..6 {
                    for b in 0..3 {
                        h_dl[(fi + a, obs.landmark_idx * 3 + b)] += cross[(a, b)];
                    }
                }
            }

            if options.optimize_intrinsics {
                let j_intr = intrinsics_jacobian(&p_c);
                let ii = intr_offset + obs.cam_id * 4;
                let wj_i_t = w * j_intr.transpose();
                let bi = wj_i_t * j_intr;
                for a in 0..4 {
                    for b in 0..4 {
                        h_dd[(ii + a, ii + b)] += bi[(a, b)];
                    }
                }
                let bvec = wj_i_t * r;
                for a in 0..4 {
                    b_d[ii + a] += bvec[a];
                }
                let il_cross = wj_i_t * j_lm;
                for a in 0..4 {
                    for b in 0..3 {
                        h_dl[(ii + a, obs.landmark_idx * 3 + b)] += il_cross[(a, b)];
                    }
                }
                if let Some(vi) = obs.var_idx {
                    let fi = vi * 6;
                    let pi_cross = wj_i_t * j_pose;
                    for a in 0..4 {
                        for b in 0..6 {
                            h_dd[(ii + a, fi + b)] += pi_cross[(a, b)];
                            h_dd[(fi + b, ii + a)] += pi_cross[(a, b)];
                        }
                    }
                }
            }
        }

        // Inertial terms, numerically differentiated.
        if let Some(ctx) = inertial.as_ref() {
            accumulate_inertial_terms(
                &inertial_terms,
                &state_times,
                &state_frame,
                &poses_cw,
                &velocities,
                ctx,
                &t_i_c0_inv,
                &frame_to_idx,
                vel_offset,
                &mut h_dd,
                &mut b_d,
            );
        }

        for i in 0..num_dense {
            h_dd[(i, i)] += DAMPING;
        }

        // Schur complement: eliminate landmark blocks.
        let mut h_red = h_dd.clone();
        let mut b_red = b_d.clone();
        let mut h_ll_inv: Vec<Matrix3<f64>> = Vec::with_capacity(num_lm);
        for l in 0..num_lm {
            let block = h_ll[l] + Matrix3::identity() * DAMPING;
            let inv = block.try_inverse().unwrap_or_else(Matrix3::zeros);
            h_ll_inv.push(inv);

            let h_dl_l = h_dl.view((0, l * 3), (num_dense, 3)).into_owned();
            let tmp = &h_dl_l * inv;
            h_red -= &tmp * h_dl_l.transpose();
            b_red -= &tmp * b_l[l];
        }

        let Some(chol) = h_red.cholesky() else {
            debug!("reduced system not positive definite, stopping");
            break;
        };
        let delta_d = chol.solve(&(-&b_red));

        // Candidate update.
        let mut new_poses = poses_cw.clone();
        for (f, idx) in &frame_to_idx {
            let o = idx * 6;
            let d_rot = Vector3::new(delta_d[o], delta_d[o + 1], delta_d[o + 2]);
            let d_trans = Vector3::new(delta_d[o + 3], delta_d[o + 4], delta_d[o + 5]);
            if let Some(pose) = new_poses.get_mut(f) {
                *pose = pose.update_left(&d_rot, &d_trans);
            }
        }

        let mut new_intr = intr.clone();
        if options.optimize_intrinsics {
            for (c, cam) in new_intr.iter_mut().enumerate() {
                let mut p = cam.params();
                for (k, pk) in p.iter_mut().enumerate() {
                    *pk += delta_d[intr_offset + c * 4 + k];
                }
                cam.set_params(&p);
            }
        }

        let mut new_velocities = velocities.clone();
        for (s, v) in new_velocities.iter_mut().enumerate() {
            let o = vel_offset + s * 3;
            *v += Vector3::new(delta_d[o], delta_d[o + 1], delta_d[o + 2]);
        }

        // Back-substitute landmarks.
        let mut new_lm = lm_positions.clone();
        for l in 0..num_lm {
            let h_dl_l = h_dl.view((0, l * 3), (num_dense, 3)).into_owned();
            let rhs = -b_l[l] - h_dl_l.transpose() * &delta_d;
            new_lm[l] += h_ll_inv[l] * rhs;
        }

        let new_cost = cost_fn(&new_poses, &new_lm, &new_intr, &new_velocities);

        if options.verbosity_level > 1 {
            debug!(iter, current_cost, new_cost, "bundle adjustment step");
        }

        if new_cost > current_cost {
            // Reject the step and stop: plain Gauss-Newton with rollback.
            break;
        }

        let relative = (current_cost - new_cost) / current_cost.max(1e-12);
        poses_cw = new_poses;
        lm_positions = new_lm;
        intr = new_intr;
        velocities = new_velocities;
        current_cost = new_cost;

        if relative < CONVERGENCE_EPS {
            converged = true;
            break;
        }
    }

    // Write back into the caller's containers.
    for (&f, pose_cw) in &poses_cw {
        if fixed_frames.contains(&f) {
            continue;
        }
        let t_wc0 = pose_cw.inverse();
        if let Some(cam) = cameras.get_mut(&FrameCamId::new(f, 0)) {
            cam.t_w_c = t_wc0.clone();
        }
        if let Some(cam) = cameras.get_mut(&FrameCamId::new(f, 1)) {
            cam.t_w_c = t_wc0.compose(&t_0_1);
        }
    }
    for (idx, id) in lm_ids.iter().enumerate() {
        if let Some(lm) = landmarks.get_mut(id) {
            lm.p = lm_positions[idx];
        }
    }
    if options.optimize_intrinsics {
        calib.intrinsics = intr;
    }
    if let Some(ctx) = inertial.as_mut() {
        for (s, &t_ns) in state_times.iter().enumerate() {
            if let Some(state) = ctx.frame_states.get_mut(&t_ns) {
                state.vel_w_i = velocities[s];
                if let Some(pose_cw) = poses_cw.get(&state_frame[s]) {
                    state.t_w_i = pose_cw.inverse().compose(&t_i_c0_inv);
                }
            }
        }
    }

    if options.verbosity_level > 0 {
        info!(
            iterations,
            initial_cost, final_cost = current_cost, converged, "bundle adjustment finished"
        );
    }

    BaStats {
        iterations,
        initial_cost,
        final_cost: current_cost,
        converged,
    }
}

fn huber_weight(residual_norm: f64, options: &BundleAdjustmentOptions) -> f64 {
    if !options.use_huber || residual_norm <= options.huber_parameter {
        1.0
    } else {
        options.huber_parameter / residual_norm
    }
}

fn huber_cost(residual_norm: f64, options: &BundleAdjustmentOptions) -> f64 {
    let d = options.huber_parameter;
    if !options.use_huber || residual_norm <= d {
        0.5 * residual_norm * residual_norm
    } else {
        d * (residual_norm - 0.5 * d)
    }
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

fn intrinsics_jacobian(p_c: &Vector3<f64>) -> SMatrix<f64, 2, 4> {
    let x = p_c.x / p_c.z;
    let y = p_c.y / p_c.z;
    SMatrix::<f64, 2, 4>::new(x, 0.0, 1.0, 0.0, 0.0, y, 0.0, 1.0)
}

fn reprojection_cost(
    observations: &[Observation],
    poses_cw: &BTreeMap<FrameId, SE3>,
    lm_positions: &[Vector3<f64>],
    intr: &[PinholeCamera],
    t_1_0: &SE3,
    options: &BundleAdjustmentOptions,
) -> f64 {
    let mut cost = 0.0;
    for obs in observations {
        let t_cw0 = &poses_cw[&obs.frame_id];
        let p_c0 = t_cw0.transform_point(&lm_positions[obs.landmark_idx]);
        let p_c = if obs.cam_id == 0 {
            p_c0
        } else {
            t_1_0.transform_point(&p_c0)
        };
        if p_c.z <= 1e-6 {
            continue;
        }
        let r = (intr[obs.cam_id].project(&p_c) - obs.measured).norm();
        cost += huber_cost(r, options);
    }
    cost
}

/// 9-dim preintegration residual between two keyframe states, following the
/// on-manifold preintegration formulation.
fn inertial_residual(
    t_cw0_i: &SE3,
    vel_i: &Vector3<f64>,
    t_cw0_j: &SE3,
    vel_j: &Vector3<f64>,
    meas: &IntegratedImuMeasurement,
    t_i_c0_inv: &SE3,
) -> SVector<f64, 9> {
    let t_w_i_i = t_cw0_i.inverse().compose(t_i_c0_inv);
    let t_w_i_j = t_cw0_j.inverse().compose(t_i_c0_inv);
    let dt = meas.dt();

    let r_i = t_w_i_i.rotation;
    let p_i = t_w_i_i.translation;
    let r_j = t_w_i_j.rotation;
    let p_j = t_w_i_j.translation;

    let rot_err = (meas.delta_rot.inverse() * r_i.inverse() * r_j).scaled_axis();
    let vel_err = r_i.inverse() * (vel_j - vel_i - GRAVITY * dt) - meas.delta_vel;
    let pos_err =
        r_i.inverse() * (p_j - p_i - vel_i * dt - 0.5 * GRAVITY * dt * dt) - meas.delta_pos;

    let mut r = SVector::<f64, 9>::zeros();
    r.fixed_rows_mut::<3>(0).copy_from(&rot_err);
    r.fixed_rows_mut::<3>(3).copy_from(&vel_err);
    r.fixed_rows_mut::<3>(6).copy_from(&pos_err);
    r
}

fn inertial_cost(
    terms: &[InertialTerm],
    state_times: &[Timestamp],
    state_frame: &[FrameId],
    poses_cw: &BTreeMap<FrameId, SE3>,
    velocities: &[Vector3<f64>],
    ctx: &InertialContext<'_>,
    t_i_c0_inv: &SE3,
) -> f64 {
    let mut cost = 0.0;
    for term in terms {
        let (fi, fj) = (state_frame[term.state_i], state_frame[term.state_j]);
        let (Some(pi), Some(pj)) = (poses_cw.get(&fi), poses_cw.get(&fj)) else {
            continue;
        };
        let Some(meas) = ctx.imu_measurements.get(&state_times[term.state_j]) else {
            continue;
        };
        let r = inertial_residual(
            pi,
            &velocities[term.state_i],
            pj,
            &velocities[term.state_j],
            meas,
            t_i_c0_inv,
        );
        let weighted = r.component_mul(&term.sqrt_info);
        cost += 0.5 * weighted.norm_squared();
    }
    cost
}

/// Accumulate inertial terms into the dense system. Jacobians are computed by
/// central differences over the 18 involved parameters; the inertial block is
/// small (a handful of keyframes) so this stays cheap.
#[allow(clippy::too_many_arguments)]
fn accumulate_inertial_terms(
    terms: &[InertialTerm],
    state_times: &[Timestamp],
    state_frame: &[FrameId],
    poses_cw: &BTreeMap<FrameId, SE3>,
    velocities: &[Vector3<f64>],
    ctx: &InertialContext<'_>,
    t_i_c0_inv: &SE3,
    frame_to_idx: &BTreeMap<FrameId, usize>,
    vel_offset: usize,
    h_dd: &mut DMatrix<f64>,
    b_d: &mut DVector<f64>,
) {
    const H: f64 = 1e-6;

    for term in terms {
        let (fi, fj) = (state_frame[term.state_i], state_frame[term.state_j]);
        let (Some(pose_i), Some(pose_j)) = (poses_cw.get(&fi), poses_cw.get(&fj)) else {
            continue;
        };
        let Some(meas) = ctx.imu_measurements.get(&state_times[term.state_j]) else {
            continue;
        };
        let vel_i = velocities[term.state_i];
        let vel_j = velocities[term.state_j];

        // Local Jacobian columns: pose_i (6), vel_i (3), pose_j (6), vel_j (3).
        // Gauge-fixed frames contribute no columns.
        let mut col_map: Vec<Option<usize>> = Vec::with_capacity(18);
        for k in 0..6 {
            col_map.push(frame_to_idx.get(&fi).map(|i| i * 6 + k));
        }
        for k in 0..3 {
            col_map.push(Some(vel_offset + term.state_i * 3 + k));
        }
        for k in 0..6 {
            col_map.push(frame_to_idx.get(&fj).map(|i| i * 6 + k));
        }
        for k in 0..3 {
            col_map.push(Some(vel_offset + term.state_j * 3 + k));
        }

        let eval = |d: &[f64; 18]| {
            let perturb = |pose: &SE3, off: usize| {
                pose.update_left(
                    &Vector3::new(d[off], d[off + 1], d[off + 2]),
                    &Vector3::new(d[off + 3], d[off + 4], d[off + 5]),
                )
            };
            let pi = perturb(pose_i, 0);
            let vi = vel_i + Vector3::new(d[6], d[7], d[8]);
            let pj = perturb(pose_j, 9);
            let vj = vel_j + Vector3::new(d[15], d[16], d[17]);
            inertial_residual(&pi, &vi, &pj, &vj, meas, t_i_c0_inv)
        };

        let r0 = eval(&[0.0; 18]);
        let mut jac = SMatrix::<f64, 9, 18>::zeros();
        for k in 0..18 {
            if col_map[k].is_none() {
                continue;
            }
            let mut dp = [0.0; 18];
            dp[k] = H;
            let mut dm = [0.0; 18];
            dm[k] = -H;
            let col = (eval(&dp) - eval(&dm)) / (2.0 * H);
            jac.set_column(k, &col);
        }

        // Row-scale by sqrt information.
        let mut wr = r0;
        let mut wjac = jac;
        for row in 0..9 {
            let s = term.sqrt_info[row];
            wr[row] *= s;
            for col in 0..18 {
                wjac[(row, col)] *= s;
            }
        }

        let ht = wjac.transpose() * wjac;
        let bt = wjac.transpose() * wr;
        for a in 0..18 {
            let Some(ca) = col_map[a] else { continue };
            b_d[ca] += bt[a];
            for b in 0..18 {
                let Some(cb) = col_map[b] else { continue };
                h_dd[(ca, cb)] += ht[(a, b)];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::KeypointsData;
    use crate::imu::ImuNoise;
    use crate::map::{Camera, Landmark};
    use nalgebra::UnitQuaternion;

    fn test_calib() -> Calibration {
        let cam = PinholeCamera {
            fx: 450.0,
            fy: 450.0,
            cx: 376.0,
            cy: 240.0,
            width: 752.0,
            height: 480.0,
        };
        Calibration {
            intrinsics: vec![cam.clone(), cam],
            t_i_c: vec![
                SE3::identity(),
                SE3 {
                    rotation: UnitQuaternion::identity(),
                    translation: Vector3::new(0.11, 0.0, 0.0),
                },
            ],
            noise: ImuNoise::default(),
        }
    }

    /// Two keyframes observing a grid of points; the second keyframe pose and
    /// the landmarks are perturbed. BA must not increase the cost and must
    /// leave the gauge-fixed frame untouched.
    #[test]
    fn cost_decreases_and_gauge_stays_fixed() {
        let mut calib = test_calib();
        let t_0_1 = calib.t_0_1();

        let points: Vec<Vector3<f64>> = (0..4)
            .flat_map(|i| {
                (0..4).map(move |j| {
                    Vector3::new(
                        -0.6 + 0.4 * i as f64,
                        -0.45 + 0.3 * j as f64,
                        3.0 + 0.2 * (i + j) as f64,
                    )
                })
            })
            .collect();

        let true_pose0 = SE3::identity();
        let true_pose1 = SE3 {
            rotation: UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.02, 0.0)),
            translation: Vector3::new(0.3, 0.0, 0.0),
        };

        let mut cameras = Cameras::new();
        let mut corners = Corners::new();
        let mut landmarks = Landmarks::new();

        for (frame, t_w_c0) in [(0i64, &true_pose0), (1i64, &true_pose1)] {
            for cam_id in 0..2 {
                let t_w_c = if cam_id == 0 {
                    t_w_c0.clone()
                } else {
                    t_w_c0.compose(&t_0_1)
                };
                let fcid = FrameCamId::new(frame, cam_id);
                let mut kd = KeypointsData::default();
                let t_c_w = t_w_c.inverse();
                for p in &points {
                    let p_c = t_c_w.transform_point(p);
                    kd.corners.push(calib.intrinsics[cam_id].project(&p_c));
                    kd.corner_angles.push(0.0);
                }
                corners.insert(fcid, kd);
                cameras.insert(fcid, Camera { t_w_c });
            }
        }

        for (tid, p) in points.iter().enumerate() {
            // Perturbed initial landmark position.
            let mut lm = Landmark::new(p + Vector3::new(0.02, -0.015, 0.03));
            for frame in 0..2i64 {
                for cam_id in 0..2 {
                    lm.add_obs(FrameCamId::new(frame, cam_id), tid);
                }
            }
            landmarks.insert(tid as TrackId, lm);
        }

        // Perturb frame 1.
        let noisy_pose1 = SE3 {
            rotation: true_pose1.rotation
                * UnitQuaternion::from_scaled_axis(Vector3::new(0.01, -0.008, 0.005)),
            translation: true_pose1.translation + Vector3::new(0.02, -0.01, 0.015),
        };
        if let Some(c) = cameras.get_mut(&FrameCamId::new(1, 0)) {
            c.t_w_c = noisy_pose1.clone();
        }
        if let Some(c) = cameras.get_mut(&FrameCamId::new(1, 1)) {
            c.t_w_c = noisy_pose1.compose(&t_0_1);
        }

        let fixed: BTreeSet<FrameCamId> = [FrameCamId::new(0, 0), FrameCamId::new(0, 1)]
            .into_iter()
            .collect();

        let options = BundleAdjustmentOptions {
            max_num_iterations: 15,
            verbosity_level: 0,
            ..Default::default()
        };
        let stats = bundle_adjustment(
            &corners,
            &options,
            &fixed,
            &mut calib,
            &mut cameras,
            &mut landmarks,
        );

        assert!(stats.final_cost <= stats.initial_cost);
        assert!(stats.final_cost < 1e-3, "final cost {}", stats.final_cost);

        // Gauge frame untouched.
        let cam0 = &cameras[&FrameCamId::new(0, 0)];
        assert!((cam0.t_w_c.translation - true_pose0.translation).norm() < 1e-12);

        // Frame 1 recovered and the rig stayed rigid.
        let cam1l = &cameras[&FrameCamId::new(1, 0)];
        let cam1r = &cameras[&FrameCamId::new(1, 1)];
        assert!((cam1l.t_w_c.translation - true_pose1.translation).norm() < 1e-3);
        let rig = cam1l.t_w_c.inverse().compose(&cam1r.t_w_c);
        assert!((rig.translation - t_0_1.translation).norm() < 1e-12);
    }

    #[test]
    fn inertial_residual_zero_for_consistent_states() {
        let calib = test_calib();
        let t_i_c0_inv = calib.t_i_c[0].inverse();

        // Stationary rig: gravity-cancelling accelerometer readings over 0.1 s
        // must leave the residual at zero for identical endpoint states.
        let mut meas = IntegratedImuMeasurement::new(0, Vector3::zeros(), Vector3::zeros());
        let cov = Vector3::from_element(1e-6);
        for i in 1..=20 {
            meas.integrate(
                &crate::imu::ImuSample {
                    t_ns: i * 5_000_000,
                    gyro: Vector3::zeros(),
                    accel: -GRAVITY,
                },
                &cov,
                &cov,
            );
        }

        let pose = SE3::identity();
        let r = inertial_residual(
            &pose,
            &Vector3::zeros(),
            &pose,
            &Vector3::zeros(),
            &meas,
            &t_i_c0_inv,
        );
        assert!(r.norm() < 1e-6, "residual {}", r.norm());
    }
}
