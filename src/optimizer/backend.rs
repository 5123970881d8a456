//! Asynchronous optimization backend.
//!
//! The front end hands the worker a value snapshot of the optimization window
//! and keeps tracking; the worker runs bundle adjustment on its private copy
//! and publishes the refined copy through a bounded rendezvous channel. No
//! shared mutable state: the only synchronization is the `running` flag and
//! the channel itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use super::bundle_adjustment::{
    bundle_adjustment, bundle_adjustment_inertial, BaStats, BundleAdjustmentOptions,
    InertialContext,
};
use crate::imu::{IntegratedImuMeasurement, PoseVelState};
use crate::io::Calibration;
use crate::map::types::{Corners, FrameCamId, Timestamp};
use crate::map::{Cameras, Landmarks};

/// Value copy of everything one optimization round reads.
#[derive(Debug, Clone)]
pub struct OptSnapshot {
    pub corners: Corners,
    pub calib: Calibration,
    pub cameras: Cameras,
    pub landmarks: Landmarks,
    /// Gauge: cameras held constant during optimization.
    pub fixed_cameras: BTreeSet<FrameCamId>,
    pub frame_states: BTreeMap<Timestamp, PoseVelState>,
    pub imu_measurements: BTreeMap<Timestamp, IntegratedImuMeasurement>,
    pub timestamps: Vec<Timestamp>,
    pub use_imu: bool,
}

/// Refined copies produced by one round, merged back by the front end.
#[derive(Debug)]
pub struct OptResult {
    pub calib: Calibration,
    pub cameras: Cameras,
    pub landmarks: Landmarks,
    pub frame_states: BTreeMap<Timestamp, PoseVelState>,
    pub stats: BaStats,
}

/// Owns the worker thread and the completion channel. At most one round is in
/// flight at a time.
pub struct Backend {
    options: BundleAdjustmentOptions,
    running: Arc<AtomicBool>,
    pending: Option<(Receiver<OptResult>, JoinHandle<()>)>,
}

impl Backend {
    pub fn new(options: BundleAdjustmentOptions) -> Self {
        Self {
            options,
            running: Arc::new(AtomicBool::new(false)),
            pending: None,
        }
    }

    /// True while the worker is still computing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True if a round was launched whose result has not been taken yet.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Start one optimization round. Panics in debug builds if a round is
    /// already in flight; callers gate on [`Backend::has_pending`].
    pub fn launch(&mut self, snapshot: OptSnapshot) {
        debug_assert!(self.pending.is_none(), "optimization already in flight");

        let (tx, rx) = bounded(1);
        let options = self.options.clone();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let handle = std::thread::spawn(move || {
            let result = run_round(snapshot, &options);
            running.store(false, Ordering::Release);
            // Only fails if the backend itself was dropped mid-run.
            let _ = tx.send(result);
        });
        self.pending = Some((rx, handle));
        debug!("launched optimization round");
    }

    /// Non-blocking poll: the finished result, if any. Joins the worker.
    pub fn try_take_result(&mut self) -> Option<OptResult> {
        let finished = match &self.pending {
            Some((rx, _)) => rx.try_recv().ok(),
            None => None,
        };
        if finished.is_some() {
            self.join_worker();
        }
        finished
    }

    /// Blocking variant, used when draining the pipeline at end of input.
    pub fn wait_result(&mut self) -> Option<OptResult> {
        let result = match &self.pending {
            Some((rx, _)) => rx.recv().ok(),
            None => None,
        };
        self.join_worker();
        result
    }

    fn join_worker(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            if handle.join().is_err() {
                warn!("optimization worker panicked");
            }
        }
    }
}

fn run_round(mut snapshot: OptSnapshot, options: &BundleAdjustmentOptions) -> OptResult {
    let stats = if snapshot.use_imu && !snapshot.frame_states.is_empty() {
        let OptSnapshot {
            corners,
            calib,
            cameras,
            landmarks,
            fixed_cameras,
            frame_states,
            imu_measurements,
            timestamps,
            ..
        } = &mut snapshot;
        bundle_adjustment_inertial(
            corners,
            options,
            fixed_cameras,
            calib,
            cameras,
            landmarks,
            InertialContext {
                frame_states,
                imu_measurements,
                timestamps,
            },
        )
    } else {
        bundle_adjustment(
            &snapshot.corners,
            options,
            &snapshot.fixed_cameras,
            &mut snapshot.calib,
            &mut snapshot.cameras,
            &mut snapshot.landmarks,
        )
    };

    OptResult {
        calib: snapshot.calib,
        cameras: snapshot.cameras,
        landmarks: snapshot.landmarks,
        frame_states: snapshot.frame_states,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::KeypointsData;
    use crate::geometry::{PinholeCamera, SE3};
    use crate::imu::ImuNoise;
    use crate::map::{Camera, Landmark};
    use nalgebra::{UnitQuaternion, Vector3};

    fn tiny_snapshot() -> OptSnapshot {
        let cam = PinholeCamera {
            fx: 400.0,
            fy: 400.0,
            cx: 376.0,
            cy: 240.0,
            width: 752.0,
            height: 480.0,
        };
        let calib = Calibration {
            intrinsics: vec![cam, cam],
            t_i_c: vec![
                SE3::identity(),
                SE3 {
                    rotation: UnitQuaternion::identity(),
                    translation: Vector3::new(0.1, 0.0, 0.0),
                },
            ],
            noise: ImuNoise::default(),
        };
        let t_0_1 = calib.t_0_1();

        let points = [
            Vector3::new(-0.5, -0.3, 3.0),
            Vector3::new(0.4, 0.2, 3.5),
            Vector3::new(0.0, 0.4, 2.8),
            Vector3::new(-0.2, 0.1, 3.2),
            Vector3::new(0.3, -0.25, 2.6),
            Vector3::new(0.1, -0.1, 4.0),
        ];

        let mut cameras = Cameras::new();
        let mut corners = Corners::new();
        let mut landmarks = Landmarks::new();

        for frame in 0..2i64 {
            let t_w_c0 = SE3 {
                rotation: UnitQuaternion::identity(),
                translation: Vector3::new(0.2 * frame as f64, 0.0, 0.0),
            };
            for cam_id in 0..2 {
                let t_w_c = if cam_id == 0 {
                    t_w_c0.clone()
                } else {
                    t_w_c0.compose(&t_0_1)
                };
                let fcid = crate::map::types::FrameCamId::new(frame, cam_id);
                let mut kd = KeypointsData::default();
                let t_c_w = t_w_c.inverse();
                for p in &points {
                    kd.corners.push(cam.project(&t_c_w.transform_point(p)));
                    kd.corner_angles.push(0.0);
                }
                corners.insert(fcid, kd);
                cameras.insert(fcid, Camera { t_w_c });
            }
        }
        for (tid, p) in points.iter().enumerate() {
            let mut lm = Landmark::new(p + Vector3::new(0.01, 0.01, -0.02));
            for frame in 0..2i64 {
                for cam_id in 0..2 {
                    lm.add_obs(crate::map::types::FrameCamId::new(frame, cam_id), tid);
                }
            }
            landmarks.insert(tid as i64, lm);
        }

        OptSnapshot {
            corners,
            calib,
            cameras,
            landmarks,
            fixed_cameras: [
                crate::map::types::FrameCamId::new(0, 0),
                crate::map::types::FrameCamId::new(0, 1),
            ]
            .into_iter()
            .collect(),
            frame_states: BTreeMap::new(),
            imu_measurements: BTreeMap::new(),
            timestamps: vec![0, 1],
            use_imu: false,
        }
    }

    #[test]
    fn round_trip_through_worker() {
        let mut backend = Backend::new(BundleAdjustmentOptions {
            verbosity_level: 0,
            ..Default::default()
        });
        assert!(!backend.is_running());
        assert!(!backend.has_pending());

        backend.launch(tiny_snapshot());
        assert!(backend.has_pending());

        let result = backend.wait_result().unwrap();
        assert!(!backend.is_running());
        assert!(!backend.has_pending());
        assert!(result.stats.final_cost <= result.stats.initial_cost);
        assert_eq!(result.cameras.len(), 4);
        assert_eq!(result.landmarks.len(), 6);
    }

    #[test]
    fn try_take_result_eventually_returns() {
        let mut backend = Backend::new(BundleAdjustmentOptions {
            verbosity_level: 0,
            ..Default::default()
        });
        backend.launch(tiny_snapshot());
        let mut result = None;
        for _ in 0..1000 {
            if let Some(r) = backend.try_take_result() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(result.is_some(), "worker never finished");
    }
}
