//! Timestamped pose+velocity state, the unit of IMU propagation.

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::map::types::Timestamp;

/// Pose of the IMU frame in the world plus linear velocity, at one timestamp.
#[derive(Debug, Clone, Default)]
pub struct PoseVelState {
    pub t_ns: Timestamp,
    pub t_w_i: SE3,
    pub vel_w_i: Vector3<f64>,
}

impl PoseVelState {
    pub fn new(t_ns: Timestamp, t_w_i: SE3, vel_w_i: Vector3<f64>) -> Self {
        Self {
            t_ns,
            t_w_i,
            vel_w_i,
        }
    }
}
