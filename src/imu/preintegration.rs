//! IMU preintegration: accumulates raw samples between two timestamps into a
//! compact relative-motion factor with first-order covariance propagation
//! (Forster-style, over the 9-dimensional state [δθ, δv, δp]).

use nalgebra::{Matrix3, SMatrix, UnitQuaternion, Vector3};

use super::sample::ImuSample;
use super::state::PoseVelState;
use crate::geometry::hat;
use crate::map::types::Timestamp;

/// 9×9 covariance over [δθ, δv, δp].
pub type Matrix9 = SMatrix<f64, 9, 9>;

/// Bias-corrected relative motion between two timestamps.
#[derive(Debug, Clone)]
pub struct IntegratedImuMeasurement {
    start_t_ns: Timestamp,
    last_t_ns: Timestamp,
    bias_gyro: Vector3<f64>,
    bias_accel: Vector3<f64>,

    pub delta_rot: UnitQuaternion<f64>,
    pub delta_vel: Vector3<f64>,
    pub delta_pos: Vector3<f64>,
    pub cov: Matrix9,
}

impl IntegratedImuMeasurement {
    pub fn new(start_t_ns: Timestamp, bias_gyro: Vector3<f64>, bias_accel: Vector3<f64>) -> Self {
        Self {
            start_t_ns,
            last_t_ns: start_t_ns,
            bias_gyro,
            bias_accel,
            delta_rot: UnitQuaternion::identity(),
            delta_vel: Vector3::zeros(),
            delta_pos: Vector3::zeros(),
            cov: Matrix9::zeros(),
        }
    }

    pub fn start_t_ns(&self) -> Timestamp {
        self.start_t_ns
    }

    /// Elapsed time covered by the accumulated samples, in seconds.
    pub fn dt(&self) -> f64 {
        (self.last_t_ns - self.start_t_ns) as f64 * 1e-9
    }

    /// Consume one raw sample, advancing the delta state and its covariance.
    /// `accel_cov`/`gyro_cov` are the per-axis measurement variances.
    pub fn integrate(
        &mut self,
        sample: &ImuSample,
        accel_cov: &Vector3<f64>,
        gyro_cov: &Vector3<f64>,
    ) {
        let dt = (sample.t_ns - self.last_t_ns) as f64 * 1e-9;
        if dt <= 0.0 {
            return;
        }

        let omega = sample.gyro - self.bias_gyro;
        let accel = sample.accel - self.bias_accel;
        let r = self.delta_rot.to_rotation_matrix().into_inner();
        let dq = UnitQuaternion::from_scaled_axis(omega * dt);

        // Error-state transition A and noise Jacobian B, first order.
        let mut a = Matrix9::identity();
        a.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&dq.to_rotation_matrix().into_inner().transpose());
        a.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-r * hat(&accel) * dt));
        a.fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&(-0.5 * r * hat(&accel) * dt * dt));
        a.fixed_view_mut::<3, 3>(6, 3)
            .copy_from(&(Matrix3::identity() * dt));

        let mut b = SMatrix::<f64, 9, 6>::zeros();
        b.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * dt));
        b.fixed_view_mut::<3, 3>(3, 3).copy_from(&(r * dt));
        b.fixed_view_mut::<3, 3>(6, 3).copy_from(&(0.5 * r * dt * dt));

        let mut noise = SMatrix::<f64, 6, 6>::zeros();
        noise
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::from_diagonal(gyro_cov));
        noise
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&Matrix3::from_diagonal(accel_cov));

        self.cov = a * self.cov * a.transpose() + b * noise * b.transpose();

        // Delta state update.
        self.delta_pos += self.delta_vel * dt + 0.5 * (r * accel) * dt * dt;
        self.delta_vel += r * accel * dt;
        self.delta_rot = self.delta_rot * dq;
        self.last_t_ns = sample.t_ns;
    }

    /// Predict the terminal state from an initial state and gravity.
    pub fn predict_state(&self, state0: &PoseVelState, gravity: &Vector3<f64>) -> PoseVelState {
        let dt = self.dt();
        let r0 = state0.t_w_i.rotation;

        let rotation = r0 * self.delta_rot;
        let vel_w_i = state0.vel_w_i + gravity * dt + r0 * self.delta_vel;
        let translation = state0.t_w_i.translation
            + state0.vel_w_i * dt
            + 0.5 * gravity * dt * dt
            + r0 * self.delta_pos;

        PoseVelState {
            t_ns: self.last_t_ns,
            t_w_i: crate::geometry::SE3 {
                rotation,
                translation,
            },
            vel_w_i,
        }
    }
}
