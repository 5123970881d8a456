//! Raw IMU sample and noise types.

use nalgebra::Vector3;

use crate::map::types::Timestamp;

/// Gravity in the world frame (m/s^2).
pub const GRAVITY: Vector3<f64> = Vector3::new(0.0, 0.0, -9.81);

/// One gyro+accel measurement.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    pub t_ns: Timestamp,
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

/// Continuous-time white-noise densities (1-sigma), one entry per axis.
#[derive(Debug, Clone, Copy)]
pub struct ImuNoise {
    pub gyro_noise_std: Vector3<f64>,
    pub accel_noise_std: Vector3<f64>,
}

impl Default for ImuNoise {
    fn default() -> Self {
        // Approximate EuRoC MEMS values.
        Self {
            gyro_noise_std: Vector3::from_element(1.7e-4),
            accel_noise_std: Vector3::from_element(2.0e-3),
        }
    }
}

impl ImuNoise {
    /// Per-axis variances, the form consumed by preintegration.
    pub fn gyro_cov(&self) -> Vector3<f64> {
        self.gyro_noise_std.component_mul(&self.gyro_noise_std)
    }

    pub fn accel_cov(&self) -> Vector3<f64> {
        self.accel_noise_std.component_mul(&self.accel_noise_std)
    }
}
