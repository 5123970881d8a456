//! Camera/IMU calibration record, loaded once at startup.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;
use tracing::info;

use crate::geometry::{PinholeCamera, SE3};
use crate::imu::ImuNoise;

/// Shared, read-mostly calibration: per-camera intrinsics, IMU-to-camera
/// extrinsics, IMU noise densities.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub intrinsics: Vec<PinholeCamera>,
    pub t_i_c: Vec<SE3>,
    pub noise: ImuNoise,
}

impl Calibration {
    /// Relative pose of camera 1 in camera 0: `T_0_1 = T_i_c0^-1 * T_i_c1`.
    pub fn t_0_1(&self) -> SE3 {
        self.t_i_c[0].inverse().compose(&self.t_i_c[1])
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("could not load camera calibration {}", path.display()))?;
        let raw: CalibrationFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed calibration file {}", path.display()))?;

        ensure!(
            raw.intrinsics.len() == 2 && raw.t_i_c.len() == 2,
            "calibration must describe exactly two cameras"
        );

        let t_i_c = raw.t_i_c.iter().map(PoseRecord::to_se3).collect();
        let noise = ImuNoise {
            gyro_noise_std: Vector3::from_column_slice(&raw.gyro_noise_std),
            accel_noise_std: Vector3::from_column_slice(&raw.accel_noise_std),
        };

        info!(path = %path.display(), cams = raw.intrinsics.len(), "loaded calibration");
        Ok(Self {
            intrinsics: raw.intrinsics,
            t_i_c,
            noise,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationFile {
    intrinsics: Vec<PinholeCamera>,
    #[serde(rename = "T_i_c")]
    t_i_c: Vec<PoseRecord>,
    #[serde(default = "default_noise_std")]
    accel_noise_std: [f64; 3],
    #[serde(default = "default_gyro_std")]
    gyro_noise_std: [f64; 3],
}

fn default_noise_std() -> [f64; 3] {
    [2.0e-3; 3]
}

fn default_gyro_std() -> [f64; 3] {
    [1.7e-4; 3]
}

#[derive(Debug, Deserialize)]
struct PoseRecord {
    px: f64,
    py: f64,
    pz: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

impl PoseRecord {
    fn to_se3(&self) -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(
                self.qw, self.qx, self.qy, self.qz,
            )),
            translation: Vector3::new(self.px, self.py, self.pz),
        }
    }
}
