//! Pinhole camera model: the reversible project/unproject pair consumed by the
//! tracking and optimization code.

use nalgebra::{Vector2, Vector3};
use serde::Deserialize;

/// Pinhole intrinsics (fx, fy, cx, cy), no distortion.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PinholeCamera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Image extent, used for visibility checks when projecting landmarks.
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
}

fn default_width() -> f64 {
    752.0
}

fn default_height() -> f64 {
    480.0
}

impl PinholeCamera {
    /// Project a 3D point in the camera frame to pixel coordinates.
    /// The caller is responsible for checking `p.z > 0`.
    pub fn project(&self, p: &Vector3<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// Unproject a pixel to a unit bearing vector in the camera frame.
    pub fn unproject(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        Vector3::new((uv.x - self.cx) / self.fx, (uv.y - self.cy) / self.fy, 1.0).normalize()
    }

    pub fn in_image(&self, uv: &Vector2<f64>) -> bool {
        uv.x >= 0.0 && uv.x < self.width && uv.y >= 0.0 && uv.y < self.height
    }

    /// Intrinsics as a parameter vector, in optimizer order.
    pub fn params(&self) -> [f64; 4] {
        [self.fx, self.fy, self.cx, self.cy]
    }

    pub fn set_params(&mut self, p: &[f64; 4]) {
        self.fx = p[0];
        self.fy = p[1];
        self.cx = p[2];
        self.cy = p[3];
    }
}
