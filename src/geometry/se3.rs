//! Rigid transform in SE(3), stored as unit quaternion + translation.
//!
//! Naming follows `T_target_source`: `T_w_c` maps points from camera frame to
//! world frame, `p_w = T_w_c * p_c`.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Rigid body transform (rotation + translation, no scale).
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation = UnitQuaternion::from_rotation_matrix(
            &nalgebra::Rotation3::from_matrix_unchecked(rotation),
        );
        Self {
            rotation,
            translation,
        }
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Composition: `self * other` (apply `other` first, then `self`).
    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Left-multiplicative update `exp([δθ, δt]) * self`, used by the optimizer.
    pub fn update_left(&self, delta_rot: &Vector3<f64>, delta_trans: &Vector3<f64>) -> SE3 {
        let dq = UnitQuaternion::from_scaled_axis(*delta_rot);
        SE3 {
            rotation: dq * self.rotation,
            translation: dq * self.translation + delta_trans,
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Skew-symmetric (hat) matrix of a 3-vector.
pub fn hat(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_with_inverse_is_identity() {
        let t = SE3 {
            rotation: UnitQuaternion::from_scaled_axis(Vector3::new(0.1, -0.2, 0.3)),
            translation: Vector3::new(1.0, 2.0, -3.0),
        };
        let id = t.compose(&t.inverse());
        assert!(id.translation.norm() < 1e-12);
        assert!(id.rotation.angle() < 1e-12);
    }

    #[test]
    fn transform_point_round_trip() {
        let t = SE3 {
            rotation: UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.5, 0.0)),
            translation: Vector3::new(0.2, 0.0, 1.0),
        };
        let p = Vector3::new(0.3, -0.4, 2.0);
        let back = t.inverse().transform_point(&t.transform_point(&p));
        assert!((back - p).norm() < 1e-12);
    }
}
