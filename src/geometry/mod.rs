//! Geometry utilities: SE3 transforms, pinhole projection, two-view geometry.

pub mod epipolar;
pub mod pinhole;
pub mod se3;

pub use epipolar::{compute_essential, triangulate};
pub use pinhole::PinholeCamera;
pub use se3::{hat, SE3};
