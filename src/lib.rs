//! Stereo visual-inertial odometry.
//!
//! The pipeline tracks a calibrated stereo rig through an image sequence,
//! maintains a sliding-window sparse map, refines it with an asynchronous
//! bundle-adjustment backend and optionally fuses IMU measurements through
//! on-manifold preintegration.
//!
//! Module layout:
//! - [`geometry`]: SE(3), pinhole projection, two-view geometry.
//! - [`features`]: FAST+BRIEF detection and descriptor matching.
//! - [`map`]: cameras, landmarks, observations and their invariants.
//! - [`imu`]: raw samples, preintegration, state propagation.
//! - [`tracking`]: the per-frame front end and window maintenance.
//! - [`optimizer`]: bundle adjustment and the backend worker.
//! - [`io`]: dataset, calibration and trajectory files.
//! - [`eval`]: trajectory alignment against ground truth.

pub mod eval;
pub mod features;
pub mod geometry;
pub mod imu;
pub mod io;
pub mod map;
pub mod optimizer;
pub mod tracking;
