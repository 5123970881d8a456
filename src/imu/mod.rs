//! Inertial subsystem: raw samples, pose+velocity states, preintegration.

pub mod preintegration;
pub mod sample;
pub mod state;

pub use preintegration::{IntegratedImuMeasurement, Matrix9};
pub use sample::{ImuNoise, ImuSample, GRAVITY};
pub use state::PoseVelState;
