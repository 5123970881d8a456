//! Sliding-window optimization: bundle adjustment and the asynchronous worker
//! that runs it off the tracking thread.

pub mod backend;
pub mod bundle_adjustment;

pub use backend::{Backend, OptResult, OptSnapshot};
pub use bundle_adjustment::{
    bundle_adjustment, bundle_adjustment_inertial, BaStats, BundleAdjustmentOptions,
    InertialContext,
};
