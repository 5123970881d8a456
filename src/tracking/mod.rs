//! Front-end tracking: guided matching, pose estimation, keyframe decisions
//! and sliding-window map maintenance.

pub mod frontend;
pub mod guided;
pub mod window;

pub use frontend::{Frontend, TrackingOptions};
pub use guided::{
    add_new_landmarks, find_matches_landmarks, localize_camera, match_stereo, project_landmarks,
};
pub use window::{remove_old_keyframes, EvictedKeyframe};
