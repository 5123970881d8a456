//! Sliding-window keyframe retention.
//!
//! Keyframes beyond the configured bound are evicted oldest-first: their camera
//! entries leave the live map, landmarks they alone supported move to the
//! archive, and their final pose becomes a finalized trajectory sample.

use std::collections::BTreeSet;

use tracing::debug;

use crate::geometry::SE3;
use crate::map::types::{FrameCamId, FrameId, Timestamp};
use crate::map::Landmarks;

/// One keyframe leaving the window, with its last refined left-camera pose.
#[derive(Debug, Clone)]
pub struct EvictedKeyframe {
    pub frame_id: FrameId,
    pub t_ns: Timestamp,
    pub t_w_c: SE3,
}

/// Trim the window to `max_num_kfs`, oldest keyframe first. Returns the evicted
/// keyframes in eviction order.
pub fn remove_old_keyframes(
    kf_frames: &mut BTreeSet<FrameId>,
    max_num_kfs: usize,
    timestamps: &[Timestamp],
    cameras: &mut crate::map::Cameras,
    landmarks: &mut Landmarks,
    old_landmarks: &mut Landmarks,
) -> Vec<EvictedKeyframe> {
    let mut evicted = Vec::new();

    while kf_frames.len() > max_num_kfs {
        let Some(&frame_id) = kf_frames.iter().next() else {
            break;
        };
        kf_frames.remove(&frame_id);

        let fcid_l = FrameCamId::new(frame_id, 0);
        let Some(camera) = cameras.remove(&fcid_l) else {
            continue;
        };
        cameras.remove(&FrameCamId::new(frame_id, 1));

        let mut archived = 0;
        let orphaned: Vec<_> = landmarks
            .iter_mut()
            .filter_map(|(tid, lm)| {
                lm.remove_frame(frame_id);
                (lm.num_obs() == 0).then_some(*tid)
            })
            .collect();
        for tid in orphaned {
            if let Some(lm) = landmarks.remove(&tid) {
                old_landmarks.insert(tid, lm);
                archived += 1;
            }
        }

        let t_ns = timestamps.get(frame_id as usize).copied().unwrap_or(0);
        debug!(frame_id, archived, "evicted keyframe from window");
        evicted.push(EvictedKeyframe {
            frame_id,
            t_ns,
            t_w_c: camera.t_w_c,
        });
    }
    evicted
}
