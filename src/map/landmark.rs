//! Cameras and landmarks: the live map containers.

use std::collections::BTreeMap;

use nalgebra::Vector3;

use super::types::{FeatureId, FrameCamId, FrameId, TrackId};
use crate::geometry::SE3;

/// A localized image: its camera-to-world pose.
#[derive(Debug, Clone, Default)]
pub struct Camera {
    pub t_w_c: SE3,
}

/// A persistent 3D point with its supporting 2D observations.
///
/// A `FrameCamId` appears in at most one of `obs` and `outlier_obs`; all
/// mutation goes through methods that maintain this.
#[derive(Debug, Clone, Default)]
pub struct Landmark {
    pub p: Vector3<f64>,
    obs: BTreeMap<FrameCamId, FeatureId>,
    outlier_obs: BTreeMap<FrameCamId, FeatureId>,
}

impl Landmark {
    pub fn new(p: Vector3<f64>) -> Self {
        Self {
            p,
            obs: BTreeMap::new(),
            outlier_obs: BTreeMap::new(),
        }
    }

    pub fn obs(&self) -> &BTreeMap<FrameCamId, FeatureId> {
        &self.obs
    }

    pub fn outlier_obs(&self) -> &BTreeMap<FrameCamId, FeatureId> {
        &self.outlier_obs
    }

    /// Record an inlier observation; displaces any outlier entry for the image.
    pub fn add_obs(&mut self, fcid: FrameCamId, feature: FeatureId) {
        self.outlier_obs.remove(&fcid);
        self.obs.insert(fcid, feature);
    }

    /// Demote an observation to the outlier set. No-op if the image never
    /// observed this landmark.
    pub fn mark_outlier(&mut self, fcid: FrameCamId) {
        if let Some(feature) = self.obs.remove(&fcid) {
            self.outlier_obs.insert(fcid, feature);
        }
    }

    /// Promote an outlier observation back to the inlier set.
    pub fn mark_inlier(&mut self, fcid: FrameCamId) {
        if let Some(feature) = self.outlier_obs.remove(&fcid) {
            self.obs.insert(fcid, feature);
        }
    }

    /// Drop every observation (inlier or outlier) from the given frame.
    pub fn remove_frame(&mut self, frame_id: FrameId) {
        self.obs.retain(|fcid, _| fcid.frame_id != frame_id);
        self.outlier_obs.retain(|fcid, _| fcid.frame_id != frame_id);
    }

    pub fn num_obs(&self) -> usize {
        self.obs.len()
    }
}

pub type Cameras = BTreeMap<FrameCamId, Camera>;
pub type Landmarks = BTreeMap<TrackId, Landmark>;

#[cfg(test)]
mod tests {
    use super::*;

    fn fcid(frame: FrameId, cam: usize) -> FrameCamId {
        FrameCamId::new(frame, cam)
    }

    #[test]
    fn obs_and_outlier_obs_stay_disjoint() {
        let mut lm = Landmark::new(Vector3::zeros());
        lm.add_obs(fcid(0, 0), 5);
        lm.add_obs(fcid(1, 0), 7);

        lm.mark_outlier(fcid(0, 0));
        assert!(!lm.obs().contains_key(&fcid(0, 0)));
        assert_eq!(lm.outlier_obs()[&fcid(0, 0)], 5);

        // Re-adding as inlier removes the outlier entry.
        lm.add_obs(fcid(0, 0), 5);
        assert!(!lm.outlier_obs().contains_key(&fcid(0, 0)));
        assert_eq!(lm.obs()[&fcid(0, 0)], 5);

        for key in lm.obs().keys() {
            assert!(!lm.outlier_obs().contains_key(key));
        }
    }

    #[test]
    fn remove_frame_strips_both_sets() {
        let mut lm = Landmark::new(Vector3::zeros());
        lm.add_obs(fcid(3, 0), 1);
        lm.add_obs(fcid(3, 1), 2);
        lm.add_obs(fcid(4, 0), 3);
        lm.mark_outlier(fcid(3, 1));

        lm.remove_frame(3);
        assert_eq!(lm.num_obs(), 1);
        assert!(lm.outlier_obs().is_empty());
        assert!(lm.obs().contains_key(&fcid(4, 0)));
    }
}
