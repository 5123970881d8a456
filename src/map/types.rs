//! Identifier and correspondence types shared across the pipeline.

use std::collections::BTreeMap;

use nalgebra::Vector2;

use crate::features::KeypointsData;
use crate::geometry::SE3;

pub type FrameId = i64;
pub type CamId = usize;
pub type TrackId = i64;
pub type FeatureId = usize;
/// Nanoseconds since epoch, matching the dataset convention.
pub type Timestamp = i64;

/// Identifies one image: (frame index, camera index). Ordering is lexicographic
/// by frame then camera, which keeps the left image of a frame first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameCamId {
    pub frame_id: FrameId,
    pub cam_id: CamId,
}

impl FrameCamId {
    pub fn new(frame_id: FrameId, cam_id: CamId) -> Self {
        Self { frame_id, cam_id }
    }
}

/// Detected keypoints per image.
pub type Corners = BTreeMap<FrameCamId, KeypointsData>;

/// Feature matches for an image pair: putative matches, the subset surviving
/// geometric verification, and the relative pose used for verification.
#[derive(Debug, Clone, Default)]
pub struct MatchData {
    pub t_i_j: SE3,
    pub matches: Vec<(FeatureId, FeatureId)>,
    pub inliers: Vec<(FeatureId, FeatureId)>,
}

/// Matches of one image against the current map: 2D feature index to TrackId,
/// the inlier subset after robust pose estimation, and the resulting pose.
#[derive(Debug, Clone, Default)]
pub struct LandmarkMatchData {
    pub t_w_c: SE3,
    pub matches: Vec<(FeatureId, TrackId)>,
    pub inliers: Vec<(FeatureId, TrackId)>,
}

/// Candidate landmark projection used for guided matching.
#[derive(Debug, Clone)]
pub struct ProjectedCandidate {
    pub point: Vector2<f64>,
    pub track_id: TrackId,
}
