//! Map data model: typed containers for cameras, landmarks and observations.

pub mod landmark;
pub mod projections;
pub mod types;

pub use landmark::{Camera, Cameras, Landmark, Landmarks};
pub use projections::{compute_projections, reflag_outliers, ImageProjections, ProjectedLandmark};
pub use types::{
    CamId, Corners, FeatureId, FrameCamId, FrameId, LandmarkMatchData, MatchData,
    ProjectedCandidate, Timestamp, TrackId,
};
