//! Feature detection and matching collaborators.
//!
//! The tracking core consumes detection through the [`FeatureExtractor`] trait
//! and never touches pixels itself. [`detector::FastBriefExtractor`] is the
//! concrete implementation used by the binary.

pub mod descriptor;
pub mod detector;
pub mod matching;

use anyhow::Result;
use nalgebra::Vector2;

use crate::map::types::FrameCamId;

pub use descriptor::Descriptor;
pub use detector::FastBriefExtractor;
pub use matching::match_descriptors;

/// Per-image detection output. The three sequences are index-aligned and
/// immutable once produced.
#[derive(Debug, Clone, Default)]
pub struct KeypointsData {
    pub corners: Vec<Vector2<f64>>,
    pub corner_angles: Vec<f64>,
    pub corner_descriptors: Vec<Descriptor>,
}

impl KeypointsData {
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

/// Keypoint/descriptor detection, keyed by image id. Implementations own the
/// image source; the pipeline core only sees the detection result.
pub trait FeatureExtractor {
    fn extract(&mut self, fcid: FrameCamId) -> Result<KeypointsData>;
}
