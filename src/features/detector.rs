//! FAST corner detection with rotated-BRIEF descriptors.
//!
//! A compact stand-in for the detection collaborator: FAST-9 segment test with a
//! per-cell nonmax grid, intensity-centroid orientation, and a 256-pair BRIEF
//! descriptor steered by the corner angle.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use image::GrayImage;
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Descriptor, FeatureExtractor, KeypointsData};
use crate::map::types::FrameCamId;

/// Offsets of the 16-pixel Bresenham circle (radius 3) used by FAST.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const FAST_ARC: usize = 9;
const FAST_THRESHOLD: i32 = 20;
const PATCH_RADIUS: i32 = 15;
const GRID_CELL: u32 = 24;
const BRIEF_SEED: u64 = 0x5f3759df;

/// FAST+BRIEF extractor backed by image files on disk.
pub struct FastBriefExtractor {
    images: HashMap<FrameCamId, PathBuf>,
    max_features: usize,
    rotate_features: bool,
    pattern: Vec<(Vector2<f64>, Vector2<f64>)>,
}

impl FastBriefExtractor {
    pub fn new(
        images: HashMap<FrameCamId, PathBuf>,
        max_features: usize,
        rotate_features: bool,
    ) -> Self {
        Self {
            images,
            max_features,
            rotate_features,
            pattern: brief_pattern(),
        }
    }

    fn detect(&self, img: &GrayImage) -> KeypointsData {
        let candidates = fast_corners(img);
        let selected = grid_nonmax(img, candidates, self.max_features);

        let mut kd = KeypointsData::default();
        for (x, y, _score) in selected {
            let angle = if self.rotate_features {
                intensity_centroid_angle(img, x, y)
            } else {
                0.0
            };
            let desc = brief_describe(img, x, y, angle, &self.pattern);
            kd.corners.push(Vector2::new(x as f64, y as f64));
            kd.corner_angles.push(angle);
            kd.corner_descriptors.push(desc);
        }
        kd
    }
}

impl FeatureExtractor for FastBriefExtractor {
    fn extract(&mut self, fcid: FrameCamId) -> Result<KeypointsData> {
        let path = self
            .images
            .get(&fcid)
            .with_context(|| format!("no image registered for {:?}", fcid))?;
        let img = image::open(path)
            .with_context(|| format!("failed to load image {}", path.display()))?
            .into_luma8();
        let kd = self.detect(&img);
        debug!(frame = fcid.frame_id, cam = fcid.cam_id, corners = kd.len(), "detected");
        Ok(kd)
    }
}

fn px(img: &GrayImage, x: i32, y: i32) -> i32 {
    img.get_pixel(x as u32, y as u32).0[0] as i32
}

/// FAST-9 segment test over the whole image, returning (x, y, score).
fn fast_corners(img: &GrayImage) -> Vec<(i32, i32, i32)> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let margin = PATCH_RADIUS + 1;
    let mut out = Vec::new();

    for y in margin..h - margin {
        for x in margin..w - margin {
            let center = px(img, x, y);
            let ring: Vec<i32> = CIRCLE.iter().map(|(dx, dy)| px(img, x + dx, y + dy)).collect();

            // Quick reject on the 4 compass points. A 9-pixel arc can touch as
            // few as 2 of them, so 2 is the strictest usable bound.
            let bright_quick = [ring[0], ring[4], ring[8], ring[12]]
                .iter()
                .filter(|&&v| v > center + FAST_THRESHOLD)
                .count();
            let dark_quick = [ring[0], ring[4], ring[8], ring[12]]
                .iter()
                .filter(|&&v| v < center - FAST_THRESHOLD)
                .count();
            if bright_quick < 2 && dark_quick < 2 {
                continue;
            }

            if let Some(score) = arc_score(center, &ring) {
                out.push((x, y, score));
            }
        }
    }
    out
}

/// Check for a contiguous arc of FAST_ARC pixels all brighter (or all darker)
/// than the center by the threshold; score is the summed absolute contrast.
fn arc_score(center: i32, ring: &[i32]) -> Option<i32> {
    for darker in [false, true] {
        let pass = |v: i32| {
            if darker {
                v < center - FAST_THRESHOLD
            } else {
                v > center + FAST_THRESHOLD
            }
        };
        let mut run = 0usize;
        // Wrap around the ring once to catch arcs crossing index 0.
        for i in 0..ring.len() * 2 {
            if pass(ring[i % ring.len()]) {
                run += 1;
                if run >= FAST_ARC {
                    let score: i32 = ring.iter().filter(|&&v| pass(v)).map(|v| (v - center).abs()).sum();
                    return Some(score);
                }
            } else {
                run = 0;
            }
        }
    }
    None
}

/// Keep the strongest corner per grid cell, then the strongest `max_features`.
fn grid_nonmax(img: &GrayImage, candidates: Vec<(i32, i32, i32)>, max_features: usize) -> Vec<(i32, i32, i32)> {
    let cells_x = (img.width() / GRID_CELL + 1) as usize;
    let mut best: HashMap<usize, (i32, i32, i32)> = HashMap::new();
    for c in candidates {
        let cell = (c.1 as u32 / GRID_CELL) as usize * cells_x + (c.0 as u32 / GRID_CELL) as usize;
        let entry = best.entry(cell).or_insert(c);
        if c.2 > entry.2 {
            *entry = c;
        }
    }
    let mut selected: Vec<_> = best.into_values().collect();
    selected.sort_by_key(|c| (-c.2, c.1, c.0));
    selected.truncate(max_features);
    selected
}

/// Orientation from the intensity centroid of the patch around the corner.
fn intensity_centroid_angle(img: &GrayImage, x: i32, y: i32) -> f64 {
    let mut m01 = 0.0f64;
    let mut m10 = 0.0f64;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > PATCH_RADIUS * PATCH_RADIUS {
                continue;
            }
            let v = px(img, x + dx, y + dy) as f64;
            m10 += dx as f64 * v;
            m01 += dy as f64 * v;
        }
    }
    m01.atan2(m10)
}

/// Deterministic BRIEF sampling pattern inside the orientation patch.
fn brief_pattern() -> Vec<(Vector2<f64>, Vector2<f64>)> {
    let mut rng = StdRng::seed_from_u64(BRIEF_SEED);
    let r = (PATCH_RADIUS - 2) as f64;
    (0..Descriptor::BITS)
        .map(|_| {
            let a = Vector2::new(rng.gen_range(-r..r), rng.gen_range(-r..r));
            let b = Vector2::new(rng.gen_range(-r..r), rng.gen_range(-r..r));
            (a, b)
        })
        .collect()
}

fn brief_describe(
    img: &GrayImage,
    x: i32,
    y: i32,
    angle: f64,
    pattern: &[(Vector2<f64>, Vector2<f64>)],
) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let rotate = |p: &Vector2<f64>| {
        Vector2::new(cos * p.x - sin * p.y, sin * p.x + cos * p.y)
    };
    // The rotated pattern can reach past the detection margin near the image
    // border; clamp the sample coordinate to stay in bounds.
    let (w, h) = (img.width() as i32, img.height() as i32);
    let sample = |p: &Vector2<f64>| {
        let q = rotate(p);
        let sx = (x + q.x.round() as i32).clamp(0, w - 1);
        let sy = (y + q.y.round() as i32).clamp(0, h - 1);
        px(img, sx, sy)
    };

    let mut desc = Descriptor::default();
    for (i, (a, b)) in pattern.iter().enumerate() {
        if sample(a) < sample(b) {
            desc.set_bit(i);
        }
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Black image with a bright square; corners of the square must fire FAST.
    fn synthetic_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(128, 128, image::Luma([10u8]));
        for y in 40..90 {
            for x in 40..90 {
                img.put_pixel(x, y, image::Luma([220u8]));
            }
        }
        img
    }

    #[test]
    fn detects_corners_of_a_square() {
        let extractor = FastBriefExtractor::new(HashMap::new(), 100, true);
        let kd = extractor.detect(&synthetic_image());
        assert!(!kd.is_empty(), "no corners detected");
        assert_eq!(kd.corners.len(), kd.corner_descriptors.len());
        assert_eq!(kd.corners.len(), kd.corner_angles.len());
        // All detections should lie near the square boundary.
        for c in &kd.corners {
            assert!(c.x >= 35.0 && c.x <= 95.0, "corner far from square: {}", c.x);
            assert!(c.y >= 35.0 && c.y <= 95.0, "corner far from square: {}", c.y);
        }
    }

    /// Square corner just inside the detection margin: the rotated BRIEF
    /// pattern reaches past the image border and must sample clamped pixels
    /// instead of panicking.
    #[test]
    fn rotated_brief_near_margin_stays_in_bounds() {
        let mut img = GrayImage::from_pixel(128, 128, image::Luma([10u8]));
        for y in 17..60 {
            for x in 17..60 {
                img.put_pixel(x, y, image::Luma([220u8]));
            }
        }
        let extractor = FastBriefExtractor::new(HashMap::new(), 100, true);
        let kd = extractor.detect(&img);
        assert!(!kd.is_empty(), "no corners detected near the margin");
        assert_eq!(kd.corners.len(), kd.corner_descriptors.len());
    }

    #[test]
    fn descriptors_are_stable_across_runs() {
        let extractor = FastBriefExtractor::new(HashMap::new(), 50, false);
        let img = synthetic_image();
        let a = extractor.detect(&img);
        let b = extractor.detect(&img);
        assert_eq!(a.corner_descriptors, b.corner_descriptors);
    }
}
