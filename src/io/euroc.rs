//! EuRoC-format dataset source: stereo image lists, IMU samples and optional
//! ground truth, all keyed by nanosecond timestamps.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::{info, warn};

use crate::geometry::SE3;
use crate::imu::ImuSample;
use crate::map::types::{FrameCamId, Timestamp};

pub const NUM_CAMS: usize = 2;

/// Dataset layouts the loader understands. A single variant today; the tag
/// keeps source selection at the configuration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Euroc,
}

impl std::str::FromStr for DatasetFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "euroc" => Ok(DatasetFormat::Euroc),
            other => bail!("unknown dataset format {other:?}, expected \"euroc\""),
        }
    }
}

/// Load a dataset of the given format into the common sensor-data form.
pub fn load_dataset<P: AsRef<Path>>(format: DatasetFormat, root: P) -> Result<EurocDataset> {
    match format {
        DatasetFormat::Euroc => EurocDataset::load(root),
    }
}

#[derive(Debug, Clone)]
pub struct GroundTruthEntry {
    pub t_ns: Timestamp,
    pub t_w_i: SE3,
}

/// One run's worth of sensor data.
#[derive(Debug)]
pub struct EurocDataset {
    /// Per-frame timestamps (one stereo pair per entry).
    pub timestamps: Vec<Timestamp>,
    /// Image file paths keyed by (frame, camera).
    pub images: HashMap<FrameCamId, PathBuf>,
    /// Time-ordered IMU samples, consumed front-to-back during integration.
    pub imu_queue: VecDeque<ImuSample>,
    /// Optional ground truth poses.
    pub groundtruth: Vec<GroundTruthEntry>,
}

impl EurocDataset {
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let (timestamps, images) = load_image_lists(root)?;
        if timestamps.is_empty() {
            bail!("dataset {} contains no stereo frames", root.display());
        }

        let imu_queue = load_imu_samples(root.join("imu0/data.csv")).unwrap_or_else(|e| {
            warn!("could not load IMU data: {e}; continuing vision-only");
            VecDeque::new()
        });

        let groundtruth = load_groundtruth(root.join("state_groundtruth_estimate0/data.csv"))
            .unwrap_or_else(|e| {
                warn!("could not load ground truth: {e}; continuing without it");
                Vec::new()
            });

        info!(
            frames = timestamps.len(),
            imu = imu_queue.len(),
            gt = groundtruth.len(),
            "loaded dataset {}",
            root.display()
        );
        Ok(Self {
            timestamps,
            images,
            imu_queue,
            groundtruth,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.timestamps.len()
    }
}

fn load_image_lists(root: &Path) -> Result<(Vec<Timestamp>, HashMap<FrameCamId, PathBuf>)> {
    let csv_path = root.join("cam0/data.csv");
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(&csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut timestamps = Vec::new();
    let mut images = HashMap::new();

    for (frame_id, rec) in rdr.records().enumerate() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let t_ns: Timestamp = rec[0].trim().parse()?;
        let filename = rec[1].trim().to_string();
        timestamps.push(t_ns);
        for cam_id in 0..NUM_CAMS {
            images.insert(
                FrameCamId::new(frame_id as i64, cam_id),
                root.join(format!("cam{cam_id}/data")).join(&filename),
            );
        }
    }
    Ok((timestamps, images))
}

fn load_imu_samples(csv_path: PathBuf) -> Result<VecDeque<ImuSample>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(&csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut samples = VecDeque::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 7 {
            continue;
        }
        let t_ns: Timestamp = rec[0].trim().parse()?;
        let gyro = Vector3::new(
            rec[1].trim().parse()?,
            rec[2].trim().parse()?,
            rec[3].trim().parse()?,
        );
        let accel = Vector3::new(
            rec[4].trim().parse()?,
            rec[5].trim().parse()?,
            rec[6].trim().parse()?,
        );
        samples.push_back(ImuSample { t_ns, gyro, accel });
    }
    Ok(samples)
}

fn load_groundtruth(csv_path: PathBuf) -> Result<Vec<GroundTruthEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(&csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        // timestamp, p_xyz, q_wxyz, then velocity/bias columns we ignore.
        if rec.len() < 8 {
            continue;
        }
        let t_ns: Timestamp = rec[0].trim().parse()?;
        let translation = Vector3::new(
            rec[1].trim().parse()?,
            rec[2].trim().parse()?,
            rec[3].trim().parse()?,
        );
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
            rec[4].trim().parse()?,
            rec[5].trim().parse()?,
            rec[6].trim().parse()?,
            rec[7].trim().parse()?,
        ));
        entries.push(GroundTruthEntry {
            t_ns,
            t_w_i: SE3 {
                rotation,
                translation,
            },
        });
    }
    Ok(entries)
}
