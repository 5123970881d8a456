use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stereo_vio::eval::align_svd;
use stereo_vio::features::FastBriefExtractor;
use stereo_vio::io::{
    load_dataset, write_trajectory, Calibration, DatasetFormat, TrajectorySample,
};
use stereo_vio::optimizer::BundleAdjustmentOptions;
use stereo_vio::tracking::{Frontend, TrackingOptions};

/// Stereo visual-inertial odometry on a EuRoC-format dataset.
#[derive(Parser, Debug)]
#[command(name = "stereo-vio", version, about)]
struct Args {
    /// Dataset root (containing cam0/, cam1/, imu0/, ...).
    #[arg(long)]
    dataset_path: PathBuf,

    /// Dataset layout.
    #[arg(long, default_value = "euroc")]
    dataset_type: DatasetFormat,

    /// Calibration JSON file.
    #[arg(long)]
    cam_calib: PathBuf,

    /// Fuse IMU measurements.
    #[arg(long)]
    use_imu: bool,

    /// Jointly refine camera intrinsics during bundle adjustment.
    #[arg(long)]
    optimize_intrinsics: bool,

    /// Sliding window size in keyframes.
    #[arg(long, default_value_t = 10)]
    max_num_kfs: usize,

    /// Maximum detected features per image.
    #[arg(long, default_value_t = 1500)]
    num_features: usize,

    /// Directory for trajectory output files.
    #[arg(long, default_value = "output")]
    output_path: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let calib = Calibration::load(&args.cam_calib)?;
    let dataset = load_dataset(args.dataset_type, &args.dataset_path)?;
    info!(frames = dataset.num_frames(), use_imu = args.use_imu, "starting odometry");

    let extractor = FastBriefExtractor::new(dataset.images, args.num_features, true);
    let options = TrackingOptions {
        max_num_kfs: args.max_num_kfs,
        use_imu: args.use_imu,
        ..Default::default()
    };
    let ba_options = BundleAdjustmentOptions {
        optimize_intrinsics: args.optimize_intrinsics,
        ..Default::default()
    };

    let mut frontend = Frontend::new(
        calib,
        options,
        ba_options,
        dataset.timestamps,
        dataset.imu_queue,
        extractor,
    );

    while frontend.next_step()? {}
    frontend.finish();

    std::fs::create_dir_all(&args.output_path)
        .with_context(|| format!("could not create {}", args.output_path.display()))?;

    write_trajectory(
        args.output_path.join("trajectory.txt"),
        frontend.est_trajectory(),
    )?;
    write_trajectory(
        args.output_path.join("keyframes.txt"),
        frontend.kf_trajectory(),
    )?;
    if args.use_imu {
        write_trajectory(
            args.output_path.join("fused.txt"),
            frontend.fused_trajectory(),
        )?;
    }
    if !dataset.groundtruth.is_empty() {
        let gt_samples: Vec<TrajectorySample> = dataset
            .groundtruth
            .iter()
            .map(|e| TrajectorySample {
                t_ns: e.t_ns,
                t_w_i: e.t_w_i.clone(),
            })
            .collect();
        write_trajectory(args.output_path.join("groundtruth.txt"), &gt_samples)?;

        match align_svd(frontend.est_trajectory(), &dataset.groundtruth) {
            Some(result) => info!(
                rms_ate = result.rms_ate,
                associations = result.num_associations,
                "trajectory error after rigid alignment"
            ),
            None => info!("not enough associations to align against ground truth"),
        }
    }

    Ok(())
}
