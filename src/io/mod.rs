//! Dataset, calibration and trajectory I/O.

pub mod calib;
pub mod euroc;
pub mod trajectory;

pub use calib::Calibration;
pub use euroc::{load_dataset, DatasetFormat, EurocDataset, GroundTruthEntry, NUM_CAMS};
pub use trajectory::{write_trajectory, TrajectorySample};
