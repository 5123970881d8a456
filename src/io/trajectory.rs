//! Trajectory output in the TUM benchmark line format:
//! `timestamp tx ty tz qx qy qz qw`, high-precision scientific notation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::geometry::SE3;
use crate::map::types::Timestamp;

/// One finalized trajectory sample.
#[derive(Debug, Clone)]
pub struct TrajectorySample {
    pub t_ns: Timestamp,
    pub t_w_i: SE3,
}

pub fn write_trajectory<P: AsRef<Path>>(path: P, samples: &[TrajectorySample]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create trajectory file {}", path.display()))?;
    let mut w = BufWriter::new(file);

    for s in samples {
        let t = &s.t_w_i.translation;
        let q = s.t_w_i.rotation.quaternion();
        writeln!(
            w,
            "{:.18e} {:.18e} {:.18e} {:.18e} {:.18e} {:.18e} {:.18e} {:.18e}",
            s.t_ns as f64, t.x, t.y, t.z, q.i, q.j, q.k, q.w
        )?;
    }
    w.flush()?;
    info!(samples = samples.len(), "saved trajectory to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn writes_one_line_per_sample() {
        let samples = vec![
            TrajectorySample {
                t_ns: 1_000,
                t_w_i: SE3::identity(),
            },
            TrajectorySample {
                t_ns: 2_000,
                t_w_i: SE3 {
                    rotation: nalgebra::UnitQuaternion::identity(),
                    translation: Vector3::new(1.0, 2.0, 3.0),
                },
            },
        ];
        let path = std::env::temp_dir().join(format!("traj_test_{}.txt", std::process::id()));
        write_trajectory(&path, &samples).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split_whitespace().count(), 8);
        assert!(lines[1].contains('e'), "expected scientific notation");
    }
}
