use rad_plan_world::{Grid3, interp};
use rayon::prelude::*;
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum HuTableError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("A HU to density table requires at least two anchors, got {0}")]
    TooFewAnchors(usize),
    #[error("HU anchors must be strictly increasing: {0} is not above {1}")]
    NonIncreasingHu(f64, f64),
    #[error("Densities must be monotone non-decreasing: {0} drops below {1}")]
    DecreasingDensity(f64, f64),
    #[error("Anchor values must be finite and densities non-negative, got ({0}, {1})")]
    InvalidAnchor(f64, f64),
    #[error("Line [{0}]: expected two columns `HU density`, got: {1}")]
    MalformedLine(usize, String),
}

/// Piecewise-linear lookup from CT Hounsfield units to relative electron
/// density.
///
/// Between anchors the density is linearly interpolated; outside the table it
/// clamps to the nearest endpoint, which keeps the conversion a pure,
/// monotone non-decreasing function of HU.
///
/// # Example
///
/// ```
/// use rad_plan_dose_engine::HuDensityTable;
///
/// let table = HuDensityTable::default();
/// assert!((table.convert(0.0) - 1.0).abs() < 1e-9);
/// assert!((table.convert(-700.0) - 0.25).abs() < 1e-9);
/// // Clamped below the first anchor.
/// assert!((table.convert(-5000.0) - 0.001).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct HuDensityTable {
    anchors: Vec<(f64, f64)>,
}

/// Anchors covering air, lung, fat, water, soft tissue and bone.
const DEFAULT_ANCHORS: [(f64, f64); 8] = [
    (-1000.0, 0.001),
    (-700.0, 0.25),
    (-100.0, 0.9),
    (0.0, 1.0),
    (50.0, 1.05),
    (300.0, 1.5),
    (1000.0, 2.0),
    (3000.0, 3.0),
];

impl Default for HuDensityTable {
    fn default() -> Self {
        Self {
            anchors: DEFAULT_ANCHORS.to_vec(),
        }
    }
}

impl HuDensityTable {
    /// Builds a table from `(HU, density)` anchor points.
    ///
    /// # Errors
    ///
    /// Anchors must number at least two, be strictly increasing in HU,
    /// monotone non-decreasing in density, and finite with non-negative
    /// densities.
    pub fn from_anchors(anchors: Vec<(f64, f64)>) -> Result<Self, HuTableError> {
        if anchors.len() < 2 {
            return Err(HuTableError::TooFewAnchors(anchors.len()));
        }
        for &(hu, rho) in &anchors {
            if !hu.is_finite() || !rho.is_finite() || rho < 0.0 {
                return Err(HuTableError::InvalidAnchor(hu, rho));
            }
        }
        for pair in anchors.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(HuTableError::NonIncreasingHu(pair[1].0, pair[0].0));
            }
            if pair[1].1 < pair[0].1 {
                return Err(HuTableError::DecreasingDensity(pair[1].1, pair[0].1));
            }
        }
        Ok(Self { anchors })
    }

    /// Loads anchors from a two-column text file.
    ///
    /// Each non-empty line holds `HU density` separated by whitespace; lines
    /// starting with `#` are ignored.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HuTableError> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut anchors = Vec::new();
        for (no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut cols = trimmed.split_whitespace();
            let parsed = match (cols.next(), cols.next(), cols.next()) {
                (Some(hu), Some(rho), None) => hu
                    .parse::<f64>()
                    .ok()
                    .zip(rho.parse::<f64>().ok()),
                _ => None,
            };
            match parsed {
                Some(anchor) => anchors.push(anchor),
                None => return Err(HuTableError::MalformedLine(no + 1, trimmed.to_string())),
            }
        }
        debug!("Loaded {} HU to density anchors", anchors.len());
        Self::from_anchors(anchors)
    }

    /// Converts a HU value to relative electron density.
    ///
    /// Pure and monotone non-decreasing; O(log N) in the number of anchors.
    pub fn convert(&self, hu: f64) -> f64 {
        let first = self.anchors[0];
        let last = self.anchors[self.anchors.len() - 1];
        if hu <= first.0 {
            return first.1;
        }
        if hu >= last.0 {
            return last.1;
        }
        // Index of the first anchor with anchor.0 > hu; by the checks above
        // it is neither 0 nor len.
        let hi = self.anchors.partition_point(|&(h, _)| h <= hu);
        let (x0, y0) = self.anchors[hi - 1];
        let (x1, y1) = self.anchors[hi];
        interp::linear(hu, x0, x1, y0, y1)
    }

    /// Converts a whole CT volume to a relative electron-density volume on
    /// the same grid.
    pub fn density_volume(&self, ct: &Grid3<i16>) -> Grid3<f32> {
        let mut density = ct.like(0.0f32);
        density
            .data_mut()
            .par_iter_mut()
            .zip(ct.data().par_iter())
            .for_each(|(out, &hu)| {
                *out = self.convert(hu as f64) as f32;
            });
        density
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_anchor_values() {
        let table = HuDensityTable::default();
        assert!((table.convert(-1000.0) - 0.001).abs() < 1e-9);
        assert!((table.convert(-700.0) - 0.25).abs() < 1e-9);
        assert!((table.convert(0.0) - 1.0).abs() < 1e-9);
        assert!((table.convert(1000.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_between_anchors() {
        let table = HuDensityTable::default();
        // Halfway between water (0, 1.0) and soft tissue (50, 1.05).
        assert!((table.convert(25.0) - 1.025).abs() < 1e-9);
    }

    #[test]
    fn test_clamping_outside_table() {
        let table = HuDensityTable::default();
        assert_eq!(table.convert(-4000.0), 0.001);
        assert_eq!(table.convert(10000.0), 3.0);
    }

    #[test]
    fn test_monotone_non_decreasing() {
        let table = HuDensityTable::default();
        let mut prev = f64::NEG_INFINITY;
        let mut hu = -1200.0;
        while hu <= 3200.0 {
            let rho = table.convert(hu);
            assert!(rho >= prev, "density decreased at HU {hu}");
            prev = rho;
            hu += 7.3;
        }
    }

    #[test]
    fn test_from_anchors_validation() {
        assert!(matches!(
            HuDensityTable::from_anchors(vec![(0.0, 1.0)]),
            Err(HuTableError::TooFewAnchors(1))
        ));
        assert!(matches!(
            HuDensityTable::from_anchors(vec![(0.0, 1.0), (0.0, 1.1)]),
            Err(HuTableError::NonIncreasingHu(..))
        ));
        assert!(matches!(
            HuDensityTable::from_anchors(vec![(0.0, 1.0), (100.0, 0.5)]),
            Err(HuTableError::DecreasingDensity(..))
        ));
        assert!(matches!(
            HuDensityTable::from_anchors(vec![(0.0, -1.0), (100.0, 0.5)]),
            Err(HuTableError::InvalidAnchor(..))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# HU density").unwrap();
        writeln!(file, "-1000 0.001").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0 1.0").unwrap();
        writeln!(file, "3000 3.0").unwrap();
        let table = HuDensityTable::load(file.path()).unwrap();
        assert!((table.convert(-500.0) - 0.5005).abs() < 1e-9);
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-1000 0.001").unwrap();
        writeln!(file, "zero one").unwrap();
        let err = HuDensityTable::load(file.path());
        assert!(matches!(err, Err(HuTableError::MalformedLine(2, _))));
    }

    #[test]
    fn test_density_volume_matches_pointwise_conversion() {
        let table = HuDensityTable::default();
        let mut ct = Grid3::new([4, 4, 4], [1.0; 3], [0.0; 3], 0i16).unwrap();
        ct.set(1, 1, 1, -700).unwrap();
        ct.set(2, 2, 2, 300).unwrap();
        let density = table.density_volume(&ct);
        assert!(ct.same_geometry(&density));
        assert!((density.get(0, 0, 0).unwrap() - 1.0).abs() < 1e-6);
        assert!((density.get(1, 1, 1).unwrap() - 0.25).abs() < 1e-6);
        assert!((density.get(2, 2, 2).unwrap() - 1.5).abs() < 1e-6);
    }
}
