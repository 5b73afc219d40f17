use crate::Error;
use tracing::{error, instrument};

/// Computes the Biologically Effective Dose (BED).
///
/// The BED compares fractionation regimens under the linear-quadratic model:
/// `BED = n · d · (1 + d / (α/β))`.
///
/// # Arguments
///
/// * `d` - dose delivered per fraction (Gy).
/// * `n` - total number of fractions.
/// * `ab` - dose (Gy) at which the linear and quadratic components of cell
///   kill are equal.
///
/// # Returns
///
/// The BED in Gy, or an [`Error`] when a parameter is not positive.
///
/// # Example
///
/// ```
/// use rad_plan_bio_dose::bed;
///
/// let value = bed(2.0, 30, 10.0).unwrap();
/// assert!((value - 72.0).abs() < 1e-6);
/// ```
#[instrument(level = "debug")]
pub fn bed(d: f64, n: u32, ab: f64) -> Result<f64, Error> {
    if d <= 0.0 {
        error!("Dose per fraction ({d}) must be greater than zero");
        return Err(Error::InvalidDosePerFraction);
    }
    if n == 0 {
        error!("Total number of fractions must be greater than zero");
        return Err(Error::InvalidTotalFractions);
    }
    if ab <= 0.0 {
        error!("Alpha beta ratio ({ab}) must be greater than zero");
        return Err(Error::InvalidAlphaBetaRatio);
    }
    Ok(n as f64 * d * (1.0 + d / ab))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bed_reference_values() {
        let d = 3.0;
        let n = 20;
        let cases = [(1.0, 240.0), (2.0, 150.0), (3.0, 120.0), (6.0, 90.0), (10.0, 78.0)];
        for (ab, expected) in cases {
            let value = bed(d, n, ab).unwrap();
            assert!((value - expected).abs() < 1e-6, "ab {ab}: {value}");
        }
    }

    #[test]
    fn test_bed_rejects_non_positive_dose() {
        assert!(matches!(bed(0.0, 30, 10.0), Err(Error::InvalidDosePerFraction)));
        assert!(matches!(bed(-2.0, 30, 10.0), Err(Error::InvalidDosePerFraction)));
    }

    #[test]
    fn test_bed_rejects_zero_fractions() {
        assert!(matches!(bed(2.0, 0, 10.0), Err(Error::InvalidTotalFractions)));
    }

    #[test]
    fn test_bed_rejects_non_positive_alpha_beta() {
        assert!(matches!(bed(2.0, 30, 0.0), Err(Error::InvalidAlphaBetaRatio)));
        assert!(matches!(bed(2.0, 30, -3.0), Err(Error::InvalidAlphaBetaRatio)));
    }
}
