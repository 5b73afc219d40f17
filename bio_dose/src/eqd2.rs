use crate::Error;
use tracing::{error, instrument};

/// Computes the equivalent dose in 2 Gy fractions (EQD2).
///
/// EQD2 normalizes a fractionation scheme to the biologically equivalent
/// total dose delivered in 2 Gy fractions:
/// `EQD2 = BED / (1 + 2 / (α/β)) = n · d · (d + α/β) / (2 + α/β)`.
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
/// The EQD2 in Gy, or an [`Error`] when a parameter is not positive.
///
/// # Example
///
/// ```
/// use rad_plan_bio_dose::eqd2;
///
/// let value = eqd2(3.0, 20, 3.0).unwrap();
/// assert!((value - 72.0).abs() < 1e-6);
///
/// let value = eqd2(3.0, 20, 10.0).unwrap();
/// assert!((value - 65.0).abs() < 1e-6);
/// ```
#[instrument(level = "debug")]
pub fn eqd2(d: f64, n: u32, ab: f64) -> Result<f64, Error> {
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
    Ok(n as f64 * d * (d + ab) / (2.0 + ab))
}
