use crate::Error;
use tracing::{error, instrument};

/// Computes the generalized equivalent uniform dose (EUD).
///
/// `EUD = (Σ vᵢ · Dᵢ^(1/n))^n` with equal fractional volumes
/// `vᵢ = 1/N`. The volume-effect parameter `n` interpolates between the
/// maximum dose (`n → 0`, serial organs) and the mean dose (`n = 1`,
/// parallel organs).
///
/// # Arguments
///
/// * `doses` - dose per sub-volume (Gy), all finite and non-negative.
/// * `n` - volume-effect parameter, `> 0`.
///
/// # Example
///
/// ```
/// use rad_plan_bio_dose::eud;
///
/// // n = 1 reduces to the mean dose.
/// let value = eud(&[10.0, 20.0, 30.0], 1.0).unwrap();
/// assert!((value - 20.0).abs() < 1e-9);
/// ```
#[instrument(level = "debug", skip(doses))]
pub fn eud(doses: &[f64], n: f64) -> Result<f64, Error> {
    if doses.is_empty() {
        return Err(Error::EmptyDoseVector);
    }
    if n <= 0.0 {
        error!("Volume-effect parameter ({n}) must be greater than zero");
        return Err(Error::InvalidVolumeEffect);
    }
    let mut sum = 0.0f64;
    for &d in doses {
        if !d.is_finite() || d < 0.0 {
            return Err(Error::InvalidDose);
        }
        sum += d.powf(1.0 / n);
    }
    Ok((sum / doses.len() as f64).powf(n))
}

/// Logistic tumor-control probability.
///
/// `TCP = 1 / (1 + (D₅₀ / EUD)^(4·γ₅₀))`, where `D₅₀` is the dose giving 50%
/// control and `γ₅₀` the normalized slope at that point.
#[instrument(level = "debug")]
pub fn tcp_logistic(d50: f64, gamma50: f64, eud_gy: f64) -> Result<f64, Error> {
    if d50 <= 0.0 {
        return Err(Error::InvalidModelParameter("D50"));
    }
    if gamma50 <= 0.0 {
        return Err(Error::InvalidModelParameter("gamma50"));
    }
    if !eud_gy.is_finite() || eud_gy < 0.0 {
        return Err(Error::InvalidDose);
    }
    if eud_gy == 0.0 {
        return Ok(0.0);
    }
    Ok(1.0 / (1.0 + (d50 / eud_gy).powf(4.0 * gamma50)))
}

/// Lyman-Kutcher-Burman normal-tissue complication probability.
///
/// `t = (EUD − TD₅₀) / (m · TD₅₀)` and `NTCP = Φ(t)`, the standard normal
/// CDF. The volume-effect parameter `n` enters through the EUD reduction of
/// the dose distribution (see [`eud`]); it is accepted here so callers keep
/// the `(TD50, m, n)` parameter triple together.
#[instrument(level = "debug")]
pub fn ntcp_lkb(td50: f64, m: f64, n: f64, eud_gy: f64) -> Result<f64, Error> {
    if td50 <= 0.0 {
        return Err(Error::InvalidModelParameter("TD50"));
    }
    if m <= 0.0 {
        return Err(Error::InvalidModelParameter("m"));
    }
    if n <= 0.0 {
        return Err(Error::InvalidVolumeEffect);
    }
    if !eud_gy.is_finite() || eud_gy < 0.0 {
        return Err(Error::InvalidDose);
    }
    let t = (eud_gy - td50) / (m * td50);
    Ok(normal_cdf(t))
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation (7.1.26),
/// accurate to ~1.5e-7.
fn normal_cdf(t: f64) -> f64 {
    0.5 * (1.0 + erf(t / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}
