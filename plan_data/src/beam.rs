use crate::{ArcDirection, Modality};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum BeamError {
    #[error("Nominal energy must be positive and finite, got {0}")]
    InvalidEnergy(f64),
    #[error("Source-surface distance must be positive and finite, got {0}")]
    InvalidSsd(f64),
    #[error("Field size must be positive, got {0} x {1} mm")]
    InvalidFieldSize(f64, f64),
    #[error("MU fraction must be non-negative and finite, got {0}")]
    InvalidMuFraction(f64),
    #[error("Control point [{0}]: weight must be non-negative and finite, got {1}")]
    InvalidControlPointWeight(usize, f64),
    #[error("Control point [{0}], leaf pair [{1}]: left edge {2} exceeds right edge {3}")]
    CrossedLeafPair(usize, usize, f64, f64),
    #[error("Wedge angle must lie in [0, 90) degrees, got {0}")]
    InvalidWedgeAngle(f64),
    #[error("Arc sweep is empty: start {0} equals stop {1} over a multi-point arc")]
    EmptyArcSweep(f64, f64),
}

/// Jaw window in the beam-perpendicular `(u, w)` frame, in mm at the
/// isocenter plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Jaws {
    pub u_min: f64,
    pub u_max: f64,
    pub w_min: f64,
    pub w_max: f64,
}

impl Jaws {
    /// A window of `width_mm` by `height_mm` centered on the beam axis.
    pub fn symmetric(width_mm: f64, height_mm: f64) -> Self {
        Self {
            u_min: -width_mm / 2.0,
            u_max: width_mm / 2.0,
            w_min: -height_mm / 2.0,
            w_max: height_mm / 2.0,
        }
    }

    pub fn contains(&self, u: f64, w: f64) -> bool {
        u >= self.u_min && u <= self.u_max && w >= self.w_min && w <= self.w_max
    }
}

impl Default for Jaws {
    fn default() -> Self {
        Self::symmetric(400.0, 400.0)
    }
}

/// A discrete snapshot of beam state: gantry angle, MLC shape, jaw window and
/// a monitor-unit weight.
///
/// The MLC bank stacks leaf pairs along the `w` axis; each pair is the
/// `(left, right)` leaf edge along `u` in mm at the isocenter plane. One
/// weight per control point; the plan weight vector is the concatenation of
/// these weights over all beams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub gantry_deg: f64,
    pub mlc: Vec<(f64, f64)>,
    pub jaws: Jaws,
    pub weight: f64,
}

impl ControlPoint {
    /// A fully open control point: every leaf pair retracted to the field
    /// edges and the jaws set to the field size.
    pub fn open(
        gantry_deg: f64,
        field_width_mm: f64,
        field_height_mm: f64,
        leaf_pairs: usize,
        weight: f64,
    ) -> Self {
        Self {
            gantry_deg,
            mlc: vec![(-field_width_mm / 2.0, field_width_mm / 2.0); leaf_pairs],
            jaws: Jaws::symmetric(field_width_mm, field_height_mm),
            weight,
        }
    }

    /// Closes the leaf pairs with indices in `range` (both edges to 0).
    pub fn close_leaves(&mut self, range: std::ops::Range<usize>) {
        for i in range {
            if let Some(pair) = self.mlc.get_mut(i) {
                *pair = (0.0, 0.0);
            }
        }
    }

    /// True when every leaf pair is closed.
    pub fn all_leaves_closed(&self) -> bool {
        !self.mlc.is_empty() && self.mlc.iter().all(|&(l, r)| (r - l).abs() < 1e-9)
    }
}

/// Physical wedge: a linear fluence gradient along `orientation_deg` in the
/// `(u, w)` plane. Angle 0 leaves the fluence untouched.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wedge {
    pub angle_deg: f64,
    pub orientation_deg: f64,
}

/// Gantry sweep of an arc beam.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub start_deg: f64,
    pub stop_deg: f64,
    pub direction: ArcDirection,
}

impl ArcSpec {
    pub fn sweep_deg(&self) -> f64 {
        (self.stop_deg - self.start_deg).abs()
    }
}

/// Immutable configuration of a single radiation field.
///
/// Energies are nominal: MV for photons, MeV for electrons and protons. When
/// `control_points` is empty, the engine derives control points from the beam
/// geometry (a single open field, or an interpolated sweep for arcs).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub id: String,
    pub modality: Modality,
    pub energy: f64,
    pub isocenter_mm: [f64; 3],
    pub gantry_deg: f64,
    pub collimator_deg: f64,
    pub couch_deg: f64,
    pub ssd_mm: f64,
    pub field_width_mm: f64,
    pub field_height_mm: f64,
    pub wedge: Option<Wedge>,
    pub arc: Option<ArcSpec>,
    pub control_points: Vec<ControlPoint>,
    pub mu_fraction: f64,
}

impl Default for Beam {
    fn default() -> Self {
        Self {
            id: String::new(),
            modality: Modality::Photon,
            energy: 6.0,
            isocenter_mm: [0.0; 3],
            gantry_deg: 0.0,
            collimator_deg: 0.0,
            couch_deg: 0.0,
            ssd_mm: 1000.0,
            field_width_mm: 100.0,
            field_height_mm: 100.0,
            wedge: None,
            arc: None,
            control_points: Vec::new(),
            mu_fraction: 1.0,
        }
    }
}

impl Beam {
    pub fn validate(&self) -> Result<(), BeamError> {
        if !(self.energy.is_finite() && self.energy > 0.0) {
            return Err(BeamError::InvalidEnergy(self.energy));
        }
        if !(self.ssd_mm.is_finite() && self.ssd_mm > 0.0) {
            return Err(BeamError::InvalidSsd(self.ssd_mm));
        }
        if self.field_width_mm <= 0.0 || self.field_height_mm <= 0.0 {
            return Err(BeamError::InvalidFieldSize(
                self.field_width_mm,
                self.field_height_mm,
            ));
        }
        if !(self.mu_fraction.is_finite() && self.mu_fraction >= 0.0) {
            return Err(BeamError::InvalidMuFraction(self.mu_fraction));
        }
        if let Some(wedge) = &self.wedge {
            if !(0.0..90.0).contains(&wedge.angle_deg) {
                return Err(BeamError::InvalidWedgeAngle(wedge.angle_deg));
            }
        }
        for (ci, cp) in self.control_points.iter().enumerate() {
            if !(cp.weight.is_finite() && cp.weight >= 0.0) {
                return Err(BeamError::InvalidControlPointWeight(ci, cp.weight));
            }
            for (li, &(left, right)) in cp.mlc.iter().enumerate() {
                if left > right {
                    return Err(BeamError::CrossedLeafPair(ci, li, left, right));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_beam_is_valid() {
        assert!(Beam::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_energy_and_ssd() {
        let beam = Beam {
            energy: 0.0,
            ..Beam::default()
        };
        assert!(matches!(beam.validate(), Err(BeamError::InvalidEnergy(_))));
        let beam = Beam {
            ssd_mm: -5.0,
            ..Beam::default()
        };
        assert!(matches!(beam.validate(), Err(BeamError::InvalidSsd(_))));
    }

    #[test]
    fn test_crossed_leaf_pair_is_rejected() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.mlc[3] = (10.0, -10.0);
        let beam = Beam {
            control_points: vec![cp],
            ..Beam::default()
        };
        assert!(matches!(
            beam.validate(),
            Err(BeamError::CrossedLeafPair(0, 3, _, _))
        ));
    }

    #[test]
    fn test_open_control_point_shape() {
        let cp = ControlPoint::open(90.0, 100.0, 80.0, 20, 0.5);
        assert_eq!(cp.mlc.len(), 20);
        assert_eq!(cp.mlc[0], (-50.0, 50.0));
        assert_eq!(cp.jaws, Jaws::symmetric(100.0, 80.0));
        assert_eq!(cp.gantry_deg, 90.0);
        assert!(!cp.all_leaves_closed());
    }

    #[test]
    fn test_close_leaves() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(0..10);
        assert!(cp.all_leaves_closed());
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(4..6);
        assert!(!cp.all_leaves_closed());
        assert_eq!(cp.mlc[4], (0.0, 0.0));
        assert_eq!(cp.mlc[6], (-50.0, 50.0));
    }

    #[test]
    fn test_jaws_contains() {
        let jaws = Jaws::symmetric(100.0, 50.0);
        assert!(jaws.contains(0.0, 0.0));
        assert!(jaws.contains(-50.0, 25.0));
        assert!(!jaws.contains(-50.1, 0.0));
        assert!(!jaws.contains(0.0, 25.1));
    }

    #[test]
    fn test_invalid_wedge_angle() {
        let beam = Beam {
            wedge: Some(Wedge {
                angle_deg: 95.0,
                orientation_deg: 0.0,
            }),
            ..Beam::default()
        };
        assert!(matches!(
            beam.validate(),
            Err(BeamError::InvalidWedgeAngle(_))
        ));
    }
}
