use crate::{Beam, BeamError, Objective, ObjectiveError, Technique};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("A plan requires at least one beam")]
    NoBeams,
    #[error("Prescribed dose must be positive and finite, got {0} Gy")]
    InvalidPrescribedDose(f64),
    #[error("Fraction count must be at least 1")]
    InvalidFractionCount,
    #[error("Beam [{index}]: {source}")]
    Beam {
        index: usize,
        #[source]
        source: BeamError,
    },
    #[error("Objective [{index}]: {source}")]
    Objective {
        index: usize,
        #[source]
        source: ObjectiveError,
    },
    #[error("Weight vector length [{0}] does not match the number of control points [{1}]")]
    WeightLengthMismatch(usize, usize),
}

/// Prescribed total dose and fractionation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub total_dose_gy: f64,
    pub fractions: u32,
}

impl Prescription {
    pub fn new(total_dose_gy: f64, fractions: u32) -> Self {
        Self {
            total_dose_gy,
            fractions,
        }
    }

    pub fn fraction_dose_gy(&self) -> f64 {
        self.total_dose_gy / self.fractions as f64
    }
}

/// A treatment plan: prescription, beams and optimization objectives.
///
/// The plan's weight vector has one entry per control point, concatenated
/// over beams in order. [`Plan::weights`] and [`Plan::apply_weights`] map
/// between that vector and the control points.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub technique: Technique,
    pub prescription: Prescription,
    pub beams: Vec<Beam>,
    pub objectives: Vec<Objective>,
}

impl Plan {
    pub fn new<S: Into<String>>(id: S, technique: Technique, prescription: Prescription) -> Self {
        Self {
            id: id.into(),
            technique,
            prescription,
            beams: Vec::new(),
            objectives: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.beams.is_empty() {
            return Err(PlanError::NoBeams);
        }
        let rx = self.prescription.total_dose_gy;
        if !(rx.is_finite() && rx > 0.0) {
            return Err(PlanError::InvalidPrescribedDose(rx));
        }
        if self.prescription.fractions == 0 {
            return Err(PlanError::InvalidFractionCount);
        }
        for (index, beam) in self.beams.iter().enumerate() {
            beam.validate()
                .map_err(|source| PlanError::Beam { index, source })?;
        }
        for (index, objective) in self.objectives.iter().enumerate() {
            objective
                .validate()
                .map_err(|source| PlanError::Objective { index, source })?;
        }
        Ok(())
    }

    /// Total number of explicit control points over all beams.
    pub fn total_control_points(&self) -> usize {
        self.beams.iter().map(|b| b.control_points.len()).sum()
    }

    /// The current weight vector: control-point weights concatenated over
    /// beams, normalized to sum 1 (left untouched when the sum is 0).
    pub fn weights(&self) -> Vec<f64> {
        let mut w: Vec<f64> = self
            .beams
            .iter()
            .flat_map(|b| b.control_points.iter().map(|cp| cp.weight))
            .collect();
        let sum: f64 = w.iter().sum();
        if sum > 0.0 {
            for v in &mut w {
                *v /= sum;
            }
        }
        w
    }

    /// Writes a weight vector back onto the control points.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::WeightLengthMismatch` when the vector length does
    /// not match [`Plan::total_control_points`].
    pub fn apply_weights(&mut self, weights: &[f64]) -> Result<(), PlanError> {
        let n = self.total_control_points();
        if weights.len() != n {
            return Err(PlanError::WeightLengthMismatch(weights.len(), n));
        }
        let mut it = weights.iter();
        for beam in &mut self.beams {
            for cp in &mut beam.control_points {
                cp.weight = *it.next().expect("length checked above");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlPoint;

    fn two_beam_plan() -> Plan {
        let mut plan = Plan::new("p1", Technique::Imrt, Prescription::new(60.0, 30));
        for gantry in [0.0, 180.0] {
            plan.beams.push(Beam {
                id: format!("B{gantry}"),
                gantry_deg: gantry,
                control_points: vec![
                    ControlPoint::open(gantry, 100.0, 100.0, 10, 1.0),
                    ControlPoint::open(gantry, 100.0, 100.0, 10, 3.0),
                ],
                ..Beam::default()
            });
        }
        plan
    }

    #[test]
    fn test_prescription_fraction_dose() {
        let rx = Prescription::new(60.0, 30);
        assert!((rx.fraction_dose_gy() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_empty_plan() {
        let plan = Plan::new("p", Technique::ThreeDCrt, Prescription::new(60.0, 30));
        assert!(matches!(plan.validate(), Err(PlanError::NoBeams)));
    }

    #[test]
    fn test_validate_rejects_bad_prescription() {
        let mut plan = two_beam_plan();
        plan.prescription.total_dose_gy = 0.0;
        assert!(matches!(
            plan.validate(),
            Err(PlanError::InvalidPrescribedDose(_))
        ));
        let mut plan = two_beam_plan();
        plan.prescription.fractions = 0;
        assert!(matches!(plan.validate(), Err(PlanError::InvalidFractionCount)));
    }

    #[test]
    fn test_weights_are_normalized() {
        let plan = two_beam_plan();
        let w = plan.weights();
        assert_eq!(w.len(), 4);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((w[0] - 0.125).abs() < 1e-12);
        assert!((w[1] - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_apply_weights_round_trip() {
        let mut plan = two_beam_plan();
        let w = vec![0.4, 0.1, 0.3, 0.2];
        plan.apply_weights(&w).unwrap();
        assert_eq!(plan.weights(), w);
        assert!(matches!(
            plan.apply_weights(&[0.5, 0.5]),
            Err(PlanError::WeightLengthMismatch(2, 4))
        ));
    }

    #[test]
    fn test_validate_propagates_beam_errors() {
        let mut plan = two_beam_plan();
        plan.beams[1].energy = -6.0;
        assert!(matches!(
            plan.validate(),
            Err(PlanError::Beam { index: 1, .. })
        ));
    }
}
