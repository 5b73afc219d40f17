use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum ObjectiveError {
    #[error("Failed to parse objective kind from: {0}")]
    ParseError(String),
    #[error("Dose parameter must be non-negative and finite, got {0}")]
    InvalidDose(f64),
    #[error("Volume parameter must lie in [0, 100] for DVH objectives, got {0}")]
    InvalidVolume(f64),
    #[error("Objective weight must be non-negative and finite, got {0}")]
    InvalidWeight(f64),
}

/// The kind of a dose criterion, matching the penalty table of the objective
/// evaluator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveKind {
    MaxDose,
    MinDose,
    MaxDvh,
    MinDvh,
    MeanDose,
    Conformity,
    Homogeneity,
    Uniformity,
}

impl ObjectiveKind {
    /// True for the kinds whose volume parameter selects a DVH point.
    pub fn is_dvh(&self) -> bool {
        matches!(self, ObjectiveKind::MaxDvh | ObjectiveKind::MinDvh)
    }
}

impl FromStr for ObjectiveKind {
    type Err = ObjectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MAX_DOSE" => Ok(ObjectiveKind::MaxDose),
            "MIN_DOSE" => Ok(ObjectiveKind::MinDose),
            "MAX_DVH" => Ok(ObjectiveKind::MaxDvh),
            "MIN_DVH" => Ok(ObjectiveKind::MinDvh),
            "MEAN_DOSE" => Ok(ObjectiveKind::MeanDose),
            "CONFORMITY" => Ok(ObjectiveKind::Conformity),
            "HOMOGENEITY" => Ok(ObjectiveKind::Homogeneity),
            "UNIFORMITY" => Ok(ObjectiveKind::Uniformity),
            t => Err(ObjectiveError::ParseError(t.into())),
        }
    }
}

impl std::fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectiveKind::MaxDose => "MAX_DOSE",
            ObjectiveKind::MinDose => "MIN_DOSE",
            ObjectiveKind::MaxDvh => "MAX_DVH",
            ObjectiveKind::MinDvh => "MIN_DVH",
            ObjectiveKind::MeanDose => "MEAN_DOSE",
            ObjectiveKind::Conformity => "CONFORMITY",
            ObjectiveKind::Homogeneity => "HOMOGENEITY",
            ObjectiveKind::Uniformity => "UNIFORMITY",
        };
        write!(f, "{}", s)
    }
}

/// A structure-specific dose criterion with a relative weight.
///
/// `dose_gy` is the criterion's dose parameter; `volume_pct` is only
/// meaningful for the DVH kinds, where it selects the volume level the dose
/// is compared at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub structure: String,
    pub kind: ObjectiveKind,
    pub dose_gy: f64,
    pub volume_pct: f64,
    pub weight: f64,
}

impl Objective {
    pub fn new<S: Into<String>>(structure: S, kind: ObjectiveKind, dose_gy: f64) -> Self {
        Self {
            structure: structure.into(),
            kind,
            dose_gy,
            volume_pct: 0.0,
            weight: 1.0,
        }
    }

    pub fn with_volume(mut self, volume_pct: f64) -> Self {
        self.volume_pct = volume_pct;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn validate(&self) -> Result<(), ObjectiveError> {
        if !(self.dose_gy.is_finite() && self.dose_gy >= 0.0) {
            return Err(ObjectiveError::InvalidDose(self.dose_gy));
        }
        if self.kind.is_dvh() && !(0.0..=100.0).contains(&self.volume_pct) {
            return Err(ObjectiveError::InvalidVolume(self.volume_pct));
        }
        if !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(ObjectiveError::InvalidWeight(self.weight));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ObjectiveKind::MaxDose,
            ObjectiveKind::MinDose,
            ObjectiveKind::MaxDvh,
            ObjectiveKind::MinDvh,
            ObjectiveKind::MeanDose,
            ObjectiveKind::Conformity,
            ObjectiveKind::Homogeneity,
            ObjectiveKind::Uniformity,
        ] {
            let parsed: ObjectiveKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!(ObjectiveKind::from_str("DOSE").is_err());
    }

    #[test]
    fn test_dvh_kinds() {
        assert!(ObjectiveKind::MaxDvh.is_dvh());
        assert!(ObjectiveKind::MinDvh.is_dvh());
        assert!(!ObjectiveKind::MeanDose.is_dvh());
    }

    #[test]
    fn test_validation() {
        assert!(
            Objective::new("PTV", ObjectiveKind::MinDose, 60.0)
                .validate()
                .is_ok()
        );
        assert!(matches!(
            Objective::new("PTV", ObjectiveKind::MinDose, -1.0).validate(),
            Err(ObjectiveError::InvalidDose(_))
        ));
        assert!(matches!(
            Objective::new("PTV", ObjectiveKind::MaxDvh, 50.0)
                .with_volume(120.0)
                .validate(),
            Err(ObjectiveError::InvalidVolume(_))
        ));
        assert!(matches!(
            Objective::new("PTV", ObjectiveKind::MeanDose, 50.0)
                .with_weight(f64::INFINITY)
                .validate(),
            Err(ObjectiveError::InvalidWeight(_))
        ));
        // The volume parameter is ignored for non-DVH kinds.
        assert!(
            Objective::new("PTV", ObjectiveKind::MeanDose, 50.0)
                .with_volume(120.0)
                .validate()
                .is_ok()
        );
    }
}
