use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum ModalityError {
    #[error("Failed to parse modality from: {0}")]
    ParseError(String),
}

/// Radiation modality of a treatment beam.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    #[default]
    Photon,
    Electron,
    Proton,
}

impl FromStr for Modality {
    type Err = ModalityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PHOTON" => Ok(Modality::Photon),
            "ELECTRON" => Ok(Modality::Electron),
            "PROTON" => Ok(Modality::Proton),
            t => Err(ModalityError::ParseError(t.into())),
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Modality::Photon => "PHOTON",
            Modality::Electron => "ELECTRON",
            Modality::Proton => "PROTON",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TechniqueError {
    #[error("Failed to parse treatment technique from: {0}")]
    ParseError(String),
}

/// Delivery technique of a plan.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technique {
    #[default]
    ThreeDCrt,
    FieldInField,
    Imrt,
    Vmat,
    Srs,
    Proton,
    Adaptive,
}

impl FromStr for Technique {
    type Err = TechniqueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "3DCRT" => Ok(Technique::ThreeDCrt),
            "FIF" => Ok(Technique::FieldInField),
            "IMRT" => Ok(Technique::Imrt),
            "VMAT" => Ok(Technique::Vmat),
            "SRS" | "SBRT" => Ok(Technique::Srs),
            "PROTON" => Ok(Technique::Proton),
            "ADAPTIVE" => Ok(Technique::Adaptive),
            t => Err(TechniqueError::ParseError(t.into())),
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Technique::ThreeDCrt => "3DCRT",
            Technique::FieldInField => "FIF",
            Technique::Imrt => "IMRT",
            Technique::Vmat => "VMAT",
            Technique::Srs => "SRS",
            Technique::Proton => "PROTON",
            Technique::Adaptive => "ADAPTIVE",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StructureRoleError {
    #[error("Failed to parse structure role from: {0}")]
    ParseError(String),
}

/// Clinical role of a delineated structure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureRole {
    Ptv,
    Oar,
    #[default]
    Other,
}

impl FromStr for StructureRole {
    type Err = StructureRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PTV" | "TARGET" => Ok(StructureRole::Ptv),
            "OAR" | "ORGAN" => Ok(StructureRole::Oar),
            "OTHER" => Ok(StructureRole::Other),
            t => Err(StructureRoleError::ParseError(t.into())),
        }
    }
}

impl std::fmt::Display for StructureRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StructureRole::Ptv => "PTV",
            StructureRole::Oar => "OAR",
            StructureRole::Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ArcDirectionError {
    #[error("Failed to parse arc rotation direction from: {0}")]
    ParseError(String),
}

/// Rotation sense of an arc sweep.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArcDirection {
    #[default]
    Clockwise,
    CounterClockwise,
}

impl ArcDirection {
    /// Signed sweep direction: +1 for clockwise, −1 for counter-clockwise.
    pub fn sign(&self) -> f64 {
        match self {
            ArcDirection::Clockwise => 1.0,
            ArcDirection::CounterClockwise => -1.0,
        }
    }
}

impl FromStr for ArcDirection {
    type Err = ArcDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CW" => Ok(ArcDirection::Clockwise),
            "CCW" => Ok(ArcDirection::CounterClockwise),
            t => Err(ArcDirectionError::ParseError(t.into())),
        }
    }
}

impl std::fmt::Display for ArcDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArcDirection::Clockwise => "CW",
            ArcDirection::CounterClockwise => "CCW",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_from_str() {
        assert_eq!(Modality::from_str("PHOTON").unwrap(), Modality::Photon);
        assert_eq!(Modality::from_str("electron").unwrap(), Modality::Electron);
        assert_eq!(Modality::from_str("Proton").unwrap(), Modality::Proton);
        assert!(Modality::from_str("NEUTRON").is_err());
    }

    #[test]
    fn test_modality_display() {
        assert_eq!(Modality::Photon.to_string(), "PHOTON");
        assert_eq!(Modality::Electron.to_string(), "ELECTRON");
        assert_eq!(Modality::Proton.to_string(), "PROTON");
    }

    #[test]
    fn test_technique_from_str() {
        assert_eq!(Technique::from_str("3DCRT").unwrap(), Technique::ThreeDCrt);
        assert_eq!(Technique::from_str("FIF").unwrap(), Technique::FieldInField);
        assert_eq!(Technique::from_str("imrt").unwrap(), Technique::Imrt);
        assert_eq!(Technique::from_str("VMAT").unwrap(), Technique::Vmat);
        assert_eq!(Technique::from_str("SRS").unwrap(), Technique::Srs);
        assert_eq!(Technique::from_str("SBRT").unwrap(), Technique::Srs);
        assert_eq!(Technique::from_str("PROTON").unwrap(), Technique::Proton);
        assert_eq!(Technique::from_str("ADAPTIVE").unwrap(), Technique::Adaptive);
        assert!(Technique::from_str("INVALID").is_err());
    }

    #[test]
    fn test_structure_role_round_trip() {
        for role in [StructureRole::Ptv, StructureRole::Oar, StructureRole::Other] {
            let parsed: StructureRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert_eq!(StructureRole::from_str("TARGET").unwrap(), StructureRole::Ptv);
        assert!(StructureRole::from_str("???").is_err());
    }

    #[test]
    fn test_arc_direction() {
        assert_eq!(ArcDirection::from_str("CW").unwrap(), ArcDirection::Clockwise);
        assert_eq!(
            ArcDirection::from_str("ccw").unwrap(),
            ArcDirection::CounterClockwise
        );
        assert!(ArcDirection::from_str("UP").is_err());
        assert_eq!(ArcDirection::Clockwise.sign(), 1.0);
        assert_eq!(ArcDirection::CounterClockwise.sign(), -1.0);
    }
}
