use crate::controller::PlanReport;
use chrono::{DateTime, Utc};
use rad_plan_data::{Beam, Plan, Prescription, Technique};
use rad_plan_world::Grid3;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum BundleError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Flat serialization of a dose grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseGridData {
    pub dims: [usize; 3],
    pub spacing_mm: [f64; 3],
    pub origin_mm: [f64; 3],
    /// Gray, in `x + nx * (y + ny * z)` order.
    pub values: Vec<f32>,
}

impl From<&Grid3<f32>> for DoseGridData {
    fn from(grid: &Grid3<f32>) -> Self {
        Self {
            dims: *grid.dims(),
            spacing_mm: *grid.spacing(),
            origin_mm: *grid.origin(),
            values: grid.data().to_vec(),
        }
    }
}

/// The persisted result of a planning run: metadata, the beam list, a
/// reference to the structure set, the final weight vector and the final
/// dose grid. Opaque to the engine; written by the controller side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanBundle {
    pub plan_id: String,
    pub technique: Technique,
    pub prescription: Prescription,
    pub created: DateTime<Utc>,
    pub structure_set: String,
    pub beams: Vec<Beam>,
    pub weights: Vec<f64>,
    pub dose: DoseGridData,
}

impl PlanBundle {
    pub fn new<S: Into<String>>(plan: &Plan, structure_set: S, report: &PlanReport) -> Self {
        Self {
            plan_id: plan.id.clone(),
            technique: plan.technique,
            prescription: plan.prescription,
            created: Utc::now(),
            structure_set: structure_set.into(),
            beams: plan.beams.clone(),
            weights: report.weights.clone(),
            dose: DoseGridData::from(&report.dose),
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), BundleError> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self, BundleError> {
        let file = std::fs::File::open(path.as_ref())?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rad_plan_dose_engine::ComputeStatus;

    fn dummy_report(dose: Grid3<f32>) -> PlanReport {
        PlanReport {
            dose,
            weights: vec![0.25, 0.75],
            initial_objective: None,
            optimized_objective: None,
            final_objective: None,
            optimizer_status: None,
            dvhs: Vec::new(),
            metrics: None,
            bio: Vec::new(),
            status: ComputeStatus::Complete,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_bundle_round_trip() {
        let dose = Grid3::from_vec(
            [2, 2, 2],
            [2.5; 3],
            [-2.5; 3],
            vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5],
        )
        .unwrap();
        let mut plan = Plan::new("p42", Technique::Imrt, Prescription::new(60.0, 30));
        plan.beams.push(Beam {
            id: "B1".into(),
            ..Beam::default()
        });
        let bundle = PlanBundle::new(&plan, "SS-1", &dummy_report(dose));

        let file = tempfile::NamedTempFile::new().unwrap();
        bundle.write_json(file.path()).unwrap();
        let loaded = PlanBundle::read_json(file.path()).unwrap();

        assert_eq!(loaded.plan_id, "p42");
        assert_eq!(loaded.technique, Technique::Imrt);
        assert_eq!(loaded.structure_set, "SS-1");
        assert_eq!(loaded.weights, bundle.weights);
        assert_eq!(loaded.dose, bundle.dose);
        assert_eq!(loaded.created, bundle.created);
        assert_eq!(loaded.beams.len(), 1);
    }
}
