use crate::StructureRole;
use rad_plan_world::Grid3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug)]
pub enum StructureSetError {
    #[error("A structure named [{0}] already exists")]
    DuplicateName(String),
    #[error("Structure [{name}] mask dimensions {got:?} do not match the grid {expected:?}")]
    GeometryMismatch {
        name: String,
        expected: [usize; 3],
        got: [usize; 3],
    },
}

/// A named binary mask co-registered with the dose grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    pub role: StructureRole,
    pub color: [u8; 3],
    pub mask: Grid3<bool>,
}

impl Structure {
    pub fn new<S: Into<String>>(name: S, role: StructureRole, mask: Grid3<bool>) -> Self {
        Self {
            name: name.into(),
            role,
            color: [255, 0, 0],
            mask,
        }
    }

    /// Number of voxels inside the mask.
    pub fn voxel_count(&self) -> usize {
        self.mask.data().iter().filter(|&&b| b).count()
    }

    /// Structure volume in mm³ derived from the mask and voxel size.
    pub fn volume_mm3(&self) -> f64 {
        self.voxel_count() as f64 * self.mask.voxel_volume_mm3()
    }

    /// Linear indices (dose-grid order) of the voxels inside the mask.
    pub fn voxel_indices(&self) -> Vec<usize> {
        self.mask
            .data()
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect()
    }
}

/// The set of delineated structures of a plan.
///
/// Structure names are unique; a name → index table is kept so hot loops can
/// work with indices instead of string comparisons.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructureSet {
    structures: Vec<Structure>,
    by_name: HashMap<String, usize>,
}

impl StructureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a structure to the set.
    ///
    /// # Errors
    ///
    /// Returns `StructureSetError::DuplicateName` when a structure with the
    /// same name is already present.
    pub fn insert(&mut self, structure: Structure) -> Result<(), StructureSetError> {
        if self.by_name.contains_key(&structure.name) {
            return Err(StructureSetError::DuplicateName(structure.name));
        }
        self.by_name
            .insert(structure.name.clone(), self.structures.len());
        self.structures.push(structure);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Structure> {
        self.by_name.get(name).map(|&i| &self.structures[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.structures.iter()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// The first structure with the PTV role, if any.
    pub fn target(&self) -> Option<&Structure> {
        self.structures
            .iter()
            .find(|s| s.role == StructureRole::Ptv)
    }

    /// Checks that every mask matches the dimensions of `grid`.
    pub fn validate_geometry<T>(&self, grid: &Grid3<T>) -> Result<(), StructureSetError> {
        for s in &self.structures {
            if s.mask.dims() != grid.dims() {
                return Err(StructureSetError::GeometryMismatch {
                    name: s.name.clone(),
                    expected: *grid.dims(),
                    got: *s.mask.dims(),
                });
            }
        }
        Ok(())
    }
}
