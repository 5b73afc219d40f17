use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-structure α/β lookup with clinical defaults.
///
/// Targets default to 10 Gy and late-responding normal tissues to 3 Gy;
/// individual structures can be overridden by name, e.g. from a site
/// protocol.
///
/// # Example
///
/// ```
/// use rad_plan_bio_dose::AlphaBetaTable;
///
/// let mut table = AlphaBetaTable::default();
/// table.set_override("SpinalCord", 2.0);
/// assert_eq!(table.alpha_beta("PTV", true), 10.0);
/// assert_eq!(table.alpha_beta("SpinalCord", false), 2.0);
/// assert_eq!(table.alpha_beta("Rectum", false), 3.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaBetaTable {
    target_gy: f64,
    late_tissue_gy: f64,
    overrides: HashMap<String, f64>,
}

impl Default for AlphaBetaTable {
    fn default() -> Self {
        Self {
            target_gy: 10.0,
            late_tissue_gy: 3.0,
            overrides: HashMap::new(),
        }
    }
}

impl AlphaBetaTable {
    pub fn new(target_gy: f64, late_tissue_gy: f64) -> Self {
        Self {
            target_gy,
            late_tissue_gy,
            overrides: HashMap::new(),
        }
    }

    /// Overrides the ratio for one structure name.
    pub fn set_override<S: Into<String>>(&mut self, structure: S, ab_gy: f64) {
        self.overrides.insert(structure.into(), ab_gy);
    }

    /// The α/β ratio for a structure; overrides win over the role default.
    pub fn alpha_beta(&self, structure: &str, is_target: bool) -> f64 {
        if let Some(&ab) = self.overrides.get(structure) {
            return ab;
        }
        if is_target {
            self.target_gy
        } else {
            self.late_tissue_gy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults() {
        let table = AlphaBetaTable::default();
        assert_eq!(table.alpha_beta("PTV", true), 10.0);
        assert_eq!(table.alpha_beta("Parotid", false), 3.0);
    }

    #[test]
    fn test_override_wins_over_role() {
        let mut table = AlphaBetaTable::default();
        table.set_override("PTV_boost", 4.5);
        assert_eq!(table.alpha_beta("PTV_boost", true), 4.5);
    }

    #[test]
    fn test_custom_defaults() {
        let table = AlphaBetaTable::new(12.0, 2.5);
        assert_eq!(table.alpha_beta("GTV", true), 12.0);
        assert_eq!(table.alpha_beta("Lung", false), 2.5);
    }
}
