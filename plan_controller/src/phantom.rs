//! Simple geometric phantoms for commissioning checks and tests.

use rad_plan_data::{Structure, StructureRole};
use rad_plan_world::Grid3;

/// A cubic water phantom (`HU = 0`) of `n³` voxels centered on the origin.
pub fn water_ct(n: usize, spacing_mm: f64) -> Grid3<i16> {
    let half = (n as f64 - 1.0) / 2.0;
    Grid3::new(
        [n, n, n],
        [spacing_mm; 3],
        [-half * spacing_mm; 3],
        0i16,
    )
    .expect("phantom geometry is valid")
}

/// Overwrites the axis-aligned box `lo..hi` (exclusive) with a HU value,
/// e.g. to insert a lung-equivalent region.
pub fn insert_box(ct: &mut Grid3<i16>, hu: i16, lo: [usize; 3], hi: [usize; 3]) {
    for z in lo[2]..hi[2] {
        for y in lo[1]..hi[1] {
            for x in lo[0]..hi[0] {
                ct.set(x, y, z, hu).expect("box inside the phantom");
            }
        }
    }
}

/// A cubic structure of `2·half_width` voxels per side centered in the grid.
pub fn centered_box_structure<S: Into<String>>(
    ct: &Grid3<i16>,
    name: S,
    role: StructureRole,
    half_width: usize,
) -> Structure {
    let dims = *ct.dims();
    let mut mask = ct.like(false);
    let c = [dims[0] / 2, dims[1] / 2, dims[2] / 2];
    for z in c[2] - half_width..c[2] + half_width {
        for y in c[1] - half_width..c[1] + half_width {
            for x in c[0] - half_width..c[0] + half_width {
                mask.set(x, y, z, true).expect("structure inside the phantom");
            }
        }
    }
    Structure::new(name, role, mask)
}

/// An off-axis box structure, e.g. an organ at risk beside the target.
pub fn box_structure<S: Into<String>>(
    ct: &Grid3<i16>,
    name: S,
    role: StructureRole,
    lo: [usize; 3],
    hi: [usize; 3],
) -> Structure {
    let mut mask = ct.like(false);
    for z in lo[2]..hi[2] {
        for y in lo[1]..hi[1] {
            for x in lo[0]..hi[0] {
                mask.set(x, y, z, true).expect("structure inside the phantom");
            }
        }
    }
    Structure::new(name, role, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_water_phantom_is_centered() {
        let ct = water_ct(32, 5.0);
        let c = ct.voxel_center(16, 16, 16);
        // With an even voxel count the origin falls between voxels.
        assert!((c.x - 2.5).abs() < 1e-9);
        assert!(ct.data().iter().all(|&hu| hu == 0));
    }

    #[test]
    fn test_insert_box_sets_the_region() {
        let mut ct = water_ct(16, 5.0);
        insert_box(&mut ct, -700, [4, 4, 4], [8, 8, 8]);
        assert_eq!(ct.get(4, 4, 4).unwrap(), -700);
        assert_eq!(ct.get(7, 7, 7).unwrap(), -700);
        assert_eq!(ct.get(8, 8, 8).unwrap(), 0);
    }

    #[test]
    fn test_centered_structure_size() {
        let ct = water_ct(32, 5.0);
        let ptv = centered_box_structure(&ct, "PTV", StructureRole::Ptv, 4);
        assert_eq!(ptv.voxel_count(), 512);
    }
}
