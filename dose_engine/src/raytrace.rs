use nalgebra::Vector3;
use rad_plan_world::Grid3;
use rayon::prelude::*;

/// Computes the radiological-depth field for a beam source position.
///
/// For every voxel the relative electron density is integrated along the ray
/// from `source` to the voxel center with a fixed step of half the smallest
/// voxel spacing, giving the water-equivalent depth in mm. Samples outside
/// the grid contribute nothing, so the integration effectively starts where
/// the ray enters the patient volume and terminates at the voxel.
///
/// The integration is independent per voxel and parallelized over z-slabs;
/// the result is deterministic for a given input.
pub fn radiological_depth(density: &Grid3<f32>, source: &Vector3<f64>) -> Grid3<f32> {
    let dims = *density.dims();
    let spacing = *density.spacing();
    let origin = *density.origin();
    let d = density.direction();
    let step = 0.5 * spacing.iter().copied().fold(f64::INFINITY, f64::min);

    // Work in grid-local coordinates: the direction basis is orthonormal, so
    // local = D * (p - origin) with D rows the grid axes.
    let shifted = [
        source.x - origin[0],
        source.y - origin[1],
        source.z - origin[2],
    ];
    let local_source = Vector3::new(
        d[0][0] * shifted[0] + d[0][1] * shifted[1] + d[0][2] * shifted[2],
        d[1][0] * shifted[0] + d[1][1] * shifted[1] + d[1][2] * shifted[2],
        d[2][0] * shifted[0] + d[2][1] * shifted[1] + d[2][2] * shifted[2],
    );

    let mut out = density.like(0.0f32);
    let (nx, ny) = (dims[0], dims[1]);
    let slab = nx * ny;
    let data = density.data();
    out.data_mut()
        .par_chunks_mut(slab)
        .enumerate()
        .for_each(|(z, chunk)| {
            for y in 0..ny {
                for x in 0..nx {
                    let target = Vector3::new(
                        x as f64 * spacing[0],
                        y as f64 * spacing[1],
                        z as f64 * spacing[2],
                    );
                    chunk[y * nx + x] =
                        integrate_ray(&local_source, &target, data, &dims, &spacing, step);
                }
            }
        });
    out
}

/// Integrates density along the local-frame segment source → target.
fn integrate_ray(
    source: &Vector3<f64>,
    target: &Vector3<f64>,
    data: &[f32],
    dims: &[usize; 3],
    spacing: &[f64; 3],
    step: f64,
) -> f32 {
    let delta = target - source;
    let dist = delta.norm();
    if dist < 1e-9 {
        return 0.0;
    }
    let dir = delta / dist;

    // Clip the segment against the grid bounding box so the march skips the
    // air gap between the source and the patient.
    let mut t_enter = 0.0f64;
    for axis in 0..3 {
        let lo = -0.5 * spacing[axis];
        let hi = (dims[axis] as f64 - 0.5) * spacing[axis];
        if dir[axis].abs() < 1e-12 {
            if source[axis] < lo || source[axis] > hi {
                return 0.0;
            }
            continue;
        }
        let ta = (lo - source[axis]) / dir[axis];
        let tb = (hi - source[axis]) / dir[axis];
        t_enter = t_enter.max(ta.min(tb));
    }
    if t_enter >= dist {
        return 0.0;
    }

    let sample = |t: f64| -> f64 {
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let v = ((source[axis] + dir[axis] * t) / spacing[axis]).round();
            if v < 0.0 || v >= dims[axis] as f64 {
                return 0.0;
            }
            idx[axis] = v as usize;
        }
        data[idx[0] + dims[0] * (idx[1] + dims[1] * idx[2])] as f64
    };

    let span = dist - t_enter;
    let full_steps = (span / step) as usize;
    let mut acc = 0.0f64;
    for i in 0..full_steps {
        acc += sample(t_enter + (i as f64 + 0.5) * step) * step;
    }
    let remainder = span - full_steps as f64 * step;
    if remainder > 1e-12 {
        acc += sample(dist - 0.5 * remainder) * remainder;
    }
    acc as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_cube(n: usize, spacing: f64) -> Grid3<f32> {
        Grid3::new([n, n, n], [spacing; 3], [0.0; 3], 1.0f32).unwrap()
    }

    #[test]
    fn test_depth_grows_with_distance_from_source() {
        let density = water_cube(10, 2.0);
        // Source on the -z side, aligned with the (5, 5, _) column.
        let source = Vector3::new(10.0, 10.0, -500.0);
        let depth = radiological_depth(&density, &source);
        let mut prev = -1.0f32;
        for z in 0..10 {
            let v = depth.get(5, 5, z).unwrap();
            assert!(v > prev, "depth not increasing at z={z}");
            prev = v;
        }
    }

    #[test]
    fn test_depth_approximates_geometric_depth_in_water() {
        let density = water_cube(10, 2.0);
        let source = Vector3::new(10.0, 10.0, -500.0);
        let depth = radiological_depth(&density, &source);
        // Voxel (5, 5, 7) sits 15 mm past the grid entry face at z = -1 mm.
        let expected = 7.0 * 2.0 + 1.0;
        let got = depth.get(5, 5, 7).unwrap() as f64;
        assert!((got - expected).abs() < 2.0, "got {got}, expected ~{expected}");
    }

    #[test]
    fn test_depth_scales_with_density() {
        let mut lung = water_cube(10, 2.0);
        lung.data_mut().iter_mut().for_each(|v| *v = 0.25);
        let source = Vector3::new(10.0, 10.0, -500.0);
        let water_depth = radiological_depth(&water_cube(10, 2.0), &source);
        let lung_depth = radiological_depth(&lung, &source);
        let w = water_depth.get(5, 5, 9).unwrap();
        let l = lung_depth.get(5, 5, 9).unwrap();
        assert!((l / w - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_ray_missing_the_grid_gives_zero_everywhere_off_axis() {
        let density = water_cube(4, 1.0);
        // Source far along +x, parallel rays along -x stay inside their own
        // y/z lane; the first voxel of a lane has only ~half a voxel of
        // upstream material.
        let source = Vector3::new(500.0, 1.0, 1.0);
        let depth = radiological_depth(&density, &source);
        let near_face = depth.get(3, 1, 1).unwrap();
        assert!(near_face < 1.0, "near-face depth should be small: {near_face}");
        let far_face = depth.get(0, 1, 1).unwrap();
        assert!(far_face > 2.5, "far-face depth should be ~3.5: {far_face}");
    }
}
