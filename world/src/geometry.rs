use nalgebra::Vector3;

/// Unit vector of beam travel for a gantry and couch angle pair (degrees).
///
/// At couch 0 the beam rotates in the x–z plane: gantry 0 points along −z and
/// gantry 90 along +x. A couch rotation tilts the axis toward y. The returned
/// vector points from the source toward the isocenter.
///
/// # Example
///
/// ```
/// use rad_plan_world::geometry::beam_direction;
///
/// let d = beam_direction(0.0, 0.0);
/// assert!((d.z - (-1.0)).abs() < 1e-12);
/// let d = beam_direction(90.0, 0.0);
/// assert!((d.x - 1.0).abs() < 1e-12);
/// ```
pub fn beam_direction(gantry_deg: f64, couch_deg: f64) -> Vector3<f64> {
    let g = gantry_deg.to_radians();
    let c = couch_deg.to_radians();
    Vector3::new(g.sin() * c.cos(), c.sin(), -g.cos() * c.cos()).normalize()
}

/// Deterministic frame perpendicular to the beam direction `d`.
///
/// `u := normalize(−d_z, 0, d_x)`; when that vector degenerates (beam along
/// the y-axis) `u := (1, 0, 0)`. `w := d × u`. The same `d` always yields the
/// same `(u, w)`, so aperture coordinates are stable across beams and runs.
pub fn perpendicular_basis(d: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let raw = Vector3::new(-d.z, 0.0, d.x);
    let u = if raw.norm() < 1e-9 {
        Vector3::new(1.0, 0.0, 0.0)
    } else {
        raw.normalize()
    };
    let w = d.cross(&u);
    (u, w)
}

/// Position of the source: `ssd_mm` upstream of the isocenter along `d`.
pub fn source_position(
    isocenter: &Vector3<f64>,
    d: &Vector3<f64>,
    ssd_mm: f64,
) -> Vector3<f64> {
    isocenter - d * ssd_mm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_cardinal_gantry_angles() {
        let d = beam_direction(0.0, 0.0);
        assert_close(d.x, 0.0);
        assert_close(d.y, 0.0);
        assert_close(d.z, -1.0);

        let d = beam_direction(180.0, 0.0);
        assert_close(d.z, 1.0);

        let d = beam_direction(270.0, 0.0);
        assert_close(d.x, -1.0);
    }

    #[test]
    fn test_couch_tilts_toward_y() {
        let d = beam_direction(0.0, 90.0);
        assert_close(d.x, 0.0);
        assert_close(d.y, 1.0);
        assert_close(d.z, 0.0);
    }

    #[test]
    fn test_basis_is_orthonormal() {
        for gantry in [0.0, 37.0, 90.0, 144.0, 216.0, 288.0] {
            for couch in [0.0, 15.0, -30.0] {
                let d = beam_direction(gantry, couch);
                let (u, w) = perpendicular_basis(&d);
                assert!((u.norm() - 1.0).abs() < 1e-9);
                assert!((w.norm() - 1.0).abs() < 1e-9);
                assert!(u.dot(&d).abs() < 1e-9);
                assert!(w.dot(&d).abs() < 1e-9);
                assert!(u.dot(&w).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_degenerate_beam_along_y() {
        let d = Vector3::new(0.0, 1.0, 0.0);
        let (u, w) = perpendicular_basis(&d);
        assert_close(u.x, 1.0);
        assert_close(u.y, 0.0);
        assert_close(u.z, 0.0);
        assert!((w.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_source_position_upstream() {
        let iso = Vector3::new(0.0, 0.0, 0.0);
        let d = beam_direction(0.0, 0.0);
        let s = source_position(&iso, &d, 1000.0);
        assert_close(s.z, 1000.0);
        assert_close(s.x, 0.0);
    }
}
