use rad_plan_data::{ControlPoint, Jaws};

/// Aperture membership test for one control point, in the beam-perpendicular
/// `(u, w)` frame at the isocenter plane.
///
/// A collimator rotation spins the jaw/MLC assembly inside that plane, so
/// the incoming coordinates are rotated into the collimator frame first.
/// Leaf pairs stack uniformly along `w` with width `field_height / n_leaves`;
/// leaf `i` covers `w ∈ [−H/2 + i·W, −H/2 + (i+1)·W]`. A point is inside the
/// aperture iff it lies inside the jaw window and within the `(left, right)`
/// opening of the leaf pair covering its `w` coordinate.
#[derive(Debug, Clone)]
pub struct Aperture<'a> {
    mlc: &'a [(f64, f64)],
    jaws: Jaws,
    leaf_width: f64,
    half_height: f64,
    collimator_cos: f64,
    collimator_sin: f64,
}

impl<'a> Aperture<'a> {
    pub fn new(cp: &'a ControlPoint, field_height_mm: f64, collimator_deg: f64) -> Self {
        let n = cp.mlc.len().max(1);
        let theta = collimator_deg.to_radians();
        Self {
            mlc: &cp.mlc,
            jaws: cp.jaws,
            leaf_width: field_height_mm / n as f64,
            half_height: field_height_mm / 2.0,
            collimator_cos: theta.cos(),
            collimator_sin: theta.sin(),
        }
    }

    pub fn contains(&self, u: f64, w: f64) -> bool {
        let (c, s) = (self.collimator_cos, self.collimator_sin);
        let (u, w) = (c * u + s * w, -s * u + c * w);
        if !self.jaws.contains(u, w) {
            return false;
        }
        if self.mlc.is_empty() {
            return true;
        }
        let i = ((w + self.half_height) / self.leaf_width).floor();
        if i < 0.0 || i >= self.mlc.len() as f64 {
            return false;
        }
        // A zero-width opening is a closed pair and blocks its whole row.
        let (left, right) = self.mlc[i as usize];
        right > left && u >= left && u <= right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_field_passes_inside_the_jaws() {
        let cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        let aperture = Aperture::new(&cp, 100.0, 0.0);
        assert!(aperture.contains(0.0, 0.0));
        assert!(aperture.contains(-49.0, 49.0));
        assert!(!aperture.contains(-51.0, 0.0));
        assert!(!aperture.contains(0.0, 51.0));
    }

    #[test]
    fn test_closed_central_leaves_block_the_axis() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(4..6);
        let aperture = Aperture::new(&cp, 100.0, 0.0);
        // w = 0 falls in leaf 5, which is closed.
        assert!(!aperture.contains(0.0, 0.0));
        // Leaf 3 covers w in [-20, -10) and is open.
        assert!(aperture.contains(0.0, -15.0));
    }

    #[test]
    fn test_leaf_indexing_boundaries() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(0..1);
        let aperture = Aperture::new(&cp, 100.0, 0.0);
        // Leaf 0 covers w in [-50, -40).
        assert!(!aperture.contains(0.0, -45.0));
        assert!(aperture.contains(0.0, -39.9));
    }

    #[test]
    fn test_jaws_clip_open_leaves() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.jaws = Jaws::symmetric(40.0, 40.0);
        let aperture = Aperture::new(&cp, 100.0, 0.0);
        assert!(aperture.contains(0.0, 0.0));
        assert!(!aperture.contains(30.0, 0.0));
        assert!(!aperture.contains(0.0, -30.0));
    }

    #[test]
    fn test_collimator_rotation_spins_the_leaf_bank() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(4..6);
        // A 90° collimator turn maps (u, w) onto (w, -u): the closed band
        // now blocks a strip along u = (-10, 10] instead of along w.
        let aperture = Aperture::new(&cp, 100.0, 90.0);
        assert!(!aperture.contains(0.0, 0.0));
        assert!(!aperture.contains(-5.0, 0.0));
        assert!(!aperture.contains(0.0, 15.0));
        assert!(aperture.contains(-15.0, 0.0));
        assert!(aperture.contains(15.0, 0.0));
    }

    #[test]
    fn test_fully_closed_bank_blocks_everything() {
        let mut cp = ControlPoint::open(0.0, 100.0, 100.0, 10, 1.0);
        cp.close_leaves(0..10);
        let aperture = Aperture::new(&cp, 100.0, 0.0);
        for u in [-40.0, 0.0, 40.0] {
            for w in [-40.0, 0.0, 40.0] {
                assert!(!aperture.contains(u, w));
            }
        }
    }
}
