use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Grid dimensions must be strictly positive, got ({0}, {1}, {2})")]
    InvalidDimensions(usize, usize, usize),
    #[error("Voxel spacing must be strictly positive and finite, got ({0}, {1}, {2})")]
    InvalidSpacing(f64, f64, f64),
    #[error("Direction cosines do not form an orthonormal basis")]
    InvalidDirection,
    #[error("Index {1} exceeds size {2} along axis {0}")]
    IndexOutOfBounds(usize, usize, usize),
    #[error("Data length [{0}] does not match the grid size [{1}]")]
    DataLengthMismatch(usize, usize),
}

pub type GridResult<T> = std::result::Result<T, GridError>;

/// A regular 3D voxel grid backed by a single contiguous buffer.
///
/// Voxels are addressed by integer indices `(x, y, z)` and stored in row-major
/// order along x, i.e. `linear = x + nx * (y + ny * z)`. The grid carries its
/// voxel spacing (mm), the patient coordinates of the first voxel center (mm)
/// and direction cosines, so voxel indices can be mapped to patient space and
/// back.
///
/// # Example
///
/// ```
/// use rad_plan_world::Grid3;
///
/// let mut grid = Grid3::new([4, 4, 4], [2.0, 2.0, 2.0], [0.0, 0.0, 0.0], 0.0f32).unwrap();
/// grid.set(1, 2, 3, 1.5).unwrap();
/// assert_eq!(grid.get(1, 2, 3).unwrap(), 1.5);
/// assert_eq!(grid.voxel_volume_mm3(), 8.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid3<T> {
    dims: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    direction: [[f64; 3]; 3],
    data: Vec<T>,
}

const IDENTITY_DIRECTION: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn validate_geometry(dims: &[usize; 3], spacing: &[f64; 3]) -> GridResult<()> {
    if dims.iter().any(|&d| d == 0) {
        return Err(GridError::InvalidDimensions(dims[0], dims[1], dims[2]));
    }
    if spacing.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
        return Err(GridError::InvalidSpacing(spacing[0], spacing[1], spacing[2]));
    }
    Ok(())
}

impl<T: Clone> Grid3<T> {
    /// Creates a grid with every voxel set to `fill`.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidDimensions` if any dimension is zero and
    /// `GridError::InvalidSpacing` if any spacing is not strictly positive
    /// and finite.
    pub fn new(
        dims: [usize; 3],
        spacing: [f64; 3],
        origin: [f64; 3],
        fill: T,
    ) -> GridResult<Self> {
        validate_geometry(&dims, &spacing)?;
        let n = dims[0] * dims[1] * dims[2];
        Ok(Self {
            dims,
            spacing,
            origin,
            direction: IDENTITY_DIRECTION,
            data: vec![fill; n],
        })
    }

    /// Creates a grid from an existing buffer in `x + nx * (y + ny * z)` order.
    ///
    /// # Errors
    ///
    /// Returns `GridError::DataLengthMismatch` if the buffer length does not
    /// equal `nx * ny * nz`, next to the geometry errors of [`Grid3::new`].
    pub fn from_vec(
        dims: [usize; 3],
        spacing: [f64; 3],
        origin: [f64; 3],
        data: Vec<T>,
    ) -> GridResult<Self> {
        validate_geometry(&dims, &spacing)?;
        let n = dims[0] * dims[1] * dims[2];
        if data.len() != n {
            return Err(GridError::DataLengthMismatch(data.len(), n));
        }
        Ok(Self {
            dims,
            spacing,
            origin,
            direction: IDENTITY_DIRECTION,
            data,
        })
    }

    /// Replaces the direction cosines.
    ///
    /// The rows of `direction` are the patient-space axes of the voxel grid.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidDirection` if the rows do not form an
    /// orthonormal basis.
    pub fn with_direction(mut self, direction: [[f64; 3]; 3]) -> GridResult<Self> {
        let m = Matrix3::from_fn(|r, c| direction[r][c]);
        let delta = m * m.transpose() - Matrix3::identity();
        if delta.iter().any(|v| v.abs() > 1e-6) {
            return Err(GridError::InvalidDirection);
        }
        self.direction = direction;
        Ok(self)
    }

    /// Creates a grid with the same geometry as `self` but a different value
    /// type, filled with `fill`.
    pub fn like<U: Clone>(&self, fill: U) -> Grid3<U> {
        Grid3 {
            dims: self.dims,
            spacing: self.spacing,
            origin: self.origin,
            direction: self.direction,
            data: vec![fill; self.data.len()],
        }
    }
}

impl<T> Grid3<T> {
    pub fn dims(&self) -> &[usize; 3] {
        &self.dims
    }

    pub fn spacing(&self) -> &[f64; 3] {
        &self.spacing
    }

    pub fn origin(&self) -> &[f64; 3] {
        &self.origin
    }

    pub fn direction(&self) -> &[[f64; 3]; 3] {
        &self.direction
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Volume of a single voxel in mm³.
    pub fn voxel_volume_mm3(&self) -> f64 {
        self.spacing[0] * self.spacing[1] * self.spacing[2]
    }

    /// Physical extent of the grid along each axis in mm, measured between
    /// the outer faces of the first and last voxel.
    pub fn extent_mm(&self) -> [f64; 3] {
        [
            self.dims[0] as f64 * self.spacing[0],
            self.dims[1] as f64 * self.spacing[1],
            self.dims[2] as f64 * self.spacing[2],
        ]
    }

    /// Linear offset of voxel `(x, y, z)`: `x + nx * (y + ny * z)`.
    #[inline]
    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    fn checked_index(&self, x: usize, y: usize, z: usize) -> GridResult<usize> {
        let idx = [x, y, z];
        for axis in 0..3 {
            if idx[axis] >= self.dims[axis] {
                return Err(GridError::IndexOutOfBounds(axis, idx[axis], self.dims[axis]));
            }
        }
        Ok(self.linear_index(x, y, z))
    }

    pub fn get_ref(&self, x: usize, y: usize, z: usize) -> GridResult<&T> {
        let i = self.checked_index(x, y, z)?;
        Ok(&self.data[i])
    }

    pub fn get_mut(&mut self, x: usize, y: usize, z: usize) -> GridResult<&mut T> {
        let i = self.checked_index(x, y, z)?;
        Ok(&mut self.data[i])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) -> GridResult<()> {
        let i = self.checked_index(x, y, z)?;
        self.data[i] = value;
        Ok(())
    }

    /// Read-only view of the underlying buffer.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the underlying buffer.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Patient coordinates (mm) of the center of voxel `(x, y, z)`.
    pub fn voxel_center(&self, x: usize, y: usize, z: usize) -> Vector3<f64> {
        let local = Vector3::new(
            x as f64 * self.spacing[0],
            y as f64 * self.spacing[1],
            z as f64 * self.spacing[2],
        );
        let d = &self.direction;
        Vector3::new(
            self.origin[0] + d[0][0] * local.x + d[1][0] * local.y + d[2][0] * local.z,
            self.origin[1] + d[0][1] * local.x + d[1][1] * local.y + d[2][1] * local.z,
            self.origin[2] + d[0][2] * local.x + d[1][2] * local.y + d[2][2] * local.z,
        )
    }

    /// Index of the voxel whose center is nearest to the patient-space point
    /// `p`, or `None` if the point falls outside the grid.
    pub fn position_to_index(&self, p: &Vector3<f64>) -> Option<[usize; 3]> {
        let shifted = Vector3::new(
            p.x - self.origin[0],
            p.y - self.origin[1],
            p.z - self.origin[2],
        );
        let d = &self.direction;
        // The basis is orthonormal, so the inverse is the transpose.
        let local = Vector3::new(
            d[0][0] * shifted.x + d[0][1] * shifted.y + d[0][2] * shifted.z,
            d[1][0] * shifted.x + d[1][1] * shifted.y + d[1][2] * shifted.z,
            d[2][0] * shifted.x + d[2][1] * shifted.y + d[2][2] * shifted.z,
        );
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let v = (local[axis] / self.spacing[axis]).round();
            if v < 0.0 || v >= self.dims[axis] as f64 {
                return None;
            }
            idx[axis] = v as usize;
        }
        Some(idx)
    }

    /// True when `other` shares this grid's dimensions, spacing and origin
    /// within a small tolerance.
    pub fn same_geometry<U>(&self, other: &Grid3<U>) -> bool {
        const EPS: f64 = 1e-6;
        self.dims == other.dims
            && self
                .spacing
                .iter()
                .zip(other.spacing.iter())
                .all(|(a, b)| (a - b).abs() < EPS)
            && self
                .origin
                .iter()
                .zip(other.origin.iter())
                .all(|(a, b)| (a - b).abs() < EPS)
    }
}

impl<T: Copy> Grid3<T> {
    pub fn get(&self, x: usize, y: usize, z: usize) -> GridResult<T> {
        let i = self.checked_index(x, y, z)?;
        Ok(self.data[i])
    }
}

impl<T> Index<&[usize; 3]> for Grid3<T> {
    type Output = T;

    fn index(&self, index: &[usize; 3]) -> &Self::Output {
        match self.get_ref(index[0], index[1], index[2]) {
            Ok(value) => value,
            Err(e) => panic!("Error reading Grid3 index {index:?}: {e}"),
        }
    }
}

impl<T> IndexMut<&[usize; 3]> for Grid3<T> {
    fn index_mut(&mut self, index: &[usize; 3]) -> &mut Self::Output {
        match self.get_mut(index[0], index[1], index[2]) {
            Ok(value) => value,
            Err(e) => panic!("Error writing Grid3 index {index:?}: {e}"),
        }
    }
}
