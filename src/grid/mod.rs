mod array3;
mod face_centered_grid;
mod scalar_grid;

pub use array3::Array3;
pub use face_centered_grid::FaceCenteredGrid;
pub use scalar_grid::{CellCenteredScalarGrid, ScalarGrid, VertexCenteredScalarGrid};

use crate::error::{Result, SimulationError};
use crate::math::{Aabb3, Point3, Size3, Vec3};

// Serialization kind tags. A face-centered grid is three scalar blocks.
pub(crate) const GRID_KIND_CELL_CENTERED: u8 = 0;
pub(crate) const GRID_KIND_VERTEX_CENTERED: u8 = 1;
pub(crate) const GRID_KIND_FACE_U: u8 = 2;
pub(crate) const GRID_KIND_FACE_V: u8 = 3;
pub(crate) const GRID_KIND_FACE_W: u8 = 4;

/// Resolution, spacing and origin shared by all grid kinds. The bounding box
/// is `[origin, origin + resolution * spacing]`.
#[derive(Clone, Debug, PartialEq)]
pub struct GridSpec {
    resolution: Size3,
    spacing: Vec3,
    origin: Point3,
}

impl GridSpec {
    pub fn new(resolution: Size3, spacing: Vec3, origin: Point3) -> Result<Self> {
        if spacing.x <= 0.0 || spacing.y <= 0.0 || spacing.z <= 0.0 {
            return Err(SimulationError::invalid_config(format!(
                "grid spacing must be strictly positive, got ({}, {}, {})",
                spacing.x, spacing.y, spacing.z
            )));
        }
        if resolution.x == 0 || resolution.y == 0 || resolution.z == 0 {
            return Err(SimulationError::invalid_config(format!(
                "grid resolution must be non-zero, got ({}, {}, {})",
                resolution.x, resolution.y, resolution.z
            )));
        }
        Ok(GridSpec {
            resolution,
            spacing,
            origin,
        })
    }

    /// Uniform spacing, origin at zero.
    pub fn with_uniform_spacing(resolution: Size3, h: f64) -> Result<Self> {
        GridSpec::new(
            resolution,
            Vec3::new(h, h, h),
            cgmath::point3(0.0, 0.0, 0.0),
        )
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn origin(&self) -> Point3 {
        self.origin
    }

    pub fn bounding_box(&self) -> Aabb3 {
        Aabb3::new(
            self.origin,
            cgmath::point3(
                self.origin.x + self.resolution.x as f64 * self.spacing.x,
                self.origin.y + self.resolution.y as f64 * self.spacing.y,
                self.origin.z + self.resolution.z as f64 * self.spacing.z,
            ),
        )
    }

    pub fn cell_center_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        cgmath::point3(
            self.origin.x + (i as f64 + 0.5) * self.spacing.x,
            self.origin.y + (j as f64 + 0.5) * self.spacing.y,
            self.origin.z + (k as f64 + 0.5) * self.spacing.z,
        )
    }

    pub fn vertex_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        cgmath::point3(
            self.origin.x + i as f64 * self.spacing.x,
            self.origin.y + j as f64 * self.spacing.y,
            self.origin.z + k as f64 * self.spacing.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::size3;

    #[test]
    fn rejects_bad_spacing() {
        assert!(GridSpec::new(
            size3(4, 4, 4),
            Vec3::new(1.0, 0.0, 1.0),
            cgmath::point3(0.0, 0.0, 0.0)
        )
        .is_err());
    }

    #[test]
    fn bounding_box_spans_resolution_times_spacing() {
        let spec = GridSpec::new(
            size3(4, 2, 8),
            Vec3::new(0.5, 1.0, 0.25),
            cgmath::point3(-1.0, 0.0, 1.0),
        )
        .unwrap();
        let bbox = spec.bounding_box();
        assert_eq!(bbox.lower_corner, cgmath::point3(-1.0, 0.0, 1.0));
        assert_eq!(bbox.upper_corner, cgmath::point3(1.0, 2.0, 3.0));
    }

    #[test]
    fn sample_positions() {
        let spec = GridSpec::with_uniform_spacing(size3(4, 4, 4), 0.5).unwrap();
        assert_eq!(spec.cell_center_position(0, 0, 0), cgmath::point3(0.25, 0.25, 0.25));
        assert_eq!(spec.vertex_position(1, 2, 3), cgmath::point3(0.5, 1.0, 1.5));
    }
}
