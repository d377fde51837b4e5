use crate::grid::{CellCenteredScalarGrid, ScalarGrid};
use crate::levelset::FmmLevelSetSolver;
use crate::math::{Point3, Vec3};
use crate::particles::PointNeighborSearcher;
use cgmath::{EuclideanSpace, InnerSpace, MetricSpace};

/// Union-of-spheres surface: the SDF is the distance to the nearest
/// particle minus the blob radius, clamped to a narrow band and then
/// reinitialized so the band carries true distances.
pub struct SphericalPointsToImplicit {
    pub radius: f64,
}

impl SphericalPointsToImplicit {
    pub fn new(radius: f64) -> Self {
        SphericalPointsToImplicit { radius }
    }

    pub fn convert(
        &self,
        searcher: &dyn PointNeighborSearcher,
        output: &mut CellCenteredScalarGrid,
    ) {
        let band = 2.0 * self.radius;
        let spec = output.spec().clone();
        let radius = self.radius;

        output.par_fill_with(|i, j, k| {
            let pt = spec.cell_center_position(i, j, k);
            let mut min_dist = band;
            searcher.for_each_nearby_point(pt, band, &mut |_, x| {
                min_dist = min_dist.min(pt.distance(x));
            });
            min_dist - radius
        });

        let raw = output.clone();
        FmmLevelSetSolver::new().reinitialize(&raw, 4.0 * band, output);
    }
}

/// Zhu-Bridson blobby surface: distance to the kernel-weighted average of
/// nearby particle positions, which smooths the union-of-spheres bumps.
pub struct ZhuBridsonPointsToImplicit {
    pub kernel_radius: f64,
    pub cut_off_threshold: f64,
}

impl ZhuBridsonPointsToImplicit {
    pub fn new(kernel_radius: f64) -> Self {
        ZhuBridsonPointsToImplicit {
            kernel_radius,
            cut_off_threshold: 0.25,
        }
    }

    pub fn convert(
        &self,
        searcher: &dyn PointNeighborSearcher,
        output: &mut CellCenteredScalarGrid,
    ) {
        let spec = output.spec().clone();
        let r = self.kernel_radius;
        let h = spec.spacing();
        let band = r.max(h.x.max(h.y).max(h.z));

        output.par_fill_with(|i, j, k| {
            let pt = spec.cell_center_position(i, j, k);
            let mut w_sum = 0.0;
            let mut x_avg = Vec3::new(0.0, 0.0, 0.0);
            searcher.for_each_nearby_point(pt, r, &mut |_, x| {
                let w = kernel(pt.distance(x) / r);
                w_sum += w;
                x_avg += w * x.to_vec();
            });

            if w_sum > 0.0 {
                x_avg /= w_sum;
                (pt.to_vec() - x_avg).magnitude() - self.cut_off_threshold * r
            } else {
                band
            }
        });

        let raw = output.clone();
        FmmLevelSetSolver::new().reinitialize(&raw, 4.0 * band, output);
    }
}

/// `k(s) = max(0, (1 - s^2))^3`
fn kernel(s: f64) -> f64 {
    (1.0 - s * s).max(0.0).powi(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use crate::math::size3;
    use crate::particles::{NeighborSearcherKind, PointNeighborSearcher};

    fn spec(n: usize) -> GridSpec {
        GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
    }

    #[test]
    fn single_particle_becomes_a_sphere() {
        let n = 32;
        let radius = 0.1;
        let mut searcher = NeighborSearcherKind::List.create();
        let center = cgmath::point3(0.5, 0.5, 0.5);
        searcher.build(&[center], 2.0 * radius);

        let mut sdf = CellCenteredScalarGrid::new(spec(n));
        SphericalPointsToImplicit::new(radius).convert(searcher.as_ref(), &mut sdf);

        assert!(sdf.sample(center) < 0.0);
        assert!(sdf.sample(cgmath::point3(0.5, 0.5 + radius + 0.1, 0.5)) > 0.0);
        // zero crossing within a cell of the blob radius
        let near_surface = sdf.sample(cgmath::point3(0.5 + radius, 0.5, 0.5));
        assert!(near_surface.abs() < 2.0 / n as f64);
    }

    #[test]
    fn zhu_bridson_wraps_a_particle_cluster() {
        let n = 32;
        let mut positions = Vec::new();
        for i in 0..4 {
            positions.push(cgmath::point3(0.4 + 0.05 * i as f64, 0.5, 0.5));
        }
        let mut searcher = NeighborSearcherKind::List.create();
        searcher.build(&positions, 0.15);

        let mut sdf = CellCenteredScalarGrid::new(spec(n));
        ZhuBridsonPointsToImplicit::new(0.15).convert(searcher.as_ref(), &mut sdf);

        // inside the cluster
        assert!(sdf.sample(cgmath::point3(0.48, 0.5, 0.5)) < 0.0);
        // far away
        assert!(sdf.sample(cgmath::point3(0.9, 0.9, 0.9)) > 0.0);
    }
}
