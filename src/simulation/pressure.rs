use crate::fdm::{FdmIccgSolver, FdmLinearSystem, FdmLinearSystemSolver, FdmMatrixRow, SolverStatus};
use crate::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, ScalarGrid};
use crate::levelset::is_inside_sdf;
use crate::math::Size3;
use log::{trace, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) enum CellMarker {
    #[default]
    Fluid,
    Air,
    Boundary,
}

/// Full-cell single-phase pressure projection: cells are classified as
/// fluid, air or solid at their centers and a 7-point Poisson system is
/// assembled over the fluid cells. The input velocity is expected to be
/// constrained against the collider already, so its divergence carries the
/// solid-velocity flux.
pub struct SinglePhasePressureSolver {
    markers: Array3<CellMarker>,
    system: FdmLinearSystem,
    solver: FdmIccgSolver,
    last_status: SolverStatus,
}

const DEFAULT_TOLERANCE: f64 = 1e-6;

impl SinglePhasePressureSolver {
    pub fn new() -> Self {
        SinglePhasePressureSolver {
            markers: Array3::default(),
            system: FdmLinearSystem::default(),
            solver: FdmIccgSolver::new(100, DEFAULT_TOLERANCE),
            last_status: SolverStatus::default(),
        }
    }

    pub fn pressure(&self) -> &Array3<f64> {
        &self.system.x
    }

    pub fn last_status(&self) -> SolverStatus {
        self.last_status
    }

    fn build_markers(
        &mut self,
        size: Size3,
        input: &FaceCenteredGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
        fluid_sdf: Option<&CellCenteredScalarGrid>,
    ) {
        self.markers.resize(size, CellMarker::Fluid);
        let spec = input.spec().clone();
        let markers = &mut self.markers;
        crate::parallel::for_each_index3(size, |i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let marker = if boundary_sdf
                .map(|sdf| is_inside_sdf(sdf.sample(p)))
                .unwrap_or(false)
            {
                CellMarker::Boundary
            } else if fluid_sdf
                .map(|sdf| !is_inside_sdf(sdf.sample(p)))
                .unwrap_or(false)
            {
                CellMarker::Air
            } else {
                CellMarker::Fluid
            };
            markers[(i, j, k)] = marker;
        });
    }

    fn build_system(&mut self, input: &FaceCenteredGrid) {
        let size = input.resolution();
        self.system.resize(size);
        let h = input.spec().spacing();
        let inv_h_sqr = (1.0 / (h.x * h.x), 1.0 / (h.y * h.y), 1.0 / (h.z * h.z));

        let markers = &self.markers;
        let a = &mut self.system.a;
        let b = &mut self.system.b;
        crate::parallel::for_each_index3(size, |i, j, k| {
            let mut row = FdmMatrixRow::default();
            let mut rhs = 0.0;

            if markers[(i, j, k)] == CellMarker::Fluid {
                rhs = input.divergence_at_cell_center(i, j, k);

                let mut couple =
                    |neighbor: Option<(usize, usize, usize)>, coeff: f64, off: Option<&mut f64>| {
                        if let Some(idx) = neighbor {
                            match markers[idx] {
                                CellMarker::Boundary => {}
                                CellMarker::Fluid => {
                                    row.center += coeff;
                                    if let Some(slot) = off {
                                        *slot -= coeff;
                                    }
                                }
                                CellMarker::Air => {
                                    row.center += coeff;
                                }
                            }
                        }
                    };

                let mut right = 0.0;
                let mut up = 0.0;
                let mut front = 0.0;
                couple((i + 1 < size.x).then(|| (i + 1, j, k)), inv_h_sqr.0, Some(&mut right));
                couple((i > 0).then(|| (i - 1, j, k)), inv_h_sqr.0, None);
                couple((j + 1 < size.y).then(|| (i, j + 1, k)), inv_h_sqr.1, Some(&mut up));
                couple((j > 0).then(|| (i, j - 1, k)), inv_h_sqr.1, None);
                couple((k + 1 < size.z).then(|| (i, j, k + 1)), inv_h_sqr.2, Some(&mut front));
                couple((k > 0).then(|| (i, j, k - 1)), inv_h_sqr.2, None);
                row.right = right;
                row.up = up;
                row.front = front;

                // an all-solid neighborhood leaves an empty row
                if row.center < f64::EPSILON {
                    row.center = 1.0;
                    rhs = 0.0;
                }
            } else {
                row.center = 1.0;
            }

            a[(i, j, k)] = row;
            b[(i, j, k)] = rhs;
        });
    }

    fn apply_pressure_gradient(&self, input: &FaceCenteredGrid, output: &mut FaceCenteredGrid) {
        let size = input.resolution();
        let h = input.spec().spacing();
        let inv_h = (1.0 / h.x, 1.0 / h.y, 1.0 / h.z);
        let x = &self.system.x;
        let markers = &self.markers;

        let open = |idx: (usize, usize, usize)| markers[idx] != CellMarker::Boundary;
        let fluid = |idx: (usize, usize, usize)| markers[idx] == CellMarker::Fluid;

        let u_new = {
            let mut out = input.u().clone();
            out.par_fill_with(|i, j, k| {
                if i > 0 && i < size.x {
                    let left = (i - 1, j, k);
                    let right = (i, j, k);
                    if open(left) && open(right) && (fluid(left) || fluid(right)) {
                        return input.u()[(i, j, k)] + inv_h.0 * (x[right] - x[left]);
                    }
                }
                input.u()[(i, j, k)]
            });
            out
        };
        let v_new = {
            let mut out = input.v().clone();
            out.par_fill_with(|i, j, k| {
                if j > 0 && j < size.y {
                    let down = (i, j - 1, k);
                    let up = (i, j, k);
                    if open(down) && open(up) && (fluid(down) || fluid(up)) {
                        return input.v()[(i, j, k)] + inv_h.1 * (x[up] - x[down]);
                    }
                }
                input.v()[(i, j, k)]
            });
            out
        };
        let w_new = {
            let mut out = input.w().clone();
            out.par_fill_with(|i, j, k| {
                if k > 0 && k < size.z {
                    let back = (i, j, k - 1);
                    let front = (i, j, k);
                    if open(back) && open(front) && (fluid(back) || fluid(front)) {
                        return input.w()[(i, j, k)] + inv_h.2 * (x[front] - x[back]);
                    }
                }
                input.w()[(i, j, k)]
            });
            out
        };

        output.resize(input.spec().clone());
        *output.u_mut() = u_new;
        *output.v_mut() = v_new;
        *output.w_mut() = w_new;
    }

    /// Computes the pressure that makes `output` divergence-free inside the
    /// fluid and applies its gradient to the faces. Pressure absorbs the
    /// `dt / rho` scale, matching the assembled right-hand side.
    pub fn solve(
        &mut self,
        input: &FaceCenteredGrid,
        output: &mut FaceCenteredGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
        fluid_sdf: Option<&CellCenteredScalarGrid>,
    ) -> SolverStatus {
        self.build_markers(input.resolution(), input, boundary_sdf, fluid_sdf);
        self.build_system(input);

        let status = self.solver.solve(&mut self.system);
        if !status.converged {
            warn!(
                "single-phase pressure solve hit the iteration cap ({} its, residual {:.3e})",
                status.iterations, status.last_residual
            );
        } else {
            trace!(
                "single-phase pressure: {} iterations, residual {:.3e}",
                status.iterations,
                status.last_residual
            );
        }
        self.last_status = status;

        self.apply_pressure_gradient(input, output);
        status
    }
}

impl Default for SinglePhasePressureSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use crate::math::{size3, Vec3};

    fn spec(n: usize) -> GridSpec {
        GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
    }

    fn max_divergence(v: &FaceCenteredGrid, solver: &SinglePhasePressureSolver) -> f64 {
        let size = v.resolution();
        let mut max_div: f64 = 0.0;
        for k in 0..size.z {
            for j in 0..size.y {
                for i in 0..size.x {
                    if solver.markers[(i, j, k)] == CellMarker::Fluid {
                        max_div = max_div.max(v.divergence_at_cell_center(i, j, k).abs());
                    }
                }
            }
        }
        max_div
    }

    #[test]
    fn projection_removes_divergence_in_a_closed_box() {
        let n = 16;
        let mut velocity = FaceCenteredGrid::new(spec(n));
        // divergent field, zero on the domain faces (no-slip walls)
        velocity.fill_with(|p| {
            Vec3::new(
                (std::f64::consts::PI * p.x).sin(),
                (std::f64::consts::PI * p.y).sin(),
                0.0,
            )
        });
        let res = velocity.resolution();
        for k in 0..res.z {
            for j in 0..res.y {
                velocity.u_mut()[(0, j, k)] = 0.0;
                velocity.u_mut()[(res.x, j, k)] = 0.0;
            }
        }
        for k in 0..res.z {
            for i in 0..res.x {
                velocity.v_mut()[(i, 0, k)] = 0.0;
                velocity.v_mut()[(i, res.y, k)] = 0.0;
            }
        }
        for j in 0..res.y {
            for i in 0..res.x {
                velocity.w_mut()[(i, j, 0)] = 0.0;
                velocity.w_mut()[(i, j, res.z)] = 0.0;
            }
        }

        let mut solver = SinglePhasePressureSolver::new();
        let mut projected = FaceCenteredGrid::new(spec(n));
        let status = solver.solve(&velocity, &mut projected, None, None);
        assert!(status.converged);
        assert!(
            max_divergence(&projected, &solver) < 1e-4,
            "residual divergence {}",
            max_divergence(&projected, &solver)
        );
    }

    #[test]
    fn projection_is_idempotent() {
        let n = 8;
        let mut velocity = FaceCenteredGrid::new(spec(n));
        velocity.fill_with(|p| Vec3::new(p.y, 0.0, 0.0)); // shear, divergence free

        let mut solver = SinglePhasePressureSolver::new();
        let mut once = FaceCenteredGrid::new(spec(n));
        solver.solve(&velocity, &mut once, None, None);
        let mut twice = FaceCenteredGrid::new(spec(n));
        solver.solve(&once, &mut twice, None, None);

        for (a, b) in once.u().data().iter().zip(twice.u().data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn hydrostatic_pressure_gradient_under_gravity() {
        // gravity applied to a half-filled pool for one step; after the
        // projection the bottom rows must not gain downward velocity
        let n = 16;
        let gs = spec(n);
        let dt = 1.0 / 60.0;
        let mut velocity = FaceCenteredGrid::new(gs.clone());
        // u* = dt * g everywhere in v
        let g = -9.8;
        let spec2 = gs.clone();
        velocity.v_mut().par_fill_with(|_, _, _| dt * g);
        // walls
        let res = velocity.resolution();
        for k in 0..res.z {
            for i in 0..res.x {
                velocity.v_mut()[(i, 0, k)] = 0.0;
                velocity.v_mut()[(i, res.y, k)] = 0.0;
            }
        }

        // fluid fills the lower half
        let mut fluid_sdf = CellCenteredScalarGrid::new(gs.clone());
        fluid_sdf.par_fill_with(|i, j, k| {
            let p = spec2.cell_center_position(i, j, k);
            let _ = (i, k);
            p.y - 0.5
        });

        let mut solver = SinglePhasePressureSolver::new();
        let mut projected = FaceCenteredGrid::new(gs);
        let status = solver.solve(&velocity, &mut projected, None, Some(&fluid_sdf));
        assert!(status.converged);

        // interior fluid cells end up with negligible vertical motion
        let v_mid = projected.v()[(n / 2, 2, n / 2)];
        assert!(v_mid.abs() < 0.2 * (dt * g).abs(), "v = {}", v_mid);

        // the solved unknown absorbs -dt/rho, so it grows linearly with
        // height at rate dt * |g| * h per cell; four cells apart:
        let x_low = solver.pressure()[(n / 2, 1, n / 2)];
        let x_high = solver.pressure()[(n / 2, 5, n / 2)];
        let expected_delta = dt * 9.8 * 4.0 / n as f64;
        let delta = x_high - x_low;
        assert!(
            (delta - expected_delta).abs() < 0.01 * expected_delta,
            "hydrostatic profile delta {} vs {}",
            delta,
            expected_delta
        );
    }
}
