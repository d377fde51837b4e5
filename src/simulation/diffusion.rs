use super::boundary::{face_u_position, face_v_position, face_w_position};
use crate::fdm::{FdmIccgSolver, FdmLinearSystem, FdmLinearSystemSolver, FdmMatrixRow, SolverStatus};
use crate::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, GridSpec, ScalarGrid};
use crate::levelset::is_inside_sdf;
use crate::math::{Point3, Size3};
use log::trace;

/// How the solid interface acts on the diffused quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryType {
    /// Quantity is zero inside the solid.
    Dirichlet,
    /// Zero normal derivative across the interface.
    Neumann,
}

fn fluid_markers<F>(size: Size3, boundary_sdf: Option<&F>, pos: impl Fn(usize, usize, usize) -> Point3) -> Array3<bool>
where
    F: Fn(Point3) -> f64,
{
    let mut markers = Array3::new(size, true);
    if let Some(sdf) = boundary_sdf {
        crate::parallel::for_each_index3(size, |i, j, k| {
            markers[(i, j, k)] = !is_inside_sdf(sdf(pos(i, j, k)));
        });
    }
    markers
}

/// Explicit diffusion: `out = in + dt * mu * laplacian(in)`. Stable only for
/// `dt * mu <= h^2 / (2 * dim)`; callers sub-step or switch to the implicit
/// solver beyond that.
#[derive(Default)]
pub struct ForwardEulerDiffusionSolver;

impl ForwardEulerDiffusionSolver {
    pub fn new() -> Self {
        ForwardEulerDiffusionSolver
    }

    fn diffuse_component(
        input: &Array3<f64>,
        markers: &Array3<bool>,
        spacing: (f64, f64, f64),
        diffusion_coefficient: f64,
        dt: f64,
        output: &mut Array3<f64>,
    ) {
        let size = input.size();
        output.resize(size, 0.0);
        output.par_fill_with(|i, j, k| {
            let center = input[(i, j, k)];
            if !markers[(i, j, k)] {
                return center;
            }
            // Neumann at the solid and the domain edge: missing neighbors
            // mirror the center value
            let neighbor = |idx: Option<(usize, usize, usize)>| -> f64 {
                match idx {
                    Some(idx) if markers[idx] => input[idx],
                    _ => center,
                }
            };
            let laplacian = (neighbor((i > 0).then(|| (i - 1, j, k)))
                + neighbor((i + 1 < size.x).then(|| (i + 1, j, k)))
                - 2.0 * center)
                / (spacing.0 * spacing.0)
                + (neighbor((j > 0).then(|| (i, j - 1, k)))
                    + neighbor((j + 1 < size.y).then(|| (i, j + 1, k)))
                    - 2.0 * center)
                    / (spacing.1 * spacing.1)
                + (neighbor((k > 0).then(|| (i, j, k - 1)))
                    + neighbor((k + 1 < size.z).then(|| (i, j, k + 1)))
                    - 2.0 * center)
                    / (spacing.2 * spacing.2);
            center + dt * diffusion_coefficient * laplacian
        });
    }

    pub fn solve_scalar(
        &self,
        input: &CellCenteredScalarGrid,
        diffusion_coefficient: f64,
        dt: f64,
        output: &mut CellCenteredScalarGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
    ) {
        let spec = input.spec().clone();
        let h = spec.spacing();
        let sampler = boundary_sdf.map(|s| move |p: Point3| s.sample(p));
        let markers = fluid_markers(input.data_size(), sampler.as_ref(), |i, j, k| {
            spec.cell_center_position(i, j, k)
        });
        output.resize(spec.clone());
        Self::diffuse_component(
            input.data(),
            &markers,
            (h.x, h.y, h.z),
            diffusion_coefficient,
            dt,
            output.data_mut(),
        );
    }
}

/// Implicit diffusion: solves `(I - dt * mu * laplacian) out = in` through
/// the structured linear-system core, unconditionally stable.
pub struct BackwardEulerDiffusionSolver {
    boundary_type: BoundaryType,
    system: FdmLinearSystem,
    solver: FdmIccgSolver,
}

impl BackwardEulerDiffusionSolver {
    pub fn new(boundary_type: BoundaryType) -> Self {
        BackwardEulerDiffusionSolver {
            boundary_type,
            system: FdmLinearSystem::default(),
            solver: FdmIccgSolver::new(100, 1e-9),
        }
    }

    fn build_and_solve(
        &mut self,
        input: &Array3<f64>,
        markers: &Array3<bool>,
        c: (f64, f64, f64),
    ) -> SolverStatus {
        let size = input.size();
        self.system.resize(size);

        let boundary_type = self.boundary_type;
        let a = &mut self.system.a;
        let b = &mut self.system.b;
        let x = &mut self.system.x;
        crate::parallel::for_each_index3(size, |i, j, k| {
            let mut row = FdmMatrixRow {
                center: 1.0,
                ..Default::default()
            };
            b[(i, j, k)] = input[(i, j, k)];
            x[(i, j, k)] = input[(i, j, k)];

            if markers[(i, j, k)] {
                let mut couple = |neighbor: Option<(usize, usize, usize)>, coeff: f64, off: Option<&mut f64>| {
                    if let Some(idx) = neighbor {
                        let neighbor_fluid = markers[idx];
                        match boundary_type {
                            BoundaryType::Neumann => {
                                if neighbor_fluid {
                                    row.center += coeff;
                                    if let Some(slot) = off {
                                        *slot -= coeff;
                                    }
                                }
                            }
                            BoundaryType::Dirichlet => {
                                row.center += coeff;
                                if neighbor_fluid {
                                    if let Some(slot) = off {
                                        *slot -= coeff;
                                    }
                                }
                            }
                        }
                    }
                };

                let mut right = 0.0;
                let mut up = 0.0;
                let mut front = 0.0;
                couple((i + 1 < size.x).then(|| (i + 1, j, k)), c.0, Some(&mut right));
                couple((i > 0).then(|| (i - 1, j, k)), c.0, None);
                couple((j + 1 < size.y).then(|| (i, j + 1, k)), c.1, Some(&mut up));
                couple((j > 0).then(|| (i, j - 1, k)), c.1, None);
                couple((k + 1 < size.z).then(|| (i, j, k + 1)), c.2, Some(&mut front));
                couple((k > 0).then(|| (i, j, k - 1)), c.2, None);
                row.right = right;
                row.up = up;
                row.front = front;
            }
            a[(i, j, k)] = row;
        });

        let status = self.solver.solve(&mut self.system);
        trace!(
            "backward Euler diffusion: {} iterations, residual {:.3e}",
            status.iterations,
            status.last_residual
        );
        status
    }

    pub fn solve_scalar(
        &mut self,
        input: &CellCenteredScalarGrid,
        diffusion_coefficient: f64,
        dt: f64,
        output: &mut CellCenteredScalarGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
    ) -> SolverStatus {
        let spec = input.spec().clone();
        let h = spec.spacing();
        let c = (
            dt * diffusion_coefficient / (h.x * h.x),
            dt * diffusion_coefficient / (h.y * h.y),
            dt * diffusion_coefficient / (h.z * h.z),
        );
        let sampler = boundary_sdf.map(|s| move |p: Point3| s.sample(p));
        let markers = fluid_markers(input.data_size(), sampler.as_ref(), |i, j, k| {
            spec.cell_center_position(i, j, k)
        });

        let status = self.build_and_solve(input.data(), &markers, c);
        output.resize(spec);
        output.data_mut().data_mut().copy_from_slice(self.system.x.data());
        status
    }

    /// Viscosity: each face component diffuses independently with markers
    /// taken at its own face positions.
    pub fn solve_face_centered(
        &mut self,
        input: &FaceCenteredGrid,
        diffusion_coefficient: f64,
        dt: f64,
        output: &mut FaceCenteredGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
    ) -> SolverStatus {
        let spec: GridSpec = input.spec().clone();
        let h = spec.spacing();
        let c = (
            dt * diffusion_coefficient / (h.x * h.x),
            dt * diffusion_coefficient / (h.y * h.y),
            dt * diffusion_coefficient / (h.z * h.z),
        );
        output.resize(spec.clone());
        let sampler = boundary_sdf.map(|s| move |p: Point3| s.sample(p));

        let mut worst = SolverStatus {
            converged: true,
            iterations: 0,
            last_residual: 0.0,
        };
        let mut merge = |status: SolverStatus, worst: &mut SolverStatus| {
            worst.converged &= status.converged;
            worst.iterations = worst.iterations.max(status.iterations);
            worst.last_residual = worst.last_residual.max(status.last_residual);
        };

        let u_markers = fluid_markers(input.u().size(), sampler.as_ref(), |i, j, k| {
            face_u_position(&spec, i, j, k)
        });
        let status = self.build_and_solve(input.u(), &u_markers, c);
        output.u_mut().data_mut().copy_from_slice(self.system.x.data());
        merge(status, &mut worst);

        let v_markers = fluid_markers(input.v().size(), sampler.as_ref(), |i, j, k| {
            face_v_position(&spec, i, j, k)
        });
        let status = self.build_and_solve(input.v(), &v_markers, c);
        output.v_mut().data_mut().copy_from_slice(self.system.x.data());
        merge(status, &mut worst);

        let w_markers = fluid_markers(input.w().size(), sampler.as_ref(), |i, j, k| {
            face_w_position(&spec, i, j, k)
        });
        let status = self.build_and_solve(input.w(), &w_markers, c);
        output.w_mut().data_mut().copy_from_slice(self.system.x.data());
        merge(status, &mut worst);

        worst
    }
}
