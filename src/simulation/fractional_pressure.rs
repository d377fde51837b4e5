use crate::fdm::{
    multigrid, FdmCompressedLinearSystem, FdmIccgSolver, FdmLinearSystem, FdmLinearSystemSolver,
    FdmMatrixRow, FdmMgLinearSystem, FdmMgSolver, FdmVector, SolverStatus,
};
use crate::grid::{Array3, FaceCenteredGrid, GridSpec};
use crate::levelset::{fraction_inside, fraction_inside_sdf, is_inside_sdf};
use crate::math::{clamp, size3, Point3, Vec3};
use log::{trace, warn};

const DEFAULT_TOLERANCE: f64 = 1e-6;
const MIN_WEIGHT: f64 = 0.01;
const MIN_THETA: f64 = 0.01;

/// Linear solver driving the Poisson solve.
pub enum PressureSolverBackend {
    Iccg(FdmIccgSolver),
    Multigrid(FdmMgSolver),
}

impl Default for PressureSolverBackend {
    fn default() -> Self {
        PressureSolverBackend::Iccg(FdmIccgSolver::new(100, DEFAULT_TOLERANCE))
    }
}

/// Sub-cell accurate single-phase pressure projection. Solid boundaries
/// enter through face-area weights computed by linear-interface
/// reconstruction of the boundary SDF; the liquid-air interface enters
/// through ghost pressures with the fraction-inside parameter floored to
/// keep the system well conditioned.
pub struct FractionalSinglePhasePressureSolver {
    backend: PressureSolverBackend,
    use_compressed: bool,

    system: FdmLinearSystem,
    comp_system: FdmCompressedLinearSystem,
    mg_system: FdmMgLinearSystem,

    // level 0 is the finest; sub-levels only exist for the multigrid path
    fluid_sdf: Vec<FdmVector>,
    u_weights: Vec<Array3<f64>>,
    v_weights: Vec<Array3<f64>>,
    w_weights: Vec<Array3<f64>>,

    last_status: SolverStatus,
}

impl FractionalSinglePhasePressureSolver {
    pub fn new() -> Self {
        FractionalSinglePhasePressureSolver {
            backend: PressureSolverBackend::default(),
            use_compressed: false,
            system: FdmLinearSystem::default(),
            comp_system: FdmCompressedLinearSystem::default(),
            mg_system: FdmMgLinearSystem::default(),
            fluid_sdf: Vec::new(),
            u_weights: Vec::new(),
            v_weights: Vec::new(),
            w_weights: Vec::new(),
            last_status: SolverStatus::default(),
        }
    }

    pub fn with_backend(mut self, backend: PressureSolverBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Compacts the system to fluid-cell rows only (CSR); pays off when the
    /// fluid occupies a small part of the domain.
    pub fn with_compressed_system(mut self, use_compressed: bool) -> Self {
        self.use_compressed = use_compressed;
        self
    }

    pub fn last_status(&self) -> SolverStatus {
        self.last_status
    }

    pub fn pressure(&self) -> &FdmVector {
        &self.system.x
    }

    pub fn u_weights(&self) -> Option<&Array3<f64>> {
        self.u_weights.first()
    }

    pub fn v_weights(&self) -> Option<&Array3<f64>> {
        self.v_weights.first()
    }

    pub fn w_weights(&self) -> Option<&Array3<f64>> {
        self.w_weights.first()
    }

    /// Projects `input` onto a divergence-free field. `boundary_sdf` and
    /// `boundary_velocity` describe the collider; `fluid_sdf` the liquid
    /// surface (`None` floods the whole domain).
    pub fn solve<Bs, Bv, Fs>(
        &mut self,
        input: &FaceCenteredGrid,
        output: &mut FaceCenteredGrid,
        boundary_sdf: &Bs,
        boundary_velocity: &Bv,
        fluid_sdf: Option<&Fs>,
    ) -> SolverStatus
    where
        Bs: Fn(Point3) -> f64 + Sync,
        Bv: Fn(Point3) -> Vec3 + Sync,
        Fs: Fn(Point3) -> f64 + Sync,
    {
        self.build_weights(input, boundary_sdf, fluid_sdf);
        self.build_system(input, boundary_velocity);

        let mut backend = std::mem::take(&mut self.backend);
        let status = match &mut backend {
            PressureSolverBackend::Iccg(solver) => {
                if self.use_compressed {
                    self.system.clear();
                    let status = solver.solve_compressed(&mut self.comp_system);
                    self.decompress_solution();
                    status
                } else {
                    self.comp_system.clear();
                    solver.solve(&mut self.system)
                }
            }
            PressureSolverBackend::Multigrid(solver) => {
                let status = solver.solve(&mut self.mg_system);
                // mirror the finest level into the flat system for the
                // gradient application and callers reading the pressure
                self.system.resize(self.mg_system.x[0].size());
                self.system
                    .x
                    .data_mut()
                    .copy_from_slice(self.mg_system.x[0].data());
                status
            }
        };
        self.backend = backend;

        if !status.converged {
            warn!(
                "fractional pressure solve hit the iteration cap ({} its, residual {:.3e})",
                status.iterations, status.last_residual
            );
        } else {
            trace!(
                "fractional pressure: {} iterations, residual {:.3e}",
                status.iterations,
                status.last_residual
            );
        }
        self.last_status = status;

        self.apply_pressure_gradient(input, output);
        status
    }

    fn levels(&self) -> usize {
        match &self.backend {
            PressureSolverBackend::Iccg(_) => 1,
            PressureSolverBackend::Multigrid(solver) => solver.max_levels(),
        }
    }

    fn build_weights<Bs, Fs>(
        &mut self,
        input: &FaceCenteredGrid,
        boundary_sdf: &Bs,
        fluid_sdf: Option<&Fs>,
    ) where
        Bs: Fn(Point3) -> f64 + Sync,
        Fs: Fn(Point3) -> f64 + Sync,
    {
        let spec = input.spec().clone();
        let size = spec.resolution();
        let h = spec.spacing();

        let level_sizes = multigrid::level_sizes(size, self.levels());
        let num_levels = level_sizes.len();

        self.fluid_sdf = level_sizes.iter().map(|s| FdmVector::new(*s, 0.0)).collect();
        self.u_weights = level_sizes
            .iter()
            .map(|s| Array3::new(size3(s.x + 1, s.y, s.z), 0.0))
            .collect();
        self.v_weights = level_sizes
            .iter()
            .map(|s| Array3::new(size3(s.x, s.y + 1, s.z), 0.0))
            .collect();
        self.w_weights = level_sizes
            .iter()
            .map(|s| Array3::new(size3(s.x, s.y, s.z + 1), 0.0))
            .collect();

        // finest level
        self.fluid_sdf[0].par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            match fluid_sdf {
                Some(sdf) => sdf(p),
                None => -1.0,
            }
        });

        let weight_of = |frac: f64| {
            let mut weight = clamp(1.0 - frac, 0.0, 1.0);
            // nearly-zero matrix entries are trouble; snap small but
            // non-zero weights up to the floor
            if weight < MIN_WEIGHT && weight > 0.0 {
                weight = MIN_WEIGHT;
            }
            weight
        };

        let u_spec = spec.clone();
        self.u_weights[0].par_fill_with(|i, j, k| {
            let pt = face_u_position(&u_spec, i, j, k);
            let phi0 = boundary_sdf(pt + Vec3::new(0.0, -0.5 * h.y, -0.5 * h.z));
            let phi1 = boundary_sdf(pt + Vec3::new(0.0, 0.5 * h.y, -0.5 * h.z));
            let phi2 = boundary_sdf(pt + Vec3::new(0.0, -0.5 * h.y, 0.5 * h.z));
            let phi3 = boundary_sdf(pt + Vec3::new(0.0, 0.5 * h.y, 0.5 * h.z));
            weight_of(fraction_inside(phi0, phi1, phi2, phi3))
        });
        let v_spec = spec.clone();
        self.v_weights[0].par_fill_with(|i, j, k| {
            let pt = face_v_position(&v_spec, i, j, k);
            let phi0 = boundary_sdf(pt + Vec3::new(-0.5 * h.x, 0.0, -0.5 * h.z));
            let phi1 = boundary_sdf(pt + Vec3::new(-0.5 * h.x, 0.0, 0.5 * h.z));
            let phi2 = boundary_sdf(pt + Vec3::new(0.5 * h.x, 0.0, -0.5 * h.z));
            let phi3 = boundary_sdf(pt + Vec3::new(0.5 * h.x, 0.0, 0.5 * h.z));
            weight_of(fraction_inside(phi0, phi1, phi2, phi3))
        });
        let w_spec = spec.clone();
        self.w_weights[0].par_fill_with(|i, j, k| {
            let pt = face_w_position(&w_spec, i, j, k);
            let phi0 = boundary_sdf(pt + Vec3::new(-0.5 * h.x, -0.5 * h.y, 0.0));
            let phi1 = boundary_sdf(pt + Vec3::new(-0.5 * h.x, 0.5 * h.y, 0.0));
            let phi2 = boundary_sdf(pt + Vec3::new(0.5 * h.x, -0.5 * h.y, 0.0));
            let phi3 = boundary_sdf(pt + Vec3::new(0.5 * h.x, 0.5 * h.y, 0.0));
            weight_of(fraction_inside(phi0, phi1, phi2, phi3))
        });

        // sub-levels by restriction
        for level in 1..num_levels {
            let (finer, coarser) = self.fluid_sdf.split_at_mut(level);
            multigrid::restrict(&finer[level - 1], &mut coarser[0]);
            let (finer, coarser) = self.u_weights.split_at_mut(level);
            multigrid::restrict(&finer[level - 1], &mut coarser[0]);
            let (finer, coarser) = self.v_weights.split_at_mut(level);
            multigrid::restrict(&finer[level - 1], &mut coarser[0]);
            let (finer, coarser) = self.w_weights.split_at_mut(level);
            multigrid::restrict(&finer[level - 1], &mut coarser[0]);
        }
    }

    fn build_system<Bv>(&mut self, input: &FaceCenteredGrid, boundary_velocity: &Bv)
    where
        Bv: Fn(Point3) -> Vec3 + Sync,
    {
        let size = input.resolution();
        let num_levels = self.fluid_sdf.len();

        if num_levels == 1 {
            if self.use_compressed {
                build_compressed_system(
                    &mut self.comp_system,
                    &self.fluid_sdf[0],
                    &self.u_weights[0],
                    &self.v_weights[0],
                    &self.w_weights[0],
                    boundary_velocity,
                    input,
                );
            } else {
                self.system.resize(size);
                build_single_system(
                    &mut self.system.a,
                    &mut self.system.b,
                    &self.fluid_sdf[0],
                    &self.u_weights[0],
                    &self.v_weights[0],
                    &self.w_weights[0],
                    boundary_velocity,
                    input,
                );
            }
            return;
        }

        // multigrid path: assemble one system per level over down-sampled
        // velocities
        self.mg_system.resize_with_finest(size, num_levels);
        build_single_system(
            &mut self.mg_system.a[0],
            &mut self.mg_system.b[0],
            &self.fluid_sdf[0],
            &self.u_weights[0],
            &self.v_weights[0],
            &self.w_weights[0],
            boundary_velocity,
            input,
        );

        let mut finer = input.clone();
        for level in 1..num_levels {
            let res = finer.resolution();
            let h = finer.spec().spacing();
            let origin = finer.spec().origin();
            let coarse_spec = GridSpec::new(
                size3(res.x / 2, res.y / 2, res.z / 2),
                h * 2.0,
                origin,
            )
            .expect("halved grid spec stays valid");
            let mut coarser = FaceCenteredGrid::new(coarse_spec);
            let sampler = |p: Point3| finer.sample(p);
            coarser.fill_with(sampler);

            build_single_system(
                &mut self.mg_system.a[level],
                &mut self.mg_system.b[level],
                &self.fluid_sdf[level],
                &self.u_weights[level],
                &self.v_weights[level],
                &self.w_weights[level],
                boundary_velocity,
                &coarser,
            );
            finer = coarser;
        }
    }

    fn decompress_solution(&mut self) {
        let size = self.fluid_sdf[0].size();
        self.system.resize(size);
        let fluid_sdf = &self.fluid_sdf;
        let comp_x = &self.comp_system.x;
        let x = &mut self.system.x;
        let mut row = 0;
        crate::parallel::for_each_index3(size, |i, j, k| {
            if is_inside_sdf(fluid_sdf[0][(i, j, k)]) {
                x[(i, j, k)] = comp_x[row];
                row += 1;
            }
        });
    }

    fn apply_pressure_gradient(&self, input: &FaceCenteredGrid, output: &mut FaceCenteredGrid) {
        let size = input.resolution();
        let h = input.spec().spacing();
        let inv_h = (1.0 / h.x, 1.0 / h.y, 1.0 / h.z);

        let x = &self.system.x;
        let fluid_sdf = &self.fluid_sdf[0];
        let u_weights = &self.u_weights[0];
        let v_weights = &self.v_weights[0];
        let w_weights = &self.w_weights[0];

        output.resize(input.spec().clone());
        output.u_mut().data_mut().copy_from_slice(input.u().data());
        output.v_mut().data_mut().copy_from_slice(input.v().data());
        output.w_mut().data_mut().copy_from_slice(input.w().data());

        let u = output.u_mut();
        crate::parallel::for_each_index3(size, |i, j, k| {
            let center_phi = fluid_sdf[(i, j, k)];
            if i + 1 < size.x
                && u_weights[(i + 1, j, k)] > 0.0
                && (is_inside_sdf(center_phi) || is_inside_sdf(fluid_sdf[(i + 1, j, k)]))
            {
                let right_phi = fluid_sdf[(i + 1, j, k)];
                let theta = fraction_inside_sdf(center_phi, right_phi).max(MIN_THETA);
                u[(i + 1, j, k)] =
                    input.u()[(i + 1, j, k)] + inv_h.0 / theta * (x[(i + 1, j, k)] - x[(i, j, k)]);
            }
        });
        let v = output.v_mut();
        crate::parallel::for_each_index3(size, |i, j, k| {
            let center_phi = fluid_sdf[(i, j, k)];
            if j + 1 < size.y
                && v_weights[(i, j + 1, k)] > 0.0
                && (is_inside_sdf(center_phi) || is_inside_sdf(fluid_sdf[(i, j + 1, k)]))
            {
                let up_phi = fluid_sdf[(i, j + 1, k)];
                let theta = fraction_inside_sdf(center_phi, up_phi).max(MIN_THETA);
                v[(i, j + 1, k)] =
                    input.v()[(i, j + 1, k)] + inv_h.1 / theta * (x[(i, j + 1, k)] - x[(i, j, k)]);
            }
        });
        let w = output.w_mut();
        crate::parallel::for_each_index3(size, |i, j, k| {
            let center_phi = fluid_sdf[(i, j, k)];
            if k + 1 < size.z
                && w_weights[(i, j, k + 1)] > 0.0
                && (is_inside_sdf(center_phi) || is_inside_sdf(fluid_sdf[(i, j, k + 1)]))
            {
                let front_phi = fluid_sdf[(i, j, k + 1)];
                let theta = fraction_inside_sdf(center_phi, front_phi).max(MIN_THETA);
                w[(i, j, k + 1)] =
                    input.w()[(i, j, k + 1)] + inv_h.2 / theta * (x[(i, j, k + 1)] - x[(i, j, k)]);
            }
        });
    }
}

impl Default for FractionalSinglePhasePressureSolver {
    fn default() -> Self {
        Self::new()
    }
}

fn face_u_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    super::boundary::face_u_position(spec, i, j, k)
}

fn face_v_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    super::boundary::face_v_position(spec, i, j, k)
}

fn face_w_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    super::boundary::face_w_position(spec, i, j, k)
}

/// Assembles one level of the fractional Poisson system. Ghost pressure at
/// air samples is folded into the diagonal through `1 / theta`; the moving
/// boundary contributes `(1 - W) * (u_solid . n) / h` flux terms to the
/// right-hand side.
#[allow(clippy::too_many_arguments)]
fn build_single_system<Bv>(
    a: &mut Array3<FdmMatrixRow>,
    b: &mut FdmVector,
    fluid_sdf: &FdmVector,
    u_weights: &Array3<f64>,
    v_weights: &Array3<f64>,
    w_weights: &Array3<f64>,
    boundary_velocity: &Bv,
    input: &FaceCenteredGrid,
) where
    Bv: Fn(Point3) -> Vec3 + Sync,
{
    let size = input.resolution();
    let spec = input.spec().clone();
    let h = spec.spacing();
    let inv_h = (1.0 / h.x, 1.0 / h.y, 1.0 / h.z);
    let inv_h_sqr = (inv_h.0 * inv_h.0, inv_h.1 * inv_h.1, inv_h.2 * inv_h.2);

    crate::parallel::for_each_index3(size, |i, j, k| {
        let mut row = FdmMatrixRow::default();
        let mut rhs = 0.0;

        let center_phi = fluid_sdf[(i, j, k)];
        if is_inside_sdf(center_phi) {
            // +x
            if i + 1 < size.x {
                let term = u_weights[(i + 1, j, k)] * inv_h_sqr.0;
                let right_phi = fluid_sdf[(i + 1, j, k)];
                if is_inside_sdf(right_phi) {
                    row.center += term;
                    row.right -= term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, right_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs += u_weights[(i + 1, j, k)] * input.u()[(i + 1, j, k)] * inv_h.0;
            } else {
                rhs += input.u()[(i + 1, j, k)] * inv_h.0;
            }
            // -x
            if i > 0 {
                let term = u_weights[(i, j, k)] * inv_h_sqr.0;
                let left_phi = fluid_sdf[(i - 1, j, k)];
                if is_inside_sdf(left_phi) {
                    row.center += term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, left_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs -= u_weights[(i, j, k)] * input.u()[(i, j, k)] * inv_h.0;
            } else {
                rhs -= input.u()[(i, j, k)] * inv_h.0;
            }
            // +y
            if j + 1 < size.y {
                let term = v_weights[(i, j + 1, k)] * inv_h_sqr.1;
                let up_phi = fluid_sdf[(i, j + 1, k)];
                if is_inside_sdf(up_phi) {
                    row.center += term;
                    row.up -= term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, up_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs += v_weights[(i, j + 1, k)] * input.v()[(i, j + 1, k)] * inv_h.1;
            } else {
                rhs += input.v()[(i, j + 1, k)] * inv_h.1;
            }
            // -y
            if j > 0 {
                let term = v_weights[(i, j, k)] * inv_h_sqr.1;
                let down_phi = fluid_sdf[(i, j - 1, k)];
                if is_inside_sdf(down_phi) {
                    row.center += term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, down_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs -= v_weights[(i, j, k)] * input.v()[(i, j, k)] * inv_h.1;
            } else {
                rhs -= input.v()[(i, j, k)] * inv_h.1;
            }
            // +z
            if k + 1 < size.z {
                let term = w_weights[(i, j, k + 1)] * inv_h_sqr.2;
                let front_phi = fluid_sdf[(i, j, k + 1)];
                if is_inside_sdf(front_phi) {
                    row.center += term;
                    row.front -= term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, front_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs += w_weights[(i, j, k + 1)] * input.w()[(i, j, k + 1)] * inv_h.2;
            } else {
                rhs += input.w()[(i, j, k + 1)] * inv_h.2;
            }
            // -z
            if k > 0 {
                let term = w_weights[(i, j, k)] * inv_h_sqr.2;
                let back_phi = fluid_sdf[(i, j, k - 1)];
                if is_inside_sdf(back_phi) {
                    row.center += term;
                } else {
                    let theta = fraction_inside_sdf(center_phi, back_phi).max(MIN_THETA);
                    row.center += term / theta;
                }
                rhs -= w_weights[(i, j, k)] * input.w()[(i, j, k)] * inv_h.2;
            } else {
                rhs -= input.w()[(i, j, k)] * inv_h.2;
            }

            // moving-boundary flux through the solid part of each face
            rhs += boundary_flux(
                &spec,
                (i, j, k),
                u_weights,
                v_weights,
                w_weights,
                boundary_velocity,
                inv_h,
            );

            // a near-zero center means the cell is buried in the solid
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

fn boundary_flux<Bv>(
    spec: &GridSpec,
    (i, j, k): (usize, usize, usize),
    u_weights: &Array3<f64>,
    v_weights: &Array3<f64>,
    w_weights: &Array3<f64>,
    boundary_velocity: &Bv,
    inv_h: (f64, f64, f64),
) -> f64
where
    Bv: Fn(Point3) -> Vec3 + Sync,
{
    (1.0 - u_weights[(i + 1, j, k)]) * boundary_velocity(face_u_position(spec, i + 1, j, k)).x * inv_h.0
        - (1.0 - u_weights[(i, j, k)]) * boundary_velocity(face_u_position(spec, i, j, k)).x * inv_h.0
        + (1.0 - v_weights[(i, j + 1, k)]) * boundary_velocity(face_v_position(spec, i, j + 1, k)).y * inv_h.1
        - (1.0 - v_weights[(i, j, k)]) * boundary_velocity(face_v_position(spec, i, j, k)).y * inv_h.1
        + (1.0 - w_weights[(i, j, k + 1)]) * boundary_velocity(face_w_position(spec, i, j, k + 1)).z * inv_h.2
        - (1.0 - w_weights[(i, j, k)]) * boundary_velocity(face_w_position(spec, i, j, k)).z * inv_h.2
}

/// CSR variant over a compacted enumeration of fluid cells.
fn build_compressed_system<Bv>(
    system: &mut FdmCompressedLinearSystem,
    fluid_sdf: &FdmVector,
    u_weights: &Array3<f64>,
    v_weights: &Array3<f64>,
    w_weights: &Array3<f64>,
    boundary_velocity: &Bv,
    input: &FaceCenteredGrid,
) where
    Bv: Fn(Point3) -> Vec3 + Sync,
{
    let size = input.resolution();
    let spec = input.spec().clone();
    let h = spec.spacing();
    let inv_h = (1.0 / h.x, 1.0 / h.y, 1.0 / h.z);
    let inv_h_sqr = (inv_h.0 * inv_h.0, inv_h.1 * inv_h.1, inv_h.2 * inv_h.2);

    system.clear();

    let mut coord_to_index = Array3::new(size, usize::MAX);
    let mut num_rows = 0usize;
    crate::parallel::for_each_index3(size, |i, j, k| {
        if is_inside_sdf(fluid_sdf[(i, j, k)]) {
            coord_to_index[(i, j, k)] = num_rows;
            num_rows += 1;
        }
    });

    crate::parallel::for_each_index3(size, |i, j, k| {
        let center_phi = fluid_sdf[(i, j, k)];
        if !is_inside_sdf(center_phi) {
            return;
        }

        let mut rhs = 0.0;
        let mut values = vec![0.0];
        let mut cols = vec![coord_to_index[(i, j, k)]];

        let mut axis = |in_plus: bool,
                        in_range: bool,
                        weight_here: f64,
                        vel_here: f64,
                        neighbor_phi: f64,
                        neighbor_idx: usize,
                        inv_h_axis: f64,
                        inv_h_sqr_axis: f64,
                        values: &mut Vec<f64>,
                        cols: &mut Vec<usize>| {
            let signed_flux = weight_here * vel_here * inv_h_axis;
            if in_range {
                let term = weight_here * inv_h_sqr_axis;
                if is_inside_sdf(neighbor_phi) {
                    values[0] += term;
                    values.push(-term);
                    cols.push(neighbor_idx);
                } else {
                    let theta = fraction_inside_sdf(center_phi, neighbor_phi).max(MIN_THETA);
                    values[0] += term / theta;
                }
                rhs += if in_plus { signed_flux } else { -signed_flux };
            } else {
                let open_flux = vel_here * inv_h_axis;
                rhs += if in_plus { open_flux } else { -open_flux };
            }
        };

        axis(
            true,
            i + 1 < size.x,
            u_weights[(i + 1, j, k)],
            input.u()[(i + 1, j, k)],
            if i + 1 < size.x { fluid_sdf[(i + 1, j, k)] } else { 1.0 },
            if i + 1 < size.x { coord_to_index[(i + 1, j, k)] } else { 0 },
            inv_h.0,
            inv_h_sqr.0,
            &mut values,
            &mut cols,
        );
        axis(
            false,
            i > 0,
            u_weights[(i, j, k)],
            input.u()[(i, j, k)],
            if i > 0 { fluid_sdf[(i - 1, j, k)] } else { 1.0 },
            if i > 0 { coord_to_index[(i - 1, j, k)] } else { 0 },
            inv_h.0,
            inv_h_sqr.0,
            &mut values,
            &mut cols,
        );
        axis(
            true,
            j + 1 < size.y,
            v_weights[(i, j + 1, k)],
            input.v()[(i, j + 1, k)],
            if j + 1 < size.y { fluid_sdf[(i, j + 1, k)] } else { 1.0 },
            if j + 1 < size.y { coord_to_index[(i, j + 1, k)] } else { 0 },
            inv_h.1,
            inv_h_sqr.1,
            &mut values,
            &mut cols,
        );
        axis(
            false,
            j > 0,
            v_weights[(i, j, k)],
            input.v()[(i, j, k)],
            if j > 0 { fluid_sdf[(i, j - 1, k)] } else { 1.0 },
            if j > 0 { coord_to_index[(i, j - 1, k)] } else { 0 },
            inv_h.1,
            inv_h_sqr.1,
            &mut values,
            &mut cols,
        );
        axis(
            true,
            k + 1 < size.z,
            w_weights[(i, j, k + 1)],
            input.w()[(i, j, k + 1)],
            if k + 1 < size.z { fluid_sdf[(i, j, k + 1)] } else { 1.0 },
            if k + 1 < size.z { coord_to_index[(i, j, k + 1)] } else { 0 },
            inv_h.2,
            inv_h_sqr.2,
            &mut values,
            &mut cols,
        );
        axis(
            false,
            k > 0,
            w_weights[(i, j, k)],
            input.w()[(i, j, k)],
            if k > 0 { fluid_sdf[(i, j, k - 1)] } else { 1.0 },
            if k > 0 { coord_to_index[(i, j, k - 1)] } else { 0 },
            inv_h.2,
            inv_h_sqr.2,
            &mut values,
            &mut cols,
        );

        rhs += boundary_flux(
            &spec,
            (i, j, k),
            u_weights,
            v_weights,
            w_weights,
            boundary_velocity,
            inv_h,
        );

        if values[0] < f64::EPSILON {
            values[0] = 1.0;
            rhs = 0.0;
            values.truncate(1);
            cols.truncate(1);
        }

        system.a.add_row(&values, &cols);
        system.b.push(rhs);
    });

    system.x.resize(system.b.len(), 0.0);
    debug_assert_eq!(num_rows, system.b.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use crate::math::size3;

    fn spec(n: usize) -> GridSpec {
        GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
    }

    fn no_boundary(_: Point3) -> f64 {
        1e9
    }

    fn still(_: Point3) -> Vec3 {
        Vec3::new(0.0, 0.0, 0.0)
    }

    fn max_fluid_divergence(
        v: &FaceCenteredGrid,
        fluid_sdf: &dyn Fn(Point3) -> f64,
        margin: f64,
    ) -> f64 {
        let size = v.resolution();
        let spec = v.spec().clone();
        let mut max_div: f64 = 0.0;
        for k in 1..size.z - 1 {
            for j in 1..size.y - 1 {
                for i in 1..size.x - 1 {
                    let p = spec.cell_center_position(i, j, k);
                    if fluid_sdf(p) < -margin {
                        max_div = max_div.max(v.divergence_at_cell_center(i, j, k).abs());
                    }
                }
            }
        }
        max_div
    }

    fn wall_bounded_divergent_field(n: usize) -> FaceCenteredGrid {
        let mut velocity = FaceCenteredGrid::new(spec(n));
        velocity.fill_with(|p| {
            Vec3::new(
                (std::f64::consts::PI * p.x).sin(),
                (std::f64::consts::PI * p.y).sin(),
                0.0,
            )
        });
        velocity
    }

    #[test]
    fn open_domain_projection_removes_divergence() {
        let n = 16;
        let velocity = wall_bounded_divergent_field(n);
        let mut out = FaceCenteredGrid::new(spec(n));
        let mut solver = FractionalSinglePhasePressureSolver::new();
        let status = solver.solve(
            &velocity,
            &mut out,
            &no_boundary,
            &still,
            None::<&fn(Point3) -> f64>,
        );
        assert!(status.converged);
        let all_fluid = |_: Point3| -1.0;
        assert!(max_fluid_divergence(&out, &all_fluid, 0.0) < 1e-4);
    }

    #[test]
    fn compressed_and_structured_solutions_agree() {
        let n = 8;
        let velocity = wall_bounded_divergent_field(n);
        let fluid = |p: Point3| p.y - 0.6;

        let mut structured_out = FaceCenteredGrid::new(spec(n));
        let mut structured = FractionalSinglePhasePressureSolver::new();
        structured.solve(&velocity, &mut structured_out, &no_boundary, &still, Some(&fluid));

        let mut compressed_out = FaceCenteredGrid::new(spec(n));
        let mut compressed =
            FractionalSinglePhasePressureSolver::new().with_compressed_system(true);
        compressed.solve(&velocity, &mut compressed_out, &no_boundary, &still, Some(&fluid));

        for (a, b) in structured_out
            .v()
            .data()
            .iter()
            .zip(compressed_out.v().data())
        {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn solid_wall_blocks_flow_through_weights() {
        let n = 8;
        let mut velocity = FaceCenteredGrid::new(spec(n));
        velocity.fill(Vec3::new(1.0, 0.0, 0.0));
        // solid fills x > 0.75
        let boundary = |p: Point3| 0.75 - p.x;
        let mut out = FaceCenteredGrid::new(spec(n));
        let mut solver = FractionalSinglePhasePressureSolver::new();
        let status = solver.solve(
            &velocity,
            &mut out,
            &boundary,
            &still,
            None::<&fn(Point3) -> f64>,
        );
        assert!(status.converged);
        // weights vanish on faces inside the solid
        let uw = solver.u_weights().unwrap();
        assert_eq!(uw[(7, 4, 4)], 0.0);
        assert!(uw[(2, 4, 4)] > 0.99);
    }

    #[test]
    fn multigrid_backend_matches_iccg() {
        let n = 16;
        let velocity = wall_bounded_divergent_field(n);

        let mut iccg_out = FaceCenteredGrid::new(spec(n));
        FractionalSinglePhasePressureSolver::new().solve(
            &velocity,
            &mut iccg_out,
            &no_boundary,
            &still,
            None::<&fn(Point3) -> f64>,
        );

        let mut mg_out = FaceCenteredGrid::new(spec(n));
        let mut mg = FractionalSinglePhasePressureSolver::new().with_backend(
            PressureSolverBackend::Multigrid(FdmMgSolver::new(3, 60, 1e-6)),
        );
        let status = mg.solve(
            &velocity,
            &mut mg_out,
            &no_boundary,
            &still,
            None::<&fn(Point3) -> f64>,
        );
        assert!(status.converged, "mg residual {}", status.last_residual);

        let all_fluid = |_: Point3| -1.0;
        assert!(max_fluid_divergence(&mg_out, &all_fluid, 0.0) < 1e-3);
    }
}
