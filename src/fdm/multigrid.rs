use super::{blas, FdmGaussSeidelSolver, FdmMatrix, FdmVector, SolverStatus};
use crate::math::{size3, Size3};

/// Multi-level structured system; level 0 is the finest. The matrices are
/// assembled per level by the caller (the fractional pressure solver builds
/// them from restricted face weights rather than by Galerkin products).
#[derive(Clone, Debug, Default)]
pub struct FdmMgLinearSystem {
    pub a: Vec<FdmMatrix>,
    pub x: Vec<FdmVector>,
    pub b: Vec<FdmVector>,
}

impl FdmMgLinearSystem {
    pub fn levels(&self) -> usize {
        self.a.len()
    }

    pub fn clear(&mut self) {
        self.a.clear();
        self.x.clear();
        self.b.clear();
    }

    /// Resizes all three stacks to the level sizes derived from the finest
    /// resolution.
    pub fn resize_with_finest(&mut self, finest: Size3, max_levels: usize) {
        let sizes = level_sizes(finest, max_levels);
        self.a = sizes
            .iter()
            .map(|s| FdmMatrix::new(*s, Default::default()))
            .collect();
        self.x = sizes.iter().map(|s| FdmVector::new(*s, 0.0)).collect();
        self.b = sizes.iter().map(|s| FdmVector::new(*s, 0.0)).collect();
    }
}

/// Halves the finest resolution while every axis stays even and reasonably
/// coarse levels remain solvable.
pub fn level_sizes(finest: Size3, max_levels: usize) -> Vec<Size3> {
    let mut sizes = vec![finest];
    let mut current = finest;
    while sizes.len() < max_levels {
        if current.x % 2 != 0 || current.y % 2 != 0 || current.z % 2 != 0 {
            break;
        }
        let next = size3(current.x / 2, current.y / 2, current.z / 2);
        if next.x < 2 || next.y < 2 || next.z < 2 {
            break;
        }
        sizes.push(next);
        current = next;
    }
    sizes
}

/// Restriction with the centered 4-tap kernel `[1/8, 3/8, 3/8, 1/8]` on axes
/// where the finer extent is exactly doubled, and the staggered passthrough
/// `[0, 1, 0, 0]` otherwise.
pub fn restrict(finer: &FdmVector, coarser: &mut FdmVector) {
    const CENTERED: [f64; 4] = [0.125, 0.375, 0.375, 0.125];
    const STAGGERED: [f64; 4] = [0.0, 1.0, 0.0, 0.0];

    let nf = finer.size();
    let n = coarser.size();
    let kernel_size = [
        if nf.x == 2 * n.x { 4 } else { 3 },
        if nf.y == 2 * n.y { 4 } else { 3 },
        if nf.z == 2 * n.z { 4 } else { 3 },
    ];
    let kernels = [
        if kernel_size[0] == 4 { CENTERED } else { STAGGERED },
        if kernel_size[1] == 4 { CENTERED } else { STAGGERED },
        if kernel_size[2] == 4 { CENTERED } else { STAGGERED },
    ];

    let indices = |c: usize, extent: usize, ks: usize| -> [usize; 4] {
        let lo = if c > 0 { 2 * c - 1 } else { 2 * c };
        if ks == 3 {
            let hi = if 2 * c + 1 < extent { 2 * c + 1 } else { 2 * c };
            [lo, 2 * c, hi, 0]
        } else {
            let hi = if 2 * c + 2 < extent { 2 * c + 2 } else { 2 * c + 1 };
            [lo, 2 * c, 2 * c + 1, hi]
        }
    };

    coarser.par_fill_with(|i, j, k| {
        let xi = indices(i, nf.x, kernel_size[0]);
        let yj = indices(j, nf.y, kernel_size[1]);
        let zk = indices(k, nf.z, kernel_size[2]);

        let mut sum = 0.0;
        for z in 0..kernel_size[2] {
            for y in 0..kernel_size[1] {
                for x in 0..kernel_size[0] {
                    let w = kernels[0][x] * kernels[1][y] * kernels[2][z];
                    if w != 0.0 {
                        sum += w * finer[(xi[x], yj[y], zk[z])];
                    }
                }
            }
        }
        sum
    });
}

/// Adds the coarse correction into the 2x2x2 children of each coarse cell.
pub fn correct(coarser: &FdmVector, finer: &mut FdmVector) {
    let n = coarser.size();
    let fine = finer.clone();
    finer.par_fill_with(|i, j, k| {
        let ci = (i / 2).min(n.x - 1);
        let cj = (j / 2).min(n.y - 1);
        let ck = (k / 2).min(n.z - 1);
        fine[(i, j, k)] + coarser[(ci, cj, ck)]
    });
}

pub struct FdmMgSolver {
    pub max_levels: usize,
    pre_smoothing_sweeps: usize,
    post_smoothing_sweeps: usize,
    max_cycles: usize,
    tolerance: f64,
}

impl FdmMgSolver {
    pub fn new(max_levels: usize, max_cycles: usize, tolerance: f64) -> Self {
        FdmMgSolver {
            max_levels,
            pre_smoothing_sweeps: 3,
            post_smoothing_sweeps: 3,
            max_cycles,
            tolerance,
        }
    }

    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    pub fn solve(&mut self, system: &mut FdmMgLinearSystem) -> SolverStatus {
        let mut status = SolverStatus::default();
        let mut residual = FdmVector::default();

        for cycle in 0..self.max_cycles {
            self.v_cycle(system, 0);
            status.iterations = cycle + 1;

            blas::residual(&system.a[0], &system.x[0], &system.b[0], &mut residual);
            status.last_residual = blas::l2_norm(&residual);
            if status.last_residual < self.tolerance {
                status.converged = true;
                break;
            }
        }
        status
    }

    fn v_cycle(&self, system: &mut FdmMgLinearSystem, level: usize) {
        if level + 1 == system.levels() {
            coarsest_solve(&system.a[level], &system.b[level], &mut system.x[level]);
            return;
        }

        for _ in 0..self.pre_smoothing_sweeps {
            FdmGaussSeidelSolver::relax_red_black(
                &system.a[level],
                &system.b[level],
                1.0,
                &mut system.x[level],
            );
        }

        let mut residual = FdmVector::default();
        blas::residual(&system.a[level], &system.x[level], &system.b[level], &mut residual);

        restrict(&residual, &mut system.b[level + 1]);
        system.x[level + 1].fill(0.0);

        self.v_cycle(system, level + 1);

        {
            let (head, tail) = system.x.split_at_mut(level + 1);
            correct(&tail[0], &mut head[level]);
        }

        for _ in 0..self.post_smoothing_sweeps {
            FdmGaussSeidelSolver::relax_red_black(
                &system.a[level],
                &system.b[level],
                1.0,
                &mut system.x[level],
            );
        }
    }
}

/// Tight unpreconditioned CG at the coarsest level. More reliable than
/// "enough smoother sweeps" and still cheap at coarse resolutions.
fn coarsest_solve(a: &FdmMatrix, b: &FdmVector, x: &mut FdmVector) {
    let n = a.len();
    let tolerance = 1e-9;
    let max_iterations = 2 * n;

    let mut r = FdmVector::default();
    blas::residual(a, x, b, &mut r);
    if blas::l2_norm(&r) < tolerance {
        return;
    }
    let mut d = r.clone();
    let mut q = FdmVector::default();
    let mut sigma = blas::dot(&r, &r);

    for _ in 0..max_iterations {
        blas::mvm(a, &d, &mut q);
        let dq = blas::dot(&d, &q);
        if dq.abs() < f64::MIN_POSITIVE {
            break;
        }
        let alpha = sigma / dq;
        for (xv, dv) in x.data_mut().iter_mut().zip(d.data()) {
            *xv += alpha * dv;
        }
        for (rv, qv) in r.data_mut().iter_mut().zip(q.data()) {
            *rv -= alpha * qv;
        }
        let sigma_new = blas::dot(&r, &r);
        if sigma_new.sqrt() < tolerance {
            break;
        }
        let beta = sigma_new / sigma;
        sigma = sigma_new;
        for (dv, rv) in d.data_mut().iter_mut().zip(r.data()) {
            *dv = rv + beta * *dv;
        }
    }
}
