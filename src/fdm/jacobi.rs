use super::{blas, FdmCompressedLinearSystem, FdmLinearSystem, FdmLinearSystemSolver, FdmVector, SolverStatus};

/// Jacobi relaxation. Convergence is only guaranteed for diagonally dominant
/// systems; mostly useful as a smoother or a reference solver.
pub struct FdmJacobiSolver {
    max_iterations: usize,
    residual_check_interval: usize,
    tolerance: f64,
    x_tmp: FdmVector,
    residual: FdmVector,
}

impl FdmJacobiSolver {
    pub fn new(max_iterations: usize, residual_check_interval: usize, tolerance: f64) -> Self {
        FdmJacobiSolver {
            max_iterations,
            residual_check_interval: residual_check_interval.max(1),
            tolerance,
            x_tmp: FdmVector::default(),
            residual: FdmVector::default(),
        }
    }

    fn relax(system: &FdmLinearSystem, x: &FdmVector, x_out: &mut FdmVector) {
        let size = system.size();
        let a = &system.a;
        let b = &system.b;
        x_out.resize(size, 0.0);
        x_out.par_fill_with(|i, j, k| {
            let row = a[(i, j, k)];
            let mut r = 0.0;
            if i + 1 < size.x {
                r += row.right * x[(i + 1, j, k)];
            }
            if i > 0 {
                r += a[(i - 1, j, k)].right * x[(i - 1, j, k)];
            }
            if j + 1 < size.y {
                r += row.up * x[(i, j + 1, k)];
            }
            if j > 0 {
                r += a[(i, j - 1, k)].up * x[(i, j - 1, k)];
            }
            if k + 1 < size.z {
                r += row.front * x[(i, j, k + 1)];
            }
            if k > 0 {
                r += a[(i, j, k - 1)].front * x[(i, j, k - 1)];
            }
            (b[(i, j, k)] - r) / row.center
        });
    }
}

impl FdmLinearSystemSolver for FdmJacobiSolver {
    fn solve(&mut self, system: &mut FdmLinearSystem) -> SolverStatus {
        let mut status = SolverStatus::default();

        for it in 0..self.max_iterations {
            Self::relax(system, &system.x, &mut self.x_tmp);
            system.x.swap(&mut self.x_tmp);
            status.iterations = it + 1;

            if (it + 1) % self.residual_check_interval == 0 || it + 1 == self.max_iterations {
                blas::residual(&system.a, &system.x, &system.b, &mut self.residual);
                status.last_residual = blas::l2_norm(&self.residual);
                if status.last_residual < self.tolerance {
                    status.converged = true;
                    break;
                }
            }
        }
        status
    }

    fn solve_compressed(&mut self, system: &mut FdmCompressedLinearSystem) -> SolverStatus {
        let n = system.a.rows();
        system.x.resize(n, 0.0);
        let mut status = SolverStatus::default();
        let mut x_tmp = vec![0.0; n];
        let mut residual = vec![0.0; n];

        for it in 0..self.max_iterations {
            for r in 0..n {
                let (values, cols) = system.a.row(r);
                let mut off = 0.0;
                let mut diag = 1.0;
                for (v, c) in values.iter().zip(cols) {
                    if *c == r {
                        diag = *v;
                    } else {
                        off += v * system.x[*c];
                    }
                }
                x_tmp[r] = (system.b[r] - off) / diag;
            }
            std::mem::swap(&mut system.x, &mut x_tmp);
            status.iterations = it + 1;

            if (it + 1) % self.residual_check_interval == 0 || it + 1 == self.max_iterations {
                blas::residual_csr(&system.a, &system.x, &system.b, &mut residual);
                status.last_residual = blas::l2_norm_vec(&residual);
                if status.last_residual < self.tolerance {
                    status.converged = true;
                    break;
                }
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdm::test_util::poisson_system;

    #[test]
    fn converges_on_small_poisson_problem() {
        let mut system = poisson_system(6);
        let mut solver = FdmJacobiSolver::new(400, 10, 1e-6);
        let status = solver.solve(&mut system);
        assert!(status.converged, "residual {}", status.last_residual);
        assert!(status.last_residual < 1e-6);
    }
}
