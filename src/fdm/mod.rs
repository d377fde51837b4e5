mod gauss_seidel;
mod iccg;
mod jacobi;
pub mod multigrid;

pub use gauss_seidel::FdmGaussSeidelSolver;
pub use iccg::{FdmIccgSolver, IncompleteCholeskyVariant};
pub use jacobi::FdmJacobiSolver;
pub use multigrid::{FdmMgLinearSystem, FdmMgSolver};

use crate::grid::Array3;
use crate::math::{size3, Size3};

/// One row of the structured 7-point matrix. Off-diagonals toward the
/// negative directions are implicit by symmetry.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FdmMatrixRow {
    pub center: f64,
    pub right: f64,
    pub up: f64,
    pub front: f64,
}

pub type FdmMatrix = Array3<FdmMatrixRow>;
pub type FdmVector = Array3<f64>;

/// Structured linear system over a cell-centered unknown grid.
#[derive(Clone, Debug, Default)]
pub struct FdmLinearSystem {
    pub a: FdmMatrix,
    pub x: FdmVector,
    pub b: FdmVector,
}

impl FdmLinearSystem {
    pub fn new(size: Size3) -> Self {
        FdmLinearSystem {
            a: Array3::new(size, FdmMatrixRow::default()),
            x: Array3::new(size, 0.0),
            b: Array3::new(size, 0.0),
        }
    }

    pub fn resize(&mut self, size: Size3) {
        self.a.resize(size, FdmMatrixRow::default());
        self.x.resize(size, 0.0);
        self.b.resize(size, 0.0);
    }

    pub fn clear(&mut self) {
        self.resize(size3(0, 0, 0));
    }

    pub fn size(&self) -> Size3 {
        self.a.size()
    }
}

/// Compressed sparse row matrix for systems where the unknowns are a small
/// subset of the domain (fluid cells only).
#[derive(Clone, Debug, Default)]
pub struct CsrMatrix {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn new() -> Self {
        CsrMatrix {
            row_ptr: vec![0],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.row_ptr.clear();
        self.row_ptr.push(0);
        self.col_idx.clear();
        self.values.clear();
    }

    /// Appends a row; `values[i]` couples the new row to column `cols[i]`.
    pub fn add_row(&mut self, values: &[f64], cols: &[usize]) {
        debug_assert_eq!(values.len(), cols.len());
        self.values.extend_from_slice(values);
        self.col_idx.extend_from_slice(cols);
        self.row_ptr.push(self.values.len());
    }

    pub fn rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn row(&self, r: usize) -> (&[f64], &[usize]) {
        let range = self.row_ptr[r]..self.row_ptr[r + 1];
        (&self.values[range.clone()], &self.col_idx[range])
    }

    pub fn multiply(&self, x: &[f64], out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.rows());
        for r in 0..self.rows() {
            let (values, cols) = self.row(r);
            let mut sum = 0.0;
            for (v, c) in values.iter().zip(cols) {
                sum += v * x[*c];
            }
            out[r] = sum;
        }
    }

    pub fn diagonal(&self, r: usize) -> f64 {
        let (values, cols) = self.row(r);
        for (v, c) in values.iter().zip(cols) {
            if *c == r {
                return *v;
            }
        }
        0.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct FdmCompressedLinearSystem {
    pub a: CsrMatrix,
    pub x: Vec<f64>,
    pub b: Vec<f64>,
}

impl FdmCompressedLinearSystem {
    pub fn clear(&mut self) {
        self.a.clear();
        self.x.clear();
        self.b.clear();
    }
}

/// Outcome of a linear solve. `converged` means the residual dropped below
/// the solver tolerance within its iteration budget; otherwise the system
/// holds the best-effort solution.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverStatus {
    pub converged: bool,
    pub iterations: usize,
    pub last_residual: f64,
}

pub trait FdmLinearSystemSolver {
    fn solve(&mut self, system: &mut FdmLinearSystem) -> SolverStatus;

    /// Compressed-system variant; solvers without a specialized path report
    /// non-convergence so callers fall back to the structured layout.
    fn solve_compressed(&mut self, system: &mut FdmCompressedLinearSystem) -> SolverStatus {
        let _ = system;
        log::warn!("solver has no compressed-system path");
        SolverStatus::default()
    }
}

/// BLAS-style helpers shared by the solvers; usable on either representation.
pub mod blas {
    use super::*;

    pub fn dot(a: &FdmVector, b: &FdmVector) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.data().iter().zip(b.data()).map(|(x, y)| x * y).sum()
    }

    /// out = alpha * x + y
    pub fn axpy(alpha: f64, x: &FdmVector, y: &FdmVector, out: &mut FdmVector) {
        debug_assert_eq!(x.len(), y.len());
        for ((o, xv), yv) in out.data_mut().iter_mut().zip(x.data()).zip(y.data()) {
            *o = alpha * xv + yv;
        }
    }

    /// Structured 7-point matrix-vector multiply with implicit symmetry.
    pub fn mvm(m: &FdmMatrix, v: &FdmVector, out: &mut FdmVector) {
        let size = m.size();
        debug_assert_eq!(v.size(), size);
        out.resize(size, 0.0);
        out.par_fill_with(|i, j, k| {
            let row = m[(i, j, k)];
            let mut sum = row.center * v[(i, j, k)];
            if i + 1 < size.x {
                sum += row.right * v[(i + 1, j, k)];
            }
            if i > 0 {
                sum += m[(i - 1, j, k)].right * v[(i - 1, j, k)];
            }
            if j + 1 < size.y {
                sum += row.up * v[(i, j + 1, k)];
            }
            if j > 0 {
                sum += m[(i, j - 1, k)].up * v[(i, j - 1, k)];
            }
            if k + 1 < size.z {
                sum += row.front * v[(i, j, k + 1)];
            }
            if k > 0 {
                sum += m[(i, j, k - 1)].front * v[(i, j, k - 1)];
            }
            sum
        });
    }

    pub fn residual(m: &FdmMatrix, x: &FdmVector, b: &FdmVector, out: &mut FdmVector) {
        mvm(m, x, out);
        for (o, bv) in out.data_mut().iter_mut().zip(b.data()) {
            *o = bv - *o;
        }
    }

    pub fn l2_norm(v: &FdmVector) -> f64 {
        v.data().iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    pub fn linf_norm(v: &FdmVector) -> f64 {
        v.data().iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
    }

    // dense-vector versions for the compressed layout

    pub fn dot_vec(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    pub fn residual_csr(m: &CsrMatrix, x: &[f64], b: &[f64], out: &mut Vec<f64>) {
        out.resize(m.rows(), 0.0);
        m.multiply(x, out);
        for (o, bv) in out.iter_mut().zip(b) {
            *o = bv - *o;
        }
    }

    pub fn l2_norm_vec(v: &[f64]) -> f64 {
        v.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Poisson system with Dirichlet walls: A = -Laplacian (h = 1), b = 1.
    pub fn poisson_system(n: usize) -> FdmLinearSystem {
        let size = size3(n, n, n);
        let mut system = FdmLinearSystem::new(size);
        crate::parallel::for_each_index3(size, |i, j, k| {
            let mut row = FdmMatrixRow {
                center: 6.0,
                ..Default::default()
            };
            if i + 1 < n {
                row.right = -1.0;
            }
            if j + 1 < n {
                row.up = -1.0;
            }
            if k + 1 < n {
                row.front = -1.0;
            }
            system.a[(i, j, k)] = row;
        });
        system.b.fill(1.0);
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mvm_is_symmetric_through_implicit_entries() {
        let system = test_util::poisson_system(4);
        let mut xv = FdmVector::new(system.size(), 0.0);
        let mut yv = FdmVector::new(system.size(), 0.0);
        for (idx, v) in xv.data_mut().iter_mut().enumerate() {
            *v = ((idx * 31 + 7) % 13) as f64 - 6.0;
        }
        for (idx, v) in yv.data_mut().iter_mut().enumerate() {
            *v = ((idx * 17 + 3) % 11) as f64 - 5.0;
        }
        let mut ax = FdmVector::new(system.size(), 0.0);
        let mut ay = FdmVector::new(system.size(), 0.0);
        blas::mvm(&system.a, &xv, &mut ax);
        blas::mvm(&system.a, &yv, &mut ay);
        // <Ax, y> == <x, Ay> for a symmetric matrix
        assert_relative_eq!(blas::dot(&ax, &yv), blas::dot(&xv, &ay), epsilon = 1e-9);
    }

    #[test]
    fn csr_multiply() {
        let mut m = CsrMatrix::new();
        m.add_row(&[2.0, -1.0], &[0, 1]);
        m.add_row(&[-1.0, 2.0], &[0, 1]);
        let mut out = vec![0.0; 2];
        m.multiply(&[1.0, 3.0], &mut out);
        assert_eq!(out, vec![-1.0, 5.0]);
        assert_eq!(m.diagonal(1), 2.0);
    }
}
