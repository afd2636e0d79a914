//! `LinearSystem`: a row-major CSR builder plus the concrete `LinearSolver`
//! backends shipped so the engine is runnable standalone (the external
//! solver is a named out-of-scope collaborator; these exist to fill that
//! seam, not to be the production answer for it).
//!
//! `PcgSolver` is a Jacobi-preconditioned conjugate-gradient solve
//! (`solve_pcg_with_guess`) over a pre-built `sprs::CsMat`, reporting back
//! through `SolveReport`. `BiCgStabSolver` is the non-symmetric counterpart
//! needed once a fully implicit Jacobian mixes in component-derivative
//! blocks.

use nalgebra::DVector;
use sprs::{CsMat, TriMat};

/// Accumulates row/column/value triplets with per-row capacity hints, then
/// freezes into a CSR matrix. `row_cap_plus` is a pre-reservation idiom
/// (declare a row's expected fill-in before writing to it) so repeated
/// assembly passes don't reallocate per entry.
pub struct LinearSystemBuilder {
    dim: usize,
    rows: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
}

impl LinearSystemBuilder {
    pub fn allocate(dim_max: usize) -> Self {
        LinearSystemBuilder {
            dim: dim_max,
            rows: vec![Vec::new(); dim_max],
            rhs: vec![0.0; dim_max],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Reserves `extra` additional entries in `row`'s fill-in budget ahead
    /// of a batch of `add_entry` calls (connection stencils and well
    /// fill-in are known in count before their values are).
    pub fn row_cap_plus(&mut self, row: usize, extra: usize) {
        self.rows[row].reserve(extra);
    }

    /// Adds (accumulates into, if already present) one matrix entry.
    pub fn add_entry(&mut self, row: usize, col: usize, value: f64) {
        if let Some(existing) = self.rows[row].iter_mut().find(|(c, _)| *c == col) {
            existing.1 += value;
        } else {
            self.rows[row].push((col, value));
        }
    }

    pub fn add_rhs(&mut self, row: usize, value: f64) {
        self.rhs[row] += value;
    }

    pub fn clear(&mut self) {
        for row in &mut self.rows {
            row.clear();
        }
        self.rhs.iter_mut().for_each(|v| *v = 0.0);
    }

    /// `AssembleMat_Fasp`: materializes contiguous IA/JA/val into a CSR
    /// matrix without copying values beyond translation (`sprs`'s
    /// `TriMat::to_csr` does the compression; no values are otherwise
    /// touched).
    pub fn build(&self) -> LinearSystem {
        let mut tri = TriMat::new((self.dim, self.dim));
        for (row, entries) in self.rows.iter().enumerate() {
            for &(col, value) in entries {
                tri.add_triplet(row, col, value);
            }
        }
        LinearSystem {
            matrix: tri.to_csr(),
            rhs: DVector::from_vec(self.rhs.clone()),
        }
    }
}

pub struct LinearSystem {
    pub matrix: CsMat<f64>,
    pub rhs: DVector<f64>,
}

impl LinearSystem {
    pub fn dim(&self) -> usize {
        self.rhs.len()
    }

    fn jacobi_diag_inv(&self) -> DVector<f64> {
        let n = self.dim();
        let mut inv = DVector::from_element(n, 1.0);
        for (row, vec) in self.matrix.outer_iterator().enumerate() {
            for (&col, &val) in vec.indices().iter().zip(vec.data().iter()) {
                if col == row && val.abs() > f64::EPSILON {
                    inv[row] = 1.0 / val;
                }
            }
        }
        inv
    }
}

/// Outcome of a solver invocation: negative solver status (a failed or
/// stalled Krylov iteration) is reported as iteration count to `Control`
/// and does not itself abort the step — the method driver's own checks
/// decide whether to retry with a smaller `dt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub converged: bool,
    pub iterations: usize,
}

/// The seam a host can substitute a direct sparse solver or an
/// AMG-preconditioned Krylov method into, without touching `Bulk`,
/// `Connections`, `Well`, or the method drivers.
pub trait LinearSolver {
    fn solve(&self, system: &LinearSystem, x0: &DVector<f64>) -> (DVector<f64>, SolveReport);
}

fn cs_mat_mul_vec(a: &CsMat<f64>, x: &DVector<f64>) -> DVector<f64> {
    let n = a.rows();
    let mut y = DVector::<f64>::zeros(n);
    for (row, vec) in a.outer_iterator().enumerate() {
        let mut sum = 0.0;
        for (&col, &val) in vec.indices().iter().zip(vec.data().iter()) {
            sum += val * x[col];
        }
        y[row] = sum;
    }
    y
}

/// Jacobi-preconditioned conjugate gradient, for the IMPES pressure
/// equation (symmetric positive semi-definite under upstream-weighted
/// single-phase assembly).
pub struct PcgSolver {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PcgSolver {
    fn default() -> Self {
        PcgSolver { tolerance: 1.0e-6, max_iterations: 500 }
    }
}

impl LinearSolver for PcgSolver {
    fn solve(&self, system: &LinearSystem, x0: &DVector<f64>) -> (DVector<f64>, SolveReport) {
        let a = &system.matrix;
        let b = &system.rhs;
        let m_inv_diag = system.jacobi_diag_inv();
        let n = b.len();

        let mut x = x0.clone();
        let mut r = b - &cs_mat_mul_vec(a, &x);
        let mut z = DVector::<f64>::zeros(n);
        for i in 0..n {
            z[i] = r[i] * m_inv_diag[i];
        }
        let mut p = z.clone();
        let mut r_dot_z = r.dot(&z);
        let r0_norm = r.norm();
        if r0_norm == 0.0 {
            return (x, SolveReport { converged: true, iterations: 0 });
        }

        let mut converged = false;
        let mut iter_count = 0;
        for it in 0..self.max_iterations {
            iter_count = it + 1;
            if r.norm() / r0_norm < self.tolerance {
                converged = true;
                break;
            }
            let q = cs_mat_mul_vec(a, &p);
            let p_dot_q = p.dot(&q);
            if p_dot_q.abs() < f64::EPSILON {
                converged = false;
                break;
            }
            let alpha = r_dot_z / p_dot_q;
            x += alpha * p.clone();
            let r_new = r - alpha * q;
            let mut z_new = DVector::<f64>::zeros(n);
            for i in 0..n {
                z_new[i] = r_new[i] * m_inv_diag[i];
            }
            let r_new_dot_z_new = r_new.dot(&z_new);
            let beta = if r_dot_z.abs() < f64::EPSILON { 0.0 } else { r_new_dot_z_new / r_dot_z };
            p = z_new.clone() + beta * p;
            r = r_new;
            r_dot_z = r_new_dot_z_new;
        }
        (x, SolveReport { converged, iterations: iter_count })
    }
}

/// Biconjugate-gradient-stabilized Krylov solver, for the FIM
/// `(Nc+1)x(Nc+1)`-block-per-cell Newton system once component-derivative
/// blocks make the matrix non-symmetric. Same Jacobi-preconditioning idiom
/// as `PcgSolver`, generalized to the non-symmetric case.
pub struct BiCgStabSolver {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStabSolver {
    fn default() -> Self {
        BiCgStabSolver { tolerance: 1.0e-6, max_iterations: 500 }
    }
}

impl LinearSolver for BiCgStabSolver {
    fn solve(&self, system: &LinearSystem, x0: &DVector<f64>) -> (DVector<f64>, SolveReport) {
        let a = &system.matrix;
        let b = &system.rhs;
        let m_inv_diag = system.jacobi_diag_inv();
        let n = b.len();

        let mut x = x0.clone();
        let mut r = b - &cs_mat_mul_vec(a, &x);
        let r_hat = r.clone();
        let r0_norm = r.norm();
        if r0_norm == 0.0 {
            return (x, SolveReport { converged: true, iterations: 0 });
        }

        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = DVector::<f64>::zeros(n);
        let mut p = DVector::<f64>::zeros(n);

        let mut converged = false;
        let mut iter_count = 0;
        for it in 0..self.max_iterations {
            iter_count = it + 1;
            if r.norm() / r0_norm < self.tolerance {
                converged = true;
                break;
            }
            let rho_new = r_hat.dot(&r);
            if rho.abs() < f64::EPSILON || omega.abs() < f64::EPSILON {
                converged = false;
                break;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            p = &r + beta * (&p - omega * &v);

            let mut p_hat = DVector::<f64>::zeros(n);
            for i in 0..n {
                p_hat[i] = p[i] * m_inv_diag[i];
            }
            v = cs_mat_mul_vec(a, &p_hat);
            let r_hat_dot_v = r_hat.dot(&v);
            if r_hat_dot_v.abs() < f64::EPSILON {
                converged = false;
                break;
            }
            alpha = rho_new / r_hat_dot_v;
            let s = &r - alpha * &v;
            if s.norm() / r0_norm < self.tolerance {
                x += alpha * p_hat;
                converged = true;
                break;
            }

            let mut s_hat = DVector::<f64>::zeros(n);
            for i in 0..n {
                s_hat[i] = s[i] * m_inv_diag[i];
            }
            let t = cs_mat_mul_vec(a, &s_hat);
            let t_dot_t = t.dot(&t);
            omega = if t_dot_t.abs() < f64::EPSILON { 0.0 } else { t.dot(&s) / t_dot_t };

            x += alpha * p_hat + omega * &s_hat;
            r = &s - omega * &t;
            rho = rho_new;
        }
        (x, SolveReport { converged, iterations: iter_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_system(n: usize, rhs: Vec<f64>) -> LinearSystem {
        let mut builder = LinearSystemBuilder::allocate(n);
        for i in 0..n {
            builder.row_cap_plus(i, 1);
            builder.add_entry(i, i, 1.0);
            builder.add_rhs(i, rhs[i]);
        }
        builder.build()
    }

    #[test]
    fn pcg_solves_identity_system_exactly() {
        let system = identity_system(3, vec![1.0, 2.0, 3.0]);
        let solver = PcgSolver::default();
        let (x, report) = solver.solve(&system, &DVector::zeros(3));
        assert!(report.converged);
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1.0e-9);
        }
    }

    #[test]
    fn bicgstab_solves_nonsymmetric_system() {
        let mut builder = LinearSystemBuilder::allocate(2);
        builder.add_entry(0, 0, 4.0);
        builder.add_entry(0, 1, 1.0);
        builder.add_entry(1, 0, 2.0);
        builder.add_entry(1, 1, 3.0);
        builder.add_rhs(0, 1.0);
        builder.add_rhs(1, 2.0);
        let system = builder.build();

        let solver = BiCgStabSolver::default();
        let (x, report) = solver.solve(&system, &DVector::zeros(2));
        assert!(report.converged);
        let residual = &system.rhs - cs_mat_mul_vec(&system.matrix, &x);
        assert!(residual.norm() < 1.0e-6);
    }

    #[test]
    fn add_entry_accumulates_repeated_writes_to_the_same_cell() {
        let mut builder = LinearSystemBuilder::allocate(1);
        builder.add_entry(0, 0, 2.0);
        builder.add_entry(0, 0, 3.0);
        builder.add_rhs(0, 5.0);
        let system = builder.build();
        let solver = PcgSolver::default();
        let (x, _) = solver.solve(&system, &DVector::zeros(1));
        assert!((x[0] - 1.0).abs() < 1.0e-9);
    }

    #[test]
    fn clear_resets_builder_for_reassembly() {
        let mut builder = LinearSystemBuilder::allocate(1);
        builder.add_entry(0, 0, 2.0);
        builder.add_rhs(0, 5.0);
        builder.clear();
        builder.add_entry(0, 0, 1.0);
        builder.add_rhs(0, 9.0);
        let system = builder.build();
        let solver = PcgSolver::default();
        let (x, _) = solver.solve(&system, &DVector::zeros(1));
        assert!((x[0] - 9.0).abs() < 1.0e-9);
    }
}
