//! Implicit QR factorization of the active constraint gradients.
//!
//! The active columns `G` are kept in full length; the factor only sees their
//! rows for the currently free variables, `G_F = Q·R`. `Q` is never formed:
//! every product with it goes through `G_F·R⁻¹`.
//!
//! Fixing a variable deletes a row of `G_F` (a Cholesky downdate of `R`),
//! freeing it appends the row back. Adding a cut appends a column, deleting a
//! cut removes one. Additions orthogonalize the new direction first and report
//! [`Update::Dependent`] instead of touching `R` when it lies (numerically) in
//! the span of what is already active.

use log::warn;

use crate::linalg::kernels::{axpy, dot, dot_mapped, pack};
use crate::linalg::triangular::UpperTriangular;

/// Outcome of an addition to the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The factor now includes the new member.
    Applied,

    /// The new member is linearly dependent on the active ones; nothing changed.
    Dependent,
}

/// A vector split into its component in the active column space and the
/// orthogonal residual, both in free-variable coordinates.
#[derive(Debug, Clone)]
pub struct Projection {
    /// `Qᵀv`, so that `R⁻¹·coefficients` are the least-squares weights on `G_F`.
    pub coefficients: Vec<f64>,

    /// `v - Q·Qᵀv`.
    pub residual: Vec<f64>,

    /// `|residual|²`.
    pub residual_norm2: f64,

    /// `|v|²`.
    pub original_norm2: f64,
}

impl Projection {
    /// True when the residual collapsed relative to the original norm.
    pub fn is_dependent(&self, threshold: f64) -> bool {
        self.original_norm2 == 0.0 || self.residual_norm2 <= threshold * self.original_norm2
    }
}

#[derive(Debug, Clone)]
pub struct ActiveSetFactorization {
    n: usize,
    columns: Vec<Vec<f64>>,
    free: Vec<usize>,
    position: Vec<Option<usize>>,
    r: UpperTriangular,
    threshold: f64,
    updates: usize,
}

impl ActiveSetFactorization {
    /// Empty factorization over `n` variables, all free.
    pub fn new(n: usize, threshold: f64) -> Self {
        Self {
            n,
            columns: Vec::new(),
            free: (0..n).collect(),
            position: (0..n).map(Some).collect(),
            r: UpperTriangular::new(),
            threshold,
            updates: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.n
    }

    /// Number of active columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Free variables, in the row order of `G_F`.
    pub fn free_variables(&self) -> &[usize] {
        &self.free
    }

    pub fn is_free(&self, var: usize) -> bool {
        self.position[var].is_some()
    }

    pub fn column(&self, i: usize) -> &[f64] {
        &self.columns[i]
    }

    pub fn factor(&self) -> &UpperTriangular {
        &self.r
    }

    /// Add/delete operations since the last rebuild.
    pub fn updates_since_rebuild(&self) -> usize {
        self.updates
    }

    /// `v` restricted to the free variables.
    pub fn reduce(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.n);
        let mut out = vec![0.0; self.free.len()];
        pack(v, &mut out, &self.free);
        out
    }

    /// `G_Fᵀ v` for `v` in free coordinates.
    pub fn transpose_times(&self, v: &[f64]) -> Vec<f64> {
        self.columns
            .iter()
            .map(|col| dot_mapped(v, col, &self.free))
            .collect()
    }

    /// `G_F u`, in free coordinates.
    pub fn times(&self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.columns.len());
        let mut out = vec![0.0; self.free.len()];
        for (col, &uj) in self.columns.iter().zip(u.iter()) {
            if uj == 0.0 {
                continue;
            }
            for (o, &var) in out.iter_mut().zip(self.free.iter()) {
                *o += col[var] * uj;
            }
        }
        out
    }

    /// Solves `R x = rhs` or `Rᵀ x = rhs` in place.
    pub fn triangular_solve(&self, rhs: &mut [f64], transpose: bool) {
        self.r.solve(rhs, transpose);
    }

    /// Solves the normal equations `G_FᵀG_F u = rhs` in place.
    pub fn solve_normal(&self, rhs: &mut [f64]) {
        self.r.solve(rhs, true);
        self.r.solve(rhs, false);
    }

    /// Orthogonalizes `v` (free coordinates) against the active columns with
    /// classical Gram–Schmidt, two passes, plus a third when the second pass
    /// still removed most of what was left.
    pub fn project(&self, v: Vec<f64>) -> Projection {
        let original_norm2 = dot(&v, &v);
        let k = self.columns.len();
        let mut coefficients = vec![0.0; k];
        let mut residual = v;
        let mut norm2 = original_norm2;

        for pass in 0..3 {
            if k == 0 || norm2 == 0.0 {
                break;
            }
            let mut c = self.transpose_times(&residual);
            self.r.solve(&mut c, true);
            let mut d = c.clone();
            self.r.solve(&mut d, false);
            let correction = self.times(&d);
            axpy(&mut residual, &correction, -1.0);
            axpy(&mut coefficients, &c, 1.0);

            let previous = norm2;
            norm2 = dot(&residual, &residual);
            if pass >= 1 && norm2 > 0.5 * previous {
                break;
            }
        }

        Projection {
            coefficients,
            residual,
            residual_norm2: norm2,
            original_norm2,
        }
    }

    /// AddCut: appends `normal` (full length) as a new active column.
    pub fn add_column(&mut self, normal: Vec<f64>) -> Update {
        debug_assert_eq!(normal.len(), self.n);
        let projection = self.project(self.reduce(&normal));
        if projection.is_dependent(self.threshold) {
            return Update::Dependent;
        }
        self.r
            .expand(&projection.coefficients, projection.residual_norm2.sqrt());
        self.columns.push(normal);
        self.updates += 1;
        Update::Applied
    }

    /// AddBound: removes `var` from the free set.
    pub fn fix_variable(&mut self, var: usize) -> Update {
        let Some(pos) = self.position[var] else {
            return Update::Applied;
        };
        if !self.columns.is_empty() {
            let mut unit = vec![0.0; self.free.len()];
            unit[pos] = 1.0;
            let projection = self.project(unit);
            if projection.is_dependent(self.threshold) {
                return Update::Dependent;
            }
            self.r
                .delete_row(&projection.coefficients, projection.residual_norm2.sqrt());
        }
        self.free.remove(pos);
        self.reindex();
        self.updates += 1;
        Update::Applied
    }

    /// DeleteBound: returns `var` to the free set.
    pub fn release_variable(&mut self, var: usize) {
        if self.position[var].is_some() {
            return;
        }
        let mut row: Vec<f64> = self.columns.iter().map(|col| col[var]).collect();
        self.r.append_row(&mut row);
        self.free.push(var);
        self.position[var] = Some(self.free.len() - 1);
        self.updates += 1;
    }

    /// DeleteCut: removes active column `i` and returns it.
    pub fn remove_column(&mut self, i: usize) -> Vec<f64> {
        self.r.delete_column(i);
        self.updates += 1;
        self.columns.remove(i)
    }

    /// Replaces active column `i` without refactoring; callers follow up with
    /// [`ActiveSetFactorization::rebuild`].
    pub fn set_column(&mut self, i: usize, normal: Vec<f64>) {
        debug_assert_eq!(normal.len(), self.n);
        self.columns[i] = normal;
    }

    /// Refactors from scratch. Returns the positions (in the order before the
    /// call) of columns that turned out dependent and were dropped.
    pub fn rebuild(&mut self) -> Vec<usize> {
        let columns = std::mem::take(&mut self.columns);
        self.r.clear();
        let mut dropped = Vec::new();
        for (i, col) in columns.into_iter().enumerate() {
            if self.add_column(col) == Update::Dependent {
                dropped.push(i);
            }
        }
        if !dropped.is_empty() {
            warn!("rebuild dropped {} dependent active column(s)", dropped.len());
        }
        self.updates = 0;
        dropped
    }

    /// Largest entry of `RᵀR - G_FᵀG_F`.
    pub fn gram_error(&self) -> f64 {
        let rtr = self.r.gram();
        let mut worst: f64 = 0.0;
        for (i, ci) in self.columns.iter().enumerate() {
            for (j, cj) in self.columns.iter().enumerate() {
                let g: f64 = self.free.iter().map(|&v| ci[v] * cj[v]).sum();
                worst = worst.max((g - rtr[i][j]).abs());
            }
        }
        worst
    }

    fn reindex(&mut self) {
        for p in self.position.iter_mut() {
            *p = None;
        }
        for (i, &var) in self.free.iter().enumerate() {
            self.position[var] = Some(i);
        }
    }
}
