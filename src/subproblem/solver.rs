use std::fmt::Debug;

use crate::error::Result;
use crate::problem::LinearProgram;

/// Outcome of an LP solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    /// Iteration limit or numerical trouble.
    Unknown,
}

/// Dual information of the final basis.
///
/// For every right-hand side `b'` the value of the solved program (for an
/// infeasible solve, its phase-one infeasibility) is at least
/// `duals·b' + bound_term`, with equality at the right-hand side just solved.
#[derive(Debug, Clone, PartialEq)]
pub struct DualCertificate {
    /// Row duals `π`.
    pub duals: Vec<f64>,
    /// `Σ d_j x_j` over nonbasic columns at their bounds.
    pub bound_term: f64,
}

impl DualCertificate {
    /// Lower bound on the value for right-hand side `rhs`.
    pub fn evaluate(&self, rhs: &[f64]) -> f64 {
        self.duals
            .iter()
            .zip(rhs.iter())
            .map(|(&p, &b)| p * b)
            .sum::<f64>()
            + self.bound_term
    }
}

/// Bounded-variable simplex collaborator used for recourse problems.
pub trait RecourseSolver {
    /// Saved basis, owned by the caller between solves.
    type Snapshot: Clone + Debug;

    /// Loads a new program, discarding any previous basis.
    fn initialize(&mut self, lp: &LinearProgram) -> Result<()>;

    /// Solves from scratch.
    fn solve(&mut self) -> SolveStatus;

    /// Solves starting from a saved basis, falling back to a cold start when
    /// the basis does not fit the loaded program.
    fn restart_from(&mut self, snapshot: &Self::Snapshot) -> SolveStatus;

    /// Solves from scratch, with a randomized pricing order if requested.
    fn restart(&mut self, randomize: bool) -> SolveStatus;

    /// Certificate of the last `Optimal` or `Infeasible` solve.
    fn certificate(&self) -> Option<&DualCertificate>;

    fn snapshot(&self) -> Option<Self::Snapshot>;

    /// Structural column values of the last solve.
    fn primal(&self) -> &[f64];

    fn objective_value(&self) -> f64;

    /// Pivots (and bound flips) of the last solve.
    fn iterations(&self) -> usize;

    /// Largest row residual of the last primal solution.
    fn residual(&self) -> f64;
}
