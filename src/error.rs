//! Error types for the decomposition engine.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors that abort a decomposition run.
///
/// Linear dependence inside the master and infeasible subproblems are not
/// errors: the former is resolved by the active-set ratio test, the latter
/// yields a feasibility cut.
#[derive(Error, Debug)]
pub enum DecompositionError {
    /// Problem data failed validation.
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    /// The recourse LP of a scenario is unbounded; the model is malformed.
    #[error("recourse problem of scenario {scenario} is unbounded")]
    UnboundedRecourse {
        /// Offending scenario.
        scenario: usize,
    },

    /// Dependency persisted with no active member eligible for deletion.
    #[error("master region is infeasible: {0}")]
    InfeasibleMaster(String),

    /// The first-stage constraints admit no point.
    #[error("first-stage problem is infeasible")]
    InfeasibleFirstStage,

    /// No first-stage point with feasible recourse was found.
    #[error("no center with feasible recourse found after {rounds} feasibility rounds")]
    NoFeasibleCenter {
        /// Rounds of feasibility cuts tried.
        rounds: usize,
    },

    /// The LP collaborator could not produce a usable status.
    #[error("solver failed on scenario {scenario}: {reason}")]
    SolverFailure {
        /// Scenario being solved.
        scenario: usize,
        /// Diagnostic from the solver.
        reason: String,
    },

    /// The first-stage LP used to find a center ended without a point.
    #[error("first-stage solve failed: {reason}")]
    FirstStageSolverFailure {
        /// Diagnostic from the solver.
        reason: String,
    },

    /// The master sub-loop ran past its step cap.
    #[error("master exceeded {0} steps without converging")]
    MasterStepLimit(usize),

    /// Growing an internal array failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[from] TryReserveError),
}

impl DecompositionError {
    pub fn invalid_problem(msg: impl Into<String>) -> Self {
        DecompositionError::InvalidProblem(msg.into())
    }
}

/// Result type for decomposition operations.
pub type Result<T> = std::result::Result<T, DecompositionError>;
