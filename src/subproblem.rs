//! Recourse subproblems: the LP collaborator interface, the dense simplex
//! backend and the per-scenario manager.

pub mod manager;
pub mod simplex;
pub mod solver;

pub use manager::{PassResult, PassStatistics, SubproblemManager, SubproblemSolution};
pub use simplex::{BasisSnapshot, DenseSimplex};
pub use solver::{DualCertificate, RecourseSolver, SolveStatus};
