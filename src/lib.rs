//! Regularized decomposition for two-stage stochastic linear programs.
//!
//! A [`RegularizedDecomposition`] alternates between a proximal master
//! problem over cutting-plane models of the recourse cost and per-scenario
//! recourse LPs that supply new cuts. Scenarios are visited along a
//! low-cost spanning tree so each LP can warm-start from a similar one.

pub mod config;
pub mod decomposition;
pub mod error;
pub mod linalg;
pub mod master;
pub mod problem;
pub mod scenario;
pub mod subproblem;

pub use config::{DecompositionConfig, MasterConfig, RestartStrategy, SimplexConfig, TreeOrdering};
pub use decomposition::{DecompositionResult, DecompositionStatus, RegularizedDecomposition};
pub use error::{DecompositionError, Result};
pub use problem::{LinearProgram, RecourseTemplate, RowSense, TwoStageProblem};
pub use scenario::{Delta, DeltaKind, Scenario, ScenarioSet};
