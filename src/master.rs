//! The regularized master problem and its cut pool.

pub mod cut;
pub mod regularized;

pub use cut::{Cut, CutKind, CutPool, CutPoolStats, PooledCut};
pub use regularized::{MasterPhase, MasterSolution, RegularizedMaster};
