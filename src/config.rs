//! Configuration for the decomposition driver, the master and the simplex
//! backend.

use std::time::Duration;

/// How a scenario's recourse LP is warm-started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartStrategy {
    /// Resume from the scenario's own last basis.
    #[default]
    SelfState,

    /// Resume from the basis of the scenario's predecessor in the visiting tree.
    Tree,

    /// Always solve from scratch with a randomized pricing order.
    Random,
}

/// Algorithm used to build the scenario visiting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeOrdering {
    /// Minimum spanning tree via Prim–Dijkstra.
    #[default]
    Exact,

    /// Nearest-neighbour chains merged by cheapest cross-links, with distances
    /// evaluated only between scenarios close in generation order.
    Heuristic,

    /// Generation order, each scenario restarting from the previous one.
    Generation,
}

/// Settings of the regularized master solver.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Nominal violation tolerance `tolcut`; tightening never goes below it.
    pub cut_tolerance: f64,

    /// Upper limit when `tolcut` is relaxed after drift.
    pub max_cut_tolerance: f64,

    /// Rebuild the factorization after this many updates.
    pub rebuild_interval: usize,

    /// Squared residual ratio under which a new member counts as dependent.
    pub dependency_threshold: f64,

    /// Cap on add/delete steps in one master solve.
    pub max_steps: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            cut_tolerance: 1e-9,
            max_cut_tolerance: 1e-5,
            rebuild_interval: 500,
            dependency_threshold: 1e-20,
            max_steps: 10_000,
        }
    }
}

/// Settings of the dense simplex backend.
#[derive(Debug, Clone)]
pub struct SimplexConfig {
    /// Pivot limit per solve.
    pub max_iterations: usize,

    /// Primal and dual feasibility tolerance.
    pub tolerance: f64,

    /// Smallest acceptable pivot magnitude.
    pub pivot_tolerance: f64,

    /// Consecutive degenerate pivots before switching to Bland's rule.
    pub degenerate_limit: usize,

    /// Seed for randomized pricing orders.
    pub seed: u64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            tolerance: 1e-9,
            pivot_tolerance: 1e-10,
            degenerate_limit: 50,
            seed: 0x5eed,
        }
    }
}

/// Settings of the regularized decomposition driver.
#[derive(Debug, Clone)]
pub struct DecompositionConfig {
    // === Termination ===
    /// Maximum outer (master) iterations.
    pub max_iterations: usize,

    /// Wall-clock budget (None = unlimited).
    pub time_limit: Option<Duration>,

    /// Relative tolerance on the predicted decrease.
    pub optimality_tolerance: f64,

    // === Regularization ===
    /// Initial proximal penalty `M`.
    pub initial_penalty: f64,

    /// Smallest penalty reachable by the schedule.
    pub min_penalty: f64,

    /// Largest penalty reachable by the schedule.
    pub max_penalty: f64,

    /// Fraction of predicted decrease required for a serious step.
    pub descent_fraction: f64,

    // === Subproblems ===
    /// Warm-restart strategy for recourse LPs.
    pub restart: RestartStrategy,

    /// Scenario visiting order.
    pub ordering: TreeOrdering,

    /// Rounds of feasibility cuts allowed while looking for a first center.
    pub max_feasibility_rounds: usize,

    // === Components ===
    /// Master solver settings.
    pub master: MasterConfig,

    /// Simplex backend settings.
    pub simplex: SimplexConfig,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            time_limit: None,
            optimality_tolerance: 1e-8,
            initial_penalty: 1.0,
            min_penalty: 1e-6,
            max_penalty: 1e6,
            descent_fraction: 0.1,
            restart: RestartStrategy::default(),
            ordering: TreeOrdering::default(),
            max_feasibility_rounds: 100,
            master: MasterConfig::default(),
            simplex: SimplexConfig::default(),
        }
    }
}

impl DecompositionConfig {
    /// Set the restart strategy.
    pub fn with_restart(mut self, restart: RestartStrategy) -> Self {
        self.restart = restart;
        self
    }

    /// Set the scenario ordering.
    pub fn with_ordering(mut self, ordering: TreeOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the wall-clock limit for one `solve` call.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Set the initial proximal penalty.
    pub fn with_initial_penalty(mut self, penalty: f64) -> Self {
        self.initial_penalty = penalty;
        self
    }

    /// Set the optimality tolerance.
    pub fn with_optimality_tolerance(mut self, tol: f64) -> Self {
        self.optimality_tolerance = tol;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = DecompositionConfig::default()
            .with_time_limit(Duration::from_millis(250))
            .with_max_iterations(7)
            .with_ordering(TreeOrdering::Heuristic);
        assert_eq!(config.time_limit, Some(Duration::from_millis(250)));
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.ordering, TreeOrdering::Heuristic);
        assert_eq!(config.restart, RestartStrategy::SelfState);
        assert_eq!(DecompositionConfig::default().time_limit, None);
    }

    #[test]
    fn test_zero_time_limit_is_kept() {
        let config = DecompositionConfig::default().with_time_limit(Duration::ZERO);
        assert_eq!(config.time_limit, Some(Duration::ZERO));
    }
}
