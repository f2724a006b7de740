//! Recourse problems per scenario, solved in tree order with warm restarts.

use log::debug;

use crate::config::{RestartStrategy, TreeOrdering};
use crate::error::{DecompositionError, Result};
use crate::linalg::kernels::{axpy, dot, scale};
use crate::master::Cut;
use crate::problem::{LinearProgram, RecourseTemplate, TwoStageProblem};
use crate::scenario::{DeltaKind, Scenario, ScenarioSet, ScenarioTree};
use crate::subproblem::solver::{RecourseSolver, SolveStatus};

/// Result of one subproblem: the recourse value (or infeasibility) at the
/// trial point and its subgradient in the first-stage variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SubproblemSolution {
    pub feasible: bool,
    pub value: f64,
    pub gradient: Vec<f64>,
}

impl SubproblemSolution {
    /// The cut `value + gradient·(y' - y)` for the block that produced it.
    pub fn into_cut(self, block: usize, y: &[f64]) -> Cut {
        let constant = self.value - dot(&self.gradient, y);
        if self.feasible {
            Cut::optimality(block, constant, self.gradient)
        } else {
            Cut::feasibility(block, constant, self.gradient)
        }
    }
}

/// Counters for one pass over the scenarios.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStatistics {
    pub solved: usize,
    pub iterations: usize,
    pub optimal: usize,
    pub infeasible: usize,
    pub warm_starts: usize,
    pub cold_starts: usize,
}

/// Cuts of a pass and the expected recourse value they certify.
#[derive(Debug, Clone)]
pub struct PassResult {
    /// One cut per scenario, in visiting order.
    pub cuts: Vec<Cut>,
    /// `Σ p_s Q_s(y)` over the feasible scenarios.
    pub expected_recourse: f64,
    /// False when some scenario has no feasible recourse at `y`.
    pub feasible: bool,
}

/// A scenario's deltas, split by the data they touch.
#[derive(Debug, Clone)]
struct ScenarioData {
    rhs: Vec<f64>,
    cost: Vec<(usize, f64)>,
    recourse: Vec<(usize, usize, f64)>,
    /// `(row, col, new - base)` on the technology matrix.
    technology: Vec<(usize, usize, f64)>,
}

impl ScenarioData {
    fn new(scenario: &Scenario, template: &RecourseTemplate, first_stage_len: usize) -> Self {
        let mut data = Self {
            rhs: template.rhs.clone(),
            cost: Vec::new(),
            recourse: Vec::new(),
            technology: Vec::new(),
        };
        for d in scenario.resolved() {
            match d.kind {
                DeltaKind::Rhs => data.rhs[d.row] = d.value,
                DeltaKind::Cost => data.cost.push((d.col, d.value)),
                DeltaKind::Matrix if d.col < first_stage_len => {
                    let change = d.value - template.technology[d.row][d.col];
                    data.technology.push((d.row, d.col, change));
                }
                DeltaKind::Matrix => data.recourse.push((d.row, d.col - first_stage_len, d.value)),
            }
        }
        data
    }
}

pub struct SubproblemManager<S: RecourseSolver> {
    template: RecourseTemplate,
    first_stage_cost: Vec<f64>,
    scenarios: ScenarioSet,
    data: Vec<ScenarioData>,
    weights: Vec<f64>,
    tree: ScenarioTree,
    restart: RestartStrategy,
    ordering: TreeOrdering,
    solver: S,
    snapshots: Vec<Option<S::Snapshot>>,
    trial: Vec<f64>,
    technology_times_trial: Vec<f64>,
    statistics: PassStatistics,
    total_iterations: usize,
}

impl<S: RecourseSolver> SubproblemManager<S> {
    pub fn new(
        problem: &TwoStageProblem,
        scenarios: ScenarioSet,
        restart: RestartStrategy,
        ordering: TreeOrdering,
        solver: S,
    ) -> Self {
        let n1 = problem.first_stage_len();
        let data = scenarios
            .iter()
            .map(|s| ScenarioData::new(s, &problem.recourse, n1))
            .collect();
        let varying = scenarios
            .iter()
            .filter(|s| s.modifies_technology(n1))
            .count();
        debug!(
            "{} scenario(s), {} with their own technology entries",
            scenarios.len(),
            varying
        );
        let weights = scenarios.weights();
        let tree = ScenarioTree::build(scenarios.len(), |i, j| scenarios.distance(i, j), ordering);
        let snapshots = (0..scenarios.len()).map(|_| None).collect();
        Self {
            template: problem.recourse.clone(),
            first_stage_cost: problem.first_stage.objective.clone(),
            scenarios,
            data,
            weights,
            tree,
            restart,
            ordering,
            solver,
            snapshots,
            trial: Vec::new(),
            technology_times_trial: Vec::new(),
            statistics: PassStatistics::default(),
            total_iterations: 0,
        }
    }

    pub fn num_scenarios(&self) -> usize {
        self.scenarios.len()
    }

    /// Block id of the first-stage objective.
    pub fn objective_block(&self) -> usize {
        self.scenarios.len()
    }

    pub fn scenarios(&self) -> &ScenarioSet {
        &self.scenarios
    }

    /// Normalized scenario probabilities.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn tree(&self) -> &ScenarioTree {
        &self.tree
    }

    /// Counters of the last pass.
    pub fn statistics(&self) -> &PassStatistics {
        &self.statistics
    }

    /// Simplex iterations over the manager's lifetime.
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Appends scenarios and rebuilds the visiting tree.
    pub fn add_scenarios(&mut self, scenarios: Vec<Scenario>) {
        let n1 = self.first_stage_cost.len();
        for s in scenarios {
            self.data.push(ScenarioData::new(&s, &self.template, n1));
            self.snapshots.push(None);
            self.scenarios.push(s);
        }
        self.weights = self.scenarios.weights();
        let set = &self.scenarios;
        self.tree = ScenarioTree::build(set.len(), |i, j| set.distance(i, j), self.ordering);
    }

    /// Recourse LP of scenario `s` at the cached trial point.
    fn program(&self, s: usize) -> LinearProgram {
        let data = &self.data[s];
        let mut objective = self.template.cost.clone();
        for &(col, value) in &data.cost {
            objective[col] = value;
        }
        let mut constraints = self.template.matrix.clone();
        for &(row, col, value) in &data.recourse {
            constraints[row][col] = value;
        }
        let mut rhs: Vec<f64> = data
            .rhs
            .iter()
            .zip(self.technology_times_trial.iter())
            .map(|(&h, &ty)| h - ty)
            .collect();
        for &(row, col, change) in &data.technology {
            rhs[row] -= change * self.trial[col];
        }
        LinearProgram {
            objective,
            constraints,
            senses: self.template.senses.clone(),
            rhs,
            lower: self.template.lower.clone(),
            upper: self.template.upper.clone(),
        }
    }

    fn status_for(&mut self, s: usize) -> SolveStatus {
        let source = match self.restart {
            RestartStrategy::Random => {
                self.statistics.cold_starts += 1;
                return self.solver.restart(true);
            }
            RestartStrategy::SelfState => self.snapshots[s].as_ref(),
            RestartStrategy::Tree => self
                .tree
                .parent_of(s)
                .and_then(|p| self.snapshots[p].as_ref())
                .or(self.snapshots[s].as_ref()),
        };
        match source {
            Some(snapshot) => {
                self.statistics.warm_starts += 1;
                self.solver.restart_from(snapshot)
            }
            None => {
                self.statistics.cold_starts += 1;
                self.solver.solve()
            }
        }
    }

    /// Solves block `block` at `y`. The objective block needs no LP: its value
    /// is `c·y` with gradient `c`. `trial_changed` refreshes the cached `T·y`.
    pub fn solve_subproblem(
        &mut self,
        block: usize,
        y: &[f64],
        trial_changed: bool,
    ) -> Result<SubproblemSolution> {
        if block == self.objective_block() {
            return Ok(SubproblemSolution {
                feasible: true,
                value: dot(&self.first_stage_cost, y),
                gradient: self.first_stage_cost.clone(),
            });
        }
        if block > self.objective_block() {
            return Err(DecompositionError::invalid_problem(format!(
                "no block {}",
                block
            )));
        }
        if trial_changed || self.trial.len() != y.len() {
            self.trial = y.to_vec();
            self.technology_times_trial = self.template.technology_times(y);
        }

        let lp = self.program(block);
        self.solver.initialize(&lp)?;
        let status = self.status_for(block);
        let iterations = self.solver.iterations();
        self.statistics.solved += 1;
        self.statistics.iterations += iterations;
        self.total_iterations += iterations;
        if self.restart != RestartStrategy::Random {
            if let Some(snapshot) = self.solver.snapshot() {
                self.snapshots[block] = Some(snapshot);
            }
        }

        let feasible = match status {
            SolveStatus::Optimal => {
                self.statistics.optimal += 1;
                true
            }
            SolveStatus::Infeasible => {
                self.statistics.infeasible += 1;
                false
            }
            SolveStatus::Unbounded => {
                return Err(DecompositionError::UnboundedRecourse { scenario: block })
            }
            SolveStatus::Unknown => {
                return Err(DecompositionError::SolverFailure {
                    scenario: block,
                    reason: format!("no result after {} iterations", iterations),
                })
            }
        };
        let certificate = self.solver.certificate().ok_or_else(|| DecompositionError::SolverFailure {
            scenario: block,
            reason: "missing dual certificate".to_string(),
        })?;

        // g = -T_sᵀπ
        let duals = &certificate.duals;
        let mut gradient = vec![0.0; y.len()];
        for (row, &pi) in self.template.technology.iter().zip(duals.iter()) {
            if pi != 0.0 {
                axpy(&mut gradient, row, pi);
            }
        }
        for &(row, col, change) in &self.data[block].technology {
            gradient[col] += duals[row] * change;
        }
        scale(&mut gradient, -1.0);

        Ok(SubproblemSolution {
            feasible,
            value: certificate.evaluate(&lp.rhs),
            gradient,
        })
    }

    /// Solves every scenario at `y` in tree order.
    pub fn solve_pass(&mut self, y: &[f64], trial_changed: bool) -> Result<PassResult> {
        self.statistics = PassStatistics::default();
        let order = self.tree.order().to_vec();
        let mut cuts = Vec::with_capacity(order.len());
        let mut expected_recourse = 0.0;
        let mut feasible = true;
        for (k, &s) in order.iter().enumerate() {
            let solution = self.solve_subproblem(s, y, trial_changed && k == 0)?;
            if solution.feasible {
                expected_recourse += self.weights[s] * solution.value;
            } else {
                feasible = false;
            }
            cuts.push(solution.into_cut(s, y));
        }
        debug!(
            "pass: {} solved, {} infeasible, {} iterations, {} warm / {} cold",
            self.statistics.solved,
            self.statistics.infeasible,
            self.statistics.iterations,
            self.statistics.warm_starts,
            self.statistics.cold_starts
        );
        Ok(PassResult {
            cuts,
            expected_recourse,
            feasible,
        })
    }
}
