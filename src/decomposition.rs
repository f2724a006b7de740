//! Regularized decomposition of two-stage stochastic linear programs.
//!
//! The driver keeps a center `x` with a known objective `f(x) = c·x + E[Q(x)]`
//! and asks the master for the minimizer `y` of `(M/2)|y - x|² + f̂(y)`. The
//! subproblems evaluate `f(y)` and return one cut per scenario. `y` replaces
//! the center (a serious step) when it realizes enough of the decrease the
//! model predicted; otherwise the cuts only refine the model (a null step).

use std::time::Instant;

use log::{debug, info};

use crate::config::DecompositionConfig;
use crate::error::{DecompositionError, Result};
use crate::linalg::kernels::{dot, fill_zero};
use crate::master::{Cut, CutKind, RegularizedMaster};
use crate::problem::{LinearProgram, RowSense, TwoStageProblem};
use crate::scenario::{Scenario, ScenarioSet};
use crate::subproblem::{DenseSimplex, RecourseSolver, SolveStatus, SubproblemManager};

/// Why the outer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionStatus {
    /// The predicted decrease fell below tolerance.
    Optimal,
    IterationLimit,
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct DecompositionResult {
    pub status: DecompositionStatus,
    /// Final center.
    pub solution: Vec<f64>,
    /// `c·x + Σ p_s Q_s(x)` at the final center.
    pub objective: f64,
    /// Master solves in this call.
    pub iterations: usize,
    pub serious_steps: usize,
    pub null_steps: usize,
    /// Last predicted decrease `f(x) - f̂(y)`.
    pub predicted_decrease: f64,
    /// Penalty at exit.
    pub penalty: f64,
    /// Simplex iterations spent on recourse problems so far.
    pub subproblem_iterations: usize,
}

/// First feasible point with its cuts.
struct Center {
    point: Vec<f64>,
    expected_recourse: f64,
    cuts: Vec<Cut>,
}

pub struct RegularizedDecomposition<S: RecourseSolver + Clone = DenseSimplex> {
    problem: TwoStageProblem,
    config: DecompositionConfig,
    manager: SubproblemManager<S>,
    master: Option<RegularizedMaster>,
    center: Vec<f64>,
    center_value: f64,
    penalty: f64,
}

impl RegularizedDecomposition<DenseSimplex> {
    /// Decomposition with the built-in dense simplex for recourse problems.
    pub fn new(
        problem: TwoStageProblem,
        scenarios: ScenarioSet,
        config: DecompositionConfig,
    ) -> Result<Self> {
        let solver = DenseSimplex::new(config.simplex.clone());
        Self::with_solver(problem, scenarios, config, solver)
    }
}

impl<S: RecourseSolver + Clone> RegularizedDecomposition<S> {
    pub fn with_solver(
        problem: TwoStageProblem,
        scenarios: ScenarioSet,
        config: DecompositionConfig,
        solver: S,
    ) -> Result<Self> {
        problem.validate()?;
        scenarios.validate(&problem.recourse, problem.first_stage_len())?;
        if !(config.initial_penalty > 0.0
            && config.min_penalty > 0.0
            && config.min_penalty <= config.max_penalty)
        {
            return Err(DecompositionError::invalid_problem(format!(
                "penalty schedule {} in [{}, {}] is not positive",
                config.initial_penalty, config.min_penalty, config.max_penalty
            )));
        }
        let manager =
            SubproblemManager::new(&problem, scenarios, config.restart, config.ordering, solver);
        let penalty = config
            .initial_penalty
            .clamp(config.min_penalty, config.max_penalty);
        Ok(Self {
            problem,
            config,
            manager,
            master: None,
            center: Vec::new(),
            center_value: f64::INFINITY,
            penalty,
        })
    }

    pub fn problem(&self) -> &TwoStageProblem {
        &self.problem
    }

    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    pub fn manager(&self) -> &SubproblemManager<S> {
        &self.manager
    }

    /// The master, once the first center is known.
    pub fn master(&self) -> Option<&RegularizedMaster> {
        self.master.as_ref()
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    /// Runs the outer loop from the current center until the predicted
    /// decrease vanishes or a budget runs out.
    pub fn solve(&mut self) -> Result<DecompositionResult> {
        let start = Instant::now();
        if self.master.is_none() {
            self.initialize()?;
        }

        let mut iterations = 0;
        let mut serious_steps = 0;
        let mut null_steps = 0;
        let mut predicted_decrease = f64::INFINITY;
        let status = loop {
            if let Some(limit) = self.config.time_limit {
                if start.elapsed() >= limit {
                    break DecompositionStatus::TimeLimit;
                }
            }
            if iterations >= self.config.max_iterations {
                break DecompositionStatus::IterationLimit;
            }
            iterations += 1;

            let Some(master) = self.master.as_mut() else {
                return Err(DecompositionError::invalid_problem("master not initialized"));
            };
            master.set_penalty(self.penalty);
            let solution = master.solve()?;
            predicted_decrease = self.center_value - solution.model_value;
            if predicted_decrease <= self.config.optimality_tolerance * (1.0 + self.center_value.abs()) {
                break DecompositionStatus::Optimal;
            }

            let trial = solution.trial;
            let pass = self.manager.solve_pass(&trial, true)?;
            let trial_value = if pass.feasible {
                dot(&self.problem.first_stage.objective, &trial) + pass.expected_recourse
            } else {
                f64::INFINITY
            };

            let gamma = self.config.descent_fraction;
            let serious = pass.feasible && trial_value <= self.center_value - gamma * predicted_decrease;
            if serious {
                if trial_value < self.center_value - (1.0 - gamma) * predicted_decrease {
                    self.penalty = (self.penalty / 2.0).max(self.config.min_penalty);
                }
                master.serious_step(trial.clone());
                self.center = trial;
                self.center_value = trial_value;
                serious_steps += 1;
            } else {
                if trial_value > self.center_value {
                    self.penalty = (self.penalty * 2.0).min(self.config.max_penalty);
                }
                master.null_step();
                null_steps += 1;
            }
            master.add_cuts(pass.cuts)?;

            info!(
                "iteration {}: {} step, f(x) = {:.8e}, predicted decrease {:.3e}, M = {:.3e}",
                iterations,
                if serious { "serious" } else { "null" },
                self.center_value,
                predicted_decrease,
                self.penalty
            );
        };

        info!(
            "stopped ({:?}) after {} iterations: f(x) = {:.8e}",
            status, iterations, self.center_value
        );
        Ok(DecompositionResult {
            status,
            solution: self.center.clone(),
            objective: self.center_value,
            iterations,
            serious_steps,
            null_steps,
            predicted_decrease,
            penalty: self.penalty,
            subproblem_iterations: self.manager.total_iterations(),
        })
    }

    /// Adds scenarios to the model. An existing master gains their blocks and
    /// the center is re-evaluated, moving to a new feasible point if the new
    /// scenarios have no recourse at the old one.
    pub fn add_scenarios(&mut self, scenarios: Vec<Scenario>) -> Result<()> {
        if scenarios.is_empty() {
            return Ok(());
        }
        ScenarioSet::new(scenarios.clone())
            .validate(&self.problem.recourse, self.problem.first_stage_len())?;
        let added = scenarios.len();
        self.manager.add_scenarios(scenarios);
        debug!(
            "added {} scenario(s), {} in total",
            added,
            self.manager.num_scenarios()
        );

        if self.master.is_none() {
            return Ok(());
        }
        let pass = self.manager.solve_pass(&self.center, true)?;
        let (center, expected_recourse, cuts) = if pass.feasible {
            (self.center.clone(), pass.expected_recourse, pass.cuts)
        } else {
            let mut cuts = pass.cuts;
            let found = self.find_center()?;
            cuts.extend(found.cuts);
            (found.point, found.expected_recourse, cuts)
        };
        let Some(master) = self.master.as_mut() else {
            return Ok(());
        };
        master.add_blocks(self.manager.weights());
        if center != self.center {
            master.serious_step(center.clone());
        }
        master.add_cuts(cuts)?;
        self.center_value = dot(&self.problem.first_stage.objective, &center) + expected_recourse;
        self.center = center;
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let found = self.find_center()?;
        let mut master = RegularizedMaster::new(
            &self.problem.first_stage,
            self.manager.weights(),
            found.point.clone(),
            self.penalty,
            self.config.master.clone(),
        )?;
        master.add_cuts(found.cuts)?;
        self.center_value =
            dot(&self.problem.first_stage.objective, &found.point) + found.expected_recourse;
        self.center = found.point;
        self.master = Some(master);
        info!("initial center: f(x) = {:.8e}", self.center_value);
        Ok(())
    }

    /// Minimizes `c·y` over the first stage, adding feasibility cuts as rows
    /// until every scenario has recourse at the minimizer.
    fn find_center(&mut self) -> Result<Center> {
        let mut lp = self.problem.first_stage.clone();
        let mut cuts = Vec::new();
        let rounds = self.config.max_feasibility_rounds;
        for round in 0..=rounds {
            let point = self.solve_first_stage(&lp)?;
            let pass = self.manager.solve_pass(&point, true)?;
            if pass.feasible {
                cuts.extend(pass.cuts);
                return Ok(Center {
                    point,
                    expected_recourse: pass.expected_recourse,
                    cuts,
                });
            }
            if round == rounds {
                break;
            }
            for cut in pass.cuts {
                if cut.kind == CutKind::Feasibility {
                    lp.constraints.push(cut.gradient.clone());
                    lp.senses.push(RowSense::LessEqual);
                    lp.rhs.push(-cut.constant);
                }
                cuts.push(cut);
            }
            debug!(
                "feasibility round {}: first stage now has {} rows",
                round + 1,
                lp.num_rows()
            );
        }
        Err(DecompositionError::NoFeasibleCenter { rounds })
    }

    /// An optimal (or, when `c·y` is unbounded below, any) first-stage point.
    fn solve_first_stage(&self, lp: &LinearProgram) -> Result<Vec<f64>> {
        let mut solver = self.manager.solver().clone();
        solver.initialize(lp)?;
        let mut status = solver.solve();
        if status == SolveStatus::Unbounded {
            debug!("first-stage cost is unbounded, looking for any feasible point");
            let mut flat = lp.clone();
            fill_zero(&mut flat.objective);
            solver.initialize(&flat)?;
            status = solver.solve();
        }
        match status {
            SolveStatus::Optimal => Ok(solver.primal().to_vec()),
            SolveStatus::Infeasible => Err(DecompositionError::InfeasibleFirstStage),
            SolveStatus::Unbounded | SolveStatus::Unknown => {
                Err(DecompositionError::FirstStageSolverFailure {
                    reason: format!("ended with {:?} after {} iterations", status, solver.iterations()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests;
