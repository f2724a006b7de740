use std::time::Duration;

use approx::assert_abs_diff_eq;

use crate::config::{DecompositionConfig, RestartStrategy, SimplexConfig, TreeOrdering};
use crate::decomposition::{DecompositionStatus, RegularizedDecomposition};
use crate::error::DecompositionError;
use crate::problem::{LinearProgram, RecourseTemplate, RowSense, TwoStageProblem};
use crate::scenario::{Delta, Scenario, ScenarioSet};
use crate::subproblem::{DenseSimplex, DualCertificate, RecourseSolver, SolveStatus};

/// `min y + E[q·w]` with `w >= d - y`, `0 <= y <= 10`, `0 <= w <= w_max`.
fn shortage_problem(q: f64, w_max: f64) -> TwoStageProblem {
    let first = LinearProgram::new(vec![1.0], vec![], vec![], vec![])
        .with_bounds(vec![0.0], vec![10.0]);
    let recourse = RecourseTemplate {
        cost: vec![q],
        matrix: vec![vec![1.0]],
        technology: vec![vec![1.0]],
        rhs: vec![5.0],
        senses: vec![RowSense::GreaterEqual],
        lower: vec![0.0],
        upper: vec![w_max],
    };
    TwoStageProblem::new(first, recourse)
}

fn demands(values: &[f64]) -> ScenarioSet {
    ScenarioSet::new(
        values
            .iter()
            .map(|&d| Scenario::new(1.0, vec![Delta::rhs(0, d)]))
            .collect(),
    )
}

/// Two products with a shared capacity and a substitute recourse column.
fn capacity_problem() -> (TwoStageProblem, ScenarioSet) {
    let first = LinearProgram::new(
        vec![1.0, 1.0],
        vec![vec![1.0, 1.0]],
        vec![RowSense::LessEqual],
        vec![15.0],
    )
    .with_bounds(vec![0.0, 0.0], vec![20.0, 20.0]);
    let recourse = RecourseTemplate {
        cost: vec![4.0, 6.0, 0.5],
        matrix: vec![vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 1.0]],
        technology: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        rhs: vec![8.0, 3.0],
        senses: vec![RowSense::GreaterEqual, RowSense::GreaterEqual],
        lower: vec![0.0, 0.0, 0.0],
        upper: vec![f64::INFINITY, f64::INFINITY, 2.0],
    };
    let scenarios = ScenarioSet::new(vec![
        Scenario::new(0.2, vec![Delta::rhs(0, 4.0)]),
        Scenario::new(0.1, vec![Delta::rhs(0, 12.0), Delta::rhs(1, 9.0)]),
        Scenario::new(0.15, vec![Delta::rhs(1, 9.0)]),
        Scenario::new(0.25, vec![Delta::rhs(0, 12.0), Delta::cost(2, 2.0)]),
        Scenario::new(0.2, vec![Delta::matrix(0, 0, 0.5)]),
        Scenario::new(0.1, vec![Delta::rhs(0, 4.0), Delta::rhs(1, 6.0), Delta::matrix(1, 2, 1.5)]),
    ]);
    (TwoStageProblem::new(first, recourse), scenarios)
}

fn extensive_form_value(problem: &TwoStageProblem, scenarios: &ScenarioSet) -> f64 {
    let lp = problem.deterministic_equivalent(scenarios);
    let mut solver = DenseSimplex::new(SimplexConfig::default());
    solver.initialize(&lp).unwrap();
    assert_eq!(solver.solve(), SolveStatus::Optimal);
    solver.objective_value()
}

#[test]
fn test_identical_scenarios_match_extensive_form() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let scenarios = ScenarioSet::new(vec![Scenario::new(0.5, vec![]), Scenario::new(0.5, vec![])]);
    let expected = extensive_form_value(&problem, &scenarios);

    let mut solver =
        RegularizedDecomposition::new(problem, scenarios, DecompositionConfig::default()).unwrap();
    let result = solver.solve().unwrap();

    assert_eq!(result.status, DecompositionStatus::Optimal);
    assert!(result.iterations <= 10, "took {} iterations", result.iterations);
    assert_abs_diff_eq!(result.objective, expected, epsilon = 1e-6);
    assert_abs_diff_eq!(result.objective, 5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(result.solution[0], 5.0, epsilon = 1e-6);
    assert!(result.serious_steps > 0);
}

#[test]
fn test_feasibility_rounds_find_a_center() {
    // Recourse covers at most 4 units of shortage, so y >= d - 4.
    let problem = shortage_problem(3.0, 4.0);
    let scenarios = demands(&[2.0, 5.0, 7.0]);
    let expected = extensive_form_value(&problem, &scenarios);

    let mut solver =
        RegularizedDecomposition::new(problem, scenarios, DecompositionConfig::default()).unwrap();
    let result = solver.solve().unwrap();

    assert_eq!(result.status, DecompositionStatus::Optimal);
    assert_abs_diff_eq!(expected, 7.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.objective, expected, epsilon = 1e-6);
    // Any point of [5, 7] is optimal.
    assert!(result.solution[0] >= 5.0 - 1e-6 && result.solution[0] <= 7.0 + 1e-6);
    let master = solver.master().unwrap();
    assert!(master
        .pool()
        .iter()
        .any(|c| c.kind == crate::master::CutKind::Feasibility));
}

#[test]
fn test_feasibility_round_budget() {
    let problem = shortage_problem(3.0, 4.0);
    let config = DecompositionConfig {
        max_feasibility_rounds: 0,
        ..DecompositionConfig::default()
    };
    let mut solver = RegularizedDecomposition::new(problem, demands(&[2.0, 7.0]), config).unwrap();
    assert!(matches!(
        solver.solve(),
        Err(DecompositionError::NoFeasibleCenter { rounds: 0 })
    ));
}

#[test]
fn test_restart_strategies_agree() {
    let (problem, scenarios) = capacity_problem();
    let expected = extensive_form_value(&problem, &scenarios);

    for ordering in [TreeOrdering::Exact, TreeOrdering::Heuristic, TreeOrdering::Generation] {
        for restart in [RestartStrategy::SelfState, RestartStrategy::Tree, RestartStrategy::Random] {
            let config = DecompositionConfig::default()
                .with_restart(restart)
                .with_ordering(ordering)
                .with_max_iterations(500)
                .with_optimality_tolerance(1e-10);
            let mut solver =
                RegularizedDecomposition::new(problem.clone(), scenarios.clone(), config).unwrap();
            let result = solver.solve().unwrap();
            assert_eq!(result.status, DecompositionStatus::Optimal, "{:?}/{:?}", restart, ordering);
            assert_abs_diff_eq!(result.objective, expected, epsilon = 1e-5);
            assert!(solver.problem().first_stage.max_violation(&result.solution) <= 1e-9);
        }
    }
}

#[test]
fn test_zero_time_limit_stops_at_the_first_center() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let config = DecompositionConfig::default().with_time_limit(Duration::ZERO);
    let mut solver = RegularizedDecomposition::new(problem, demands(&[5.0]), config).unwrap();
    let result = solver.solve().unwrap();

    assert_eq!(result.status, DecompositionStatus::TimeLimit);
    assert_eq!(result.iterations, 0);
    // The first center minimizes c·y alone.
    assert_abs_diff_eq!(result.solution[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(result.objective, 10.0, epsilon = 1e-9);
}

#[test]
fn test_iteration_limit() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let config = DecompositionConfig::default().with_max_iterations(1);
    let mut solver = RegularizedDecomposition::new(problem, demands(&[5.0, 5.0]), config).unwrap();
    let result = solver.solve().unwrap();

    assert_eq!(result.status, DecompositionStatus::IterationLimit);
    assert_eq!(result.iterations, 1);
    assert!(result.objective < 10.0);

    // Another call picks up from the current center.
    let again = solver.solve().unwrap();
    assert_eq!(again.status, DecompositionStatus::IterationLimit);
    assert!(again.objective <= result.objective);
}

#[test]
fn test_scenarios_added_after_a_solve() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let mut solver =
        RegularizedDecomposition::new(problem.clone(), demands(&[5.0]), DecompositionConfig::default())
            .unwrap();
    let first = solver.solve().unwrap();
    assert_abs_diff_eq!(first.objective, 5.0, epsilon = 1e-6);

    solver
        .add_scenarios(vec![Scenario::new(1.0, vec![Delta::rhs(0, 9.0)])])
        .unwrap();
    assert_eq!(solver.manager().num_scenarios(), 2);
    assert_eq!(solver.master().unwrap().objective_block(), 2);

    let second = solver.solve().unwrap();
    let expected = extensive_form_value(&problem, &demands(&[5.0, 9.0]));
    assert_eq!(second.status, DecompositionStatus::Optimal);
    assert_abs_diff_eq!(expected, 9.0, epsilon = 1e-9);
    assert_abs_diff_eq!(second.objective, expected, epsilon = 1e-6);
}

#[test]
fn test_added_scenario_without_recourse_moves_the_center() {
    let problem = shortage_problem(3.0, 4.0);
    let mut solver =
        RegularizedDecomposition::new(problem.clone(), demands(&[2.0]), DecompositionConfig::default())
            .unwrap();
    solver.solve().unwrap();

    // Demand 8 needs y >= 4, far from the current center.
    solver
        .add_scenarios(vec![Scenario::new(1.0, vec![Delta::rhs(0, 8.0)])])
        .unwrap();
    assert!(solver.center()[0] >= 4.0 - 1e-9);

    let result = solver.solve().unwrap();
    let expected = extensive_form_value(&problem, &demands(&[2.0, 8.0]));
    assert_abs_diff_eq!(result.objective, expected, epsilon = 1e-6);
}

#[test]
fn test_scenarios_added_before_the_first_solve() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let mut solver =
        RegularizedDecomposition::new(problem.clone(), demands(&[5.0]), DecompositionConfig::default())
            .unwrap();
    solver
        .add_scenarios(vec![Scenario::new(1.0, vec![Delta::rhs(0, 9.0)])])
        .unwrap();
    assert!(solver.master().is_none());

    let result = solver.solve().unwrap();
    assert_abs_diff_eq!(result.objective, 9.0, epsilon = 1e-6);
}

#[test]
fn test_unbounded_recourse_is_fatal() {
    let problem = shortage_problem(-1.0, f64::INFINITY);
    let mut solver =
        RegularizedDecomposition::new(problem, demands(&[5.0]), DecompositionConfig::default())
            .unwrap();
    assert!(matches!(
        solver.solve(),
        Err(DecompositionError::UnboundedRecourse { scenario: 0 })
    ));
}

#[test]
fn test_infeasible_first_stage() {
    let mut problem = shortage_problem(2.0, f64::INFINITY);
    problem.first_stage.constraints.push(vec![1.0]);
    problem.first_stage.senses.push(RowSense::GreaterEqual);
    problem.first_stage.rhs.push(20.0);
    let mut solver =
        RegularizedDecomposition::new(problem, demands(&[5.0]), DecompositionConfig::default())
            .unwrap();
    assert!(matches!(
        solver.solve(),
        Err(DecompositionError::InfeasibleFirstStage)
    ));
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    assert!(matches!(
        RegularizedDecomposition::new(
            problem.clone(),
            ScenarioSet::new(vec![]),
            DecompositionConfig::default()
        ),
        Err(DecompositionError::InvalidProblem(_))
    ));
    assert!(matches!(
        RegularizedDecomposition::new(
            problem,
            demands(&[5.0]),
            DecompositionConfig::default().with_initial_penalty(0.0)
        ),
        Err(DecompositionError::InvalidProblem(_))
    ));
}

/// Recourse solver that never reaches a verdict.
#[derive(Debug, Clone, Default)]
struct StalledSolver {
    primal: Vec<f64>,
}

impl RecourseSolver for StalledSolver {
    type Snapshot = ();

    fn initialize(&mut self, lp: &LinearProgram) -> crate::error::Result<()> {
        self.primal = vec![0.0; lp.num_cols()];
        Ok(())
    }

    fn solve(&mut self) -> SolveStatus {
        SolveStatus::Unknown
    }

    fn restart_from(&mut self, _snapshot: &()) -> SolveStatus {
        SolveStatus::Unknown
    }

    fn restart(&mut self, _randomize: bool) -> SolveStatus {
        SolveStatus::Unknown
    }

    fn certificate(&self) -> Option<&DualCertificate> {
        None
    }

    fn snapshot(&self) -> Option<()> {
        None
    }

    fn primal(&self) -> &[f64] {
        &self.primal
    }

    fn objective_value(&self) -> f64 {
        f64::NAN
    }

    fn iterations(&self) -> usize {
        0
    }

    fn residual(&self) -> f64 {
        f64::INFINITY
    }
}

#[test]
fn test_first_stage_solver_failure_has_its_own_error() {
    let problem = shortage_problem(2.0, f64::INFINITY);
    let mut solver = RegularizedDecomposition::with_solver(
        problem,
        demands(&[5.0]),
        DecompositionConfig::default(),
        StalledSolver::default(),
    )
    .unwrap();
    let err = solver.solve().unwrap_err();
    assert!(matches!(err, DecompositionError::FirstStageSolverFailure { .. }));
    assert!(err.to_string().starts_with("first-stage solve failed"));
}

#[test]
fn test_unbounded_first_stage_cost_starts_from_a_feasible_point() {
    // min -y + E[2·max(0, y - 5)] with y >= 0 unbounded above.
    let first = LinearProgram::new(vec![-1.0], vec![], vec![], vec![]);
    let recourse = RecourseTemplate {
        cost: vec![2.0],
        matrix: vec![vec![1.0]],
        technology: vec![vec![-1.0]],
        rhs: vec![-5.0],
        senses: vec![RowSense::GreaterEqual],
        lower: vec![0.0],
        upper: vec![f64::INFINITY],
    };
    let problem = TwoStageProblem::new(first, recourse);
    let scenarios = ScenarioSet::new(vec![Scenario::new(1.0, vec![])]);
    let mut solver =
        RegularizedDecomposition::new(problem, scenarios, DecompositionConfig::default()).unwrap();
    let result = solver.solve().unwrap();

    assert_eq!(result.status, DecompositionStatus::Optimal);
    assert_abs_diff_eq!(result.solution[0], 5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(result.objective, -5.0, epsilon = 1e-6);
}
