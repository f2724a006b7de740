//! In-memory model of a two-stage stochastic linear program.

use crate::error::{DecompositionError, Result};
use crate::scenario::ScenarioSet;

/// Sense of a constraint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowSense {
    LessEqual,
    GreaterEqual,
    Equal,
}

impl RowSense {
    /// Bounds `[lo, hi]` of the row slack `s` in `a·x + s = b`.
    pub fn slack_bounds(self) -> (f64, f64) {
        match self {
            RowSense::LessEqual => (0.0, f64::INFINITY),
            RowSense::GreaterEqual => (f64::NEG_INFINITY, 0.0),
            RowSense::Equal => (0.0, 0.0),
        }
    }

    /// Signed violation of `activity {sense} rhs`; positive when violated.
    pub fn violation(self, activity: f64, rhs: f64) -> f64 {
        match self {
            RowSense::LessEqual => activity - rhs,
            RowSense::GreaterEqual => rhs - activity,
            RowSense::Equal => (activity - rhs).abs(),
        }
    }
}

/// A linear program: minimize `objectiveᵀx` subject to
/// `constraints[i]·x {senses[i]} rhs[i]` and `lower <= x <= upper`.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    /// Cost vector `c`.
    pub objective: Vec<f64>,
    /// Rows of the constraint matrix.
    pub constraints: Vec<Vec<f64>>,
    /// Row senses.
    pub senses: Vec<RowSense>,
    /// Right-hand side `b`.
    pub rhs: Vec<f64>,
    /// Column lower bounds (may be `-inf`).
    pub lower: Vec<f64>,
    /// Column upper bounds (may be `+inf`).
    pub upper: Vec<f64>,
}

impl LinearProgram {
    /// New program with nonnegative columns.
    pub fn new(
        objective: Vec<f64>,
        constraints: Vec<Vec<f64>>,
        senses: Vec<RowSense>,
        rhs: Vec<f64>,
    ) -> Self {
        let n = objective.len();
        Self {
            objective,
            constraints,
            senses,
            rhs,
            lower: vec![0.0; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn with_bounds(mut self, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn num_cols(&self) -> usize {
        self.objective.len()
    }

    pub fn num_rows(&self) -> usize {
        self.constraints.len()
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.objective.iter().zip(x.iter()).map(|(&c, &v)| c * v).sum()
    }

    /// Largest row or bound violation of `x`.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let rows = self
            .constraints
            .iter()
            .zip(self.senses.iter().zip(self.rhs.iter()))
            .map(|(row, (&sense, &b))| {
                let activity: f64 = row.iter().zip(x.iter()).map(|(&a, &v)| a * v).sum();
                sense.violation(activity, b)
            })
            .fold(0.0_f64, f64::max);
        let bounds = x
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&v, (&lo, &hi))| (lo - v).max(v - hi))
            .fold(0.0_f64, f64::max);
        rows.max(bounds)
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.num_cols();
        let m = self.num_rows();
        if self.senses.len() != m || self.rhs.len() != m {
            return Err(DecompositionError::invalid_problem(format!(
                "{} rows but {} senses and {} right-hand sides",
                m,
                self.senses.len(),
                self.rhs.len()
            )));
        }
        if let Some(i) = self.constraints.iter().position(|row| row.len() != n) {
            return Err(DecompositionError::invalid_problem(format!(
                "row {} has {} coefficients, expected {}",
                i,
                self.constraints[i].len(),
                n
            )));
        }
        validate_bounds(&self.lower, &self.upper, n)
    }
}

fn validate_bounds(lower: &[f64], upper: &[f64], n: usize) -> Result<()> {
    if lower.len() != n || upper.len() != n {
        return Err(DecompositionError::invalid_problem(format!(
            "bounds have lengths {}/{}, expected {}",
            lower.len(),
            upper.len(),
            n
        )));
    }
    for (j, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
        if lo.is_nan() || hi.is_nan() || lo > hi || lo == f64::INFINITY || hi == f64::NEG_INFINITY {
            return Err(DecompositionError::invalid_problem(format!(
                "column {} has bounds [{}, {}]",
                j, lo, hi
            )));
        }
    }
    Ok(())
}

/// Base second-stage LP: minimize `cost·w` subject to
/// `matrix·w {senses} rhs - technology·y`, `lower <= w <= upper`.
#[derive(Debug, Clone)]
pub struct RecourseTemplate {
    /// Recourse costs `q`.
    pub cost: Vec<f64>,
    /// Recourse matrix `W` (rows × recourse columns).
    pub matrix: Vec<Vec<f64>>,
    /// Technology matrix `T` (rows × first-stage columns).
    pub technology: Vec<Vec<f64>>,
    /// Right-hand side `h`.
    pub rhs: Vec<f64>,
    pub senses: Vec<RowSense>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl RecourseTemplate {
    pub fn num_cols(&self) -> usize {
        self.cost.len()
    }

    pub fn num_rows(&self) -> usize {
        self.matrix.len()
    }

    /// `T·y`.
    pub fn technology_times(&self, y: &[f64]) -> Vec<f64> {
        self.technology
            .iter()
            .map(|row| row.iter().zip(y.iter()).map(|(&t, &v)| t * v).sum())
            .collect()
    }

    /// The concrete LP for a first-stage decision `y`.
    pub fn instantiate(&self, y: &[f64]) -> LinearProgram {
        let ty = self.technology_times(y);
        LinearProgram {
            objective: self.cost.clone(),
            constraints: self.matrix.clone(),
            senses: self.senses.clone(),
            rhs: self.rhs.iter().zip(ty.iter()).map(|(&h, &t)| h - t).collect(),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
        }
    }

    pub fn validate(&self, first_stage_len: usize) -> Result<()> {
        let m = self.num_rows();
        let n = self.num_cols();
        if self.technology.len() != m || self.rhs.len() != m || self.senses.len() != m {
            return Err(DecompositionError::invalid_problem(format!(
                "recourse has {} rows but technology/rhs/senses lengths {}/{}/{}",
                m,
                self.technology.len(),
                self.rhs.len(),
                self.senses.len()
            )));
        }
        if self.matrix.iter().any(|row| row.len() != n) {
            return Err(DecompositionError::invalid_problem(
                "recourse matrix rows differ in length from the cost vector",
            ));
        }
        if self.technology.iter().any(|row| row.len() != first_stage_len) {
            return Err(DecompositionError::invalid_problem(
                "technology rows must span the first-stage columns",
            ));
        }
        validate_bounds(&self.lower, &self.upper, n)
    }
}

/// A two-stage stochastic LP: first stage `min c·y + E[Q(y, ξ)]` over the
/// first-stage program, recourse given by the template and scenario deltas.
#[derive(Debug, Clone)]
pub struct TwoStageProblem {
    pub first_stage: LinearProgram,
    pub recourse: RecourseTemplate,
}

impl TwoStageProblem {
    pub fn new(first_stage: LinearProgram, recourse: RecourseTemplate) -> Self {
        Self {
            first_stage,
            recourse,
        }
    }

    pub fn first_stage_len(&self) -> usize {
        self.first_stage.num_cols()
    }

    pub fn validate(&self) -> Result<()> {
        self.first_stage.validate()?;
        self.recourse.validate(self.first_stage_len())
    }

    /// The extensive form over all scenarios, columns `[y, w_0, w_1, ...]`.
    pub fn deterministic_equivalent(&self, scenarios: &ScenarioSet) -> LinearProgram {
        let n1 = self.first_stage_len();
        let n2 = self.recourse.num_cols();
        let total = n1 + n2 * scenarios.len();
        let weights = scenarios.weights();

        let mut objective = self.first_stage.objective.clone();
        let mut lower = self.first_stage.lower.clone();
        let mut upper = self.first_stage.upper.clone();
        let mut constraints: Vec<Vec<f64>> = self
            .first_stage
            .constraints
            .iter()
            .map(|row| {
                let mut full = row.clone();
                full.resize(total, 0.0);
                full
            })
            .collect();
        let mut senses = self.first_stage.senses.clone();
        let mut rhs = self.first_stage.rhs.clone();

        for (s, (scenario, &p)) in scenarios.iter().zip(weights.iter()).enumerate() {
            let data = scenario.apply(&self.recourse);
            objective.extend(data.cost.iter().map(|&q| p * q));
            lower.extend_from_slice(&data.lower);
            upper.extend_from_slice(&data.upper);
            let offset = n1 + s * n2;
            for i in 0..data.num_rows() {
                let mut full = vec![0.0; total];
                full[..n1].copy_from_slice(&data.technology[i]);
                full[offset..offset + n2].copy_from_slice(&data.matrix[i]);
                constraints.push(full);
                senses.push(data.senses[i]);
                rhs.push(data.rhs[i]);
            }
        }

        LinearProgram {
            objective,
            constraints,
            senses,
            rhs,
            lower,
            upper,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_ragged_rows() {
        let lp = LinearProgram::new(
            vec![1.0, 1.0],
            vec![vec![1.0]],
            vec![RowSense::LessEqual],
            vec![1.0],
        );
        assert!(matches!(
            lp.validate(),
            Err(DecompositionError::InvalidProblem(_))
        ));
    }

    #[test]
    fn test_validate_rejects_crossed_bounds() {
        let lp = LinearProgram::new(vec![1.0], vec![], vec![], vec![])
            .with_bounds(vec![2.0], vec![1.0]);
        assert!(lp.validate().is_err());
    }

    #[test]
    fn test_violation_by_sense() {
        assert_eq!(RowSense::LessEqual.violation(3.0, 2.0), 1.0);
        assert_eq!(RowSense::GreaterEqual.violation(3.0, 2.0), -1.0);
        assert_eq!(RowSense::Equal.violation(1.0, 2.0), 1.0);
    }

    #[test]
    fn test_instantiate_moves_technology_to_rhs() {
        let recourse = RecourseTemplate {
            cost: vec![1.0],
            matrix: vec![vec![1.0]],
            technology: vec![vec![2.0, -1.0]],
            rhs: vec![5.0],
            senses: vec![RowSense::GreaterEqual],
            lower: vec![0.0],
            upper: vec![f64::INFINITY],
        };
        assert!(recourse.validate(2).is_ok());
        let lp = recourse.instantiate(&[1.0, 3.0]);
        assert_eq!(lp.rhs, vec![5.0 - (2.0 - 3.0)]);
    }
}
