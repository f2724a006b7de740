//! Scenarios as sparse modifications of the base recourse problem.

pub mod tree_order;

pub use tree_order::{straight_cost, ScenarioTree};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{DecompositionError, Result};
use crate::problem::RecourseTemplate;

/// Which part of the recourse data a delta replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeltaKind {
    /// Right-hand side entry `h[row]`.
    Rhs,
    /// Matrix entry; `col` below the first-stage length addresses `T`,
    /// otherwise `W` at `col - first_stage_len`.
    Matrix,
    /// Recourse cost `q[col]`.
    Cost,
}

/// One replaced entry of the base data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub kind: DeltaKind,
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Delta {
    pub fn rhs(row: usize, value: f64) -> Self {
        Self {
            kind: DeltaKind::Rhs,
            row,
            col: 0,
            value,
        }
    }

    pub fn matrix(row: usize, col: usize, value: f64) -> Self {
        Self {
            kind: DeltaKind::Matrix,
            row,
            col,
            value,
        }
    }

    pub fn cost(col: usize, value: f64) -> Self {
        Self {
            kind: DeltaKind::Cost,
            row: 0,
            col,
            value,
        }
    }

    fn key(&self) -> (DeltaKind, usize, usize) {
        (self.kind, self.row, self.col)
    }
}

/// A realization of the random data: deltas over the base recourse problem
/// and the probability of the realization.
#[derive(Debug, Clone)]
pub struct Scenario {
    probability: f64,
    deltas: Vec<Delta>,
    resolved: BTreeMap<(DeltaKind, usize, usize), f64>,
}

impl Scenario {
    pub fn new(probability: f64, deltas: Vec<Delta>) -> Self {
        // Later deltas for the same entry win.
        let resolved = deltas.iter().map(|d| (d.key(), d.value)).collect();
        Self {
            probability,
            deltas,
            resolved,
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Final value of every touched entry, in `(kind, row, col)` order.
    pub fn resolved(&self) -> impl Iterator<Item = Delta> + '_ {
        self.resolved
            .iter()
            .map(|(&(kind, row, col), &value)| Delta {
                kind,
                row,
                col,
                value,
            })
    }

    /// Base data with this scenario's deltas applied.
    pub fn apply(&self, base: &RecourseTemplate) -> RecourseTemplate {
        let mut data = base.clone();
        let n1 = data.technology.first().map_or(0, Vec::len);
        for d in self.resolved() {
            match d.kind {
                DeltaKind::Rhs => data.rhs[d.row] = d.value,
                DeltaKind::Cost => data.cost[d.col] = d.value,
                DeltaKind::Matrix if d.col < n1 => data.technology[d.row][d.col] = d.value,
                DeltaKind::Matrix => data.matrix[d.row][d.col - n1] = d.value,
            }
        }
        data
    }

    /// True when a delta touches the technology matrix.
    pub fn modifies_technology(&self, first_stage_len: usize) -> bool {
        self.resolved
            .keys()
            .any(|&(kind, _, col)| kind == DeltaKind::Matrix && col < first_stage_len)
    }

    fn validate(&self, index: usize, base: &RecourseTemplate, first_stage_len: usize) -> Result<()> {
        if !self.probability.is_finite() || self.probability < 0.0 {
            return Err(DecompositionError::invalid_problem(format!(
                "scenario {} has probability {}",
                index, self.probability
            )));
        }
        let m = base.num_rows();
        let n2 = base.num_cols();
        for d in &self.deltas {
            let in_range = match d.kind {
                DeltaKind::Rhs => d.row < m,
                DeltaKind::Cost => d.col < n2,
                DeltaKind::Matrix => d.row < m && d.col < first_stage_len + n2,
            };
            if !in_range || !d.value.is_finite() {
                return Err(DecompositionError::invalid_problem(format!(
                    "scenario {} has an out-of-range delta {:?}",
                    index, d
                )));
            }
        }
        Ok(())
    }
}

/// Ordered collection of scenarios; the index is the scenario id.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
}

impl ScenarioSet {
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    pub fn push(&mut self, scenario: Scenario) {
        self.scenarios.push(scenario);
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn get(&self, index: usize) -> &Scenario {
        &self.scenarios[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scenario> {
        self.scenarios.iter()
    }

    /// Probabilities normalized to sum to one.
    pub fn weights(&self) -> Vec<f64> {
        let total: f64 = self.scenarios.iter().map(|s| s.probability).sum();
        self.scenarios
            .iter()
            .map(|s| s.probability / total)
            .collect()
    }

    /// Discrete distance: the number of entries whose final values differ
    /// between the two scenarios, counting entries set by only one of them.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        let a = &self.scenarios[i].resolved;
        let b = &self.scenarios[j].resolved;
        let mut ia = a.iter().peekable();
        let mut ib = b.iter().peekable();
        let mut count = 0usize;
        loop {
            match (ia.peek(), ib.peek()) {
                (Some((ka, va)), Some((kb, vb))) => match ka.cmp(kb) {
                    Ordering::Less => {
                        count += 1;
                        ia.next();
                    }
                    Ordering::Greater => {
                        count += 1;
                        ib.next();
                    }
                    Ordering::Equal => {
                        if va != vb {
                            count += 1;
                        }
                        ia.next();
                        ib.next();
                    }
                },
                (Some(_), None) => {
                    count += 1;
                    ia.next();
                }
                (None, Some(_)) => {
                    count += 1;
                    ib.next();
                }
                (None, None) => break,
            }
        }
        count as f64
    }

    pub fn validate(&self, base: &RecourseTemplate, first_stage_len: usize) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(DecompositionError::invalid_problem("no scenarios"));
        }
        for (i, s) in self.scenarios.iter().enumerate() {
            s.validate(i, base, first_stage_len)?;
        }
        let total: f64 = self.scenarios.iter().map(|s| s.probability).sum();
        if total.is_nan() || total <= 0.0 {
            return Err(DecompositionError::invalid_problem(
                "scenario probabilities sum to zero",
            ));
        }
        Ok(())
    }
}
