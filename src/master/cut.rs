//! Cuts and the pool the master draws them from.

use crate::error::Result;
use crate::linalg::kernels::dot;
use crate::problem::RowSense;

/// Role of a cut in the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutKind {
    /// Affine minorant of a block's cost: `θ_block >= constant + gradient·y`.
    Optimality,

    /// `constant + gradient·y <= 0`, from an infeasible recourse problem.
    Feasibility,

    /// First-stage row, `<=` or `=` against zero.
    Row(RowSense),
}

/// Affine function `constant + gradient·y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    /// Scenario index, or the objective block for first-stage data.
    pub block: usize,
    pub kind: CutKind,
    pub constant: f64,
    pub gradient: Vec<f64>,
}

impl Cut {
    pub fn optimality(block: usize, constant: f64, gradient: Vec<f64>) -> Self {
        Self {
            block,
            kind: CutKind::Optimality,
            constant,
            gradient,
        }
    }

    pub fn feasibility(block: usize, constant: f64, gradient: Vec<f64>) -> Self {
        Self {
            block,
            kind: CutKind::Feasibility,
            constant,
            gradient,
        }
    }

    /// The row `coefficients·y {sense} rhs`; `>=` rows are negated.
    pub fn row(block: usize, coefficients: &[f64], sense: RowSense, rhs: f64) -> Self {
        let (kind, sign) = match sense {
            RowSense::LessEqual => (RowSense::LessEqual, 1.0),
            RowSense::GreaterEqual => (RowSense::LessEqual, -1.0),
            RowSense::Equal => (RowSense::Equal, 1.0),
        };
        Self {
            block,
            kind: CutKind::Row(kind),
            constant: -sign * rhs,
            gradient: coefficients.iter().map(|&a| sign * a).collect(),
        }
    }

    pub fn value(&self, y: &[f64]) -> f64 {
        self.constant + dot(&self.gradient, y)
    }

    /// True for cuts whose multiplier is sign-constrained.
    pub fn is_inequality(&self) -> bool {
        self.kind != CutKind::Row(RowSense::Equal)
    }

    /// True for the constraints of the master (everything but optimality cuts).
    pub fn is_constraint(&self) -> bool {
        self.kind != CutKind::Optimality
    }

    /// Amount by which `y` violates a constraint cut.
    pub fn violation(&self, y: &[f64]) -> f64 {
        let v = self.value(y);
        if self.is_inequality() {
            v
        } else {
            v.abs()
        }
    }

    fn is_duplicate(&self, other: &Cut) -> bool {
        const TOL: f64 = 1e-12;
        self.block == other.block
            && self.kind == other.kind
            && self.gradient.len() == other.gradient.len()
            && (self.constant - other.constant).abs() <= TOL * (1.0 + self.constant.abs())
            && self
                .gradient
                .iter()
                .zip(other.gradient.iter())
                .all(|(&a, &b)| (a - b).abs() <= TOL * (1.0 + a.abs()))
    }
}

/// A cut with pool metadata.
#[derive(Debug, Clone)]
pub struct PooledCut {
    pub cut: Cut,

    /// Multiplier of `value(y) <= 0` (or `= 0` for equality rows) from the
    /// last master solve, zero when inactive.
    pub weight: f64,

    /// Master solves since the cut was last basic or active.
    pub idle: usize,
}

/// Statistics for the cut pool.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CutPoolStats {
    /// Total cuts added.
    pub total_added: usize,

    /// Insertions rejected as duplicates.
    pub duplicates: usize,

    /// Total cuts aged out.
    pub total_removed: usize,

    /// Peak pool size.
    pub peak_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CutPool {
    cuts: Vec<PooledCut>,
    stats: CutPoolStats,
}

impl CutPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn get(&self, i: usize) -> &Cut {
        &self.cuts[i].cut
    }

    pub fn entry(&self, i: usize) -> &PooledCut {
        &self.cuts[i]
    }

    pub fn entry_mut(&mut self, i: usize) -> &mut PooledCut {
        &mut self.cuts[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cut> {
        self.cuts.iter().map(|p| &p.cut)
    }

    pub fn stats(&self) -> &CutPoolStats {
        &self.stats
    }

    /// Adds a cut unless an identical one is present. Returns its index, or
    /// `None` for a duplicate.
    pub fn insert(&mut self, cut: Cut) -> Result<Option<usize>> {
        if self.cuts.iter().any(|p| p.cut.is_duplicate(&cut)) {
            self.stats.duplicates += 1;
            return Ok(None);
        }
        self.cuts.try_reserve(1)?;
        self.cuts.push(PooledCut {
            cut,
            weight: 0.0,
            idle: 0,
        });
        self.stats.total_added += 1;
        self.stats.peak_size = self.stats.peak_size.max(self.cuts.len());
        Ok(Some(self.cuts.len() - 1))
    }

    /// Indices of the optimality cuts of `block`.
    pub fn block_cuts(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        self.cuts
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.cut.block == block && p.cut.kind == CutKind::Optimality)
            .map(|(i, _)| i)
    }

    /// Largest value of `block`'s cuts at `y`, if the block has any.
    pub fn block_max(&self, block: usize, y: &[f64]) -> Option<(usize, f64)> {
        self.block_cuts(block)
            .map(|i| (i, self.cuts[i].cut.value(y)))
            .fold(None, |best, (i, v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
    }

    /// Moves every cut of block `from` to block `to`.
    pub fn relabel_block(&mut self, from: usize, to: usize) {
        for p in self.cuts.iter_mut().filter(|p| p.cut.block == from) {
            p.cut.block = to;
        }
    }

    /// Keeps the cuts for which `keep` holds and returns, for every old index,
    /// its new index.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<Option<usize>>
    where
        F: FnMut(usize, &PooledCut) -> bool,
    {
        let old = std::mem::take(&mut self.cuts);
        let mut remap = Vec::with_capacity(old.len());
        for (i, p) in old.into_iter().enumerate() {
            if keep(i, &p) {
                remap.push(Some(self.cuts.len()));
                self.cuts.push(p);
            } else {
                remap.push(None);
                self.stats.total_removed += 1;
            }
        }
        remap
    }
}
