//! Regularized master problem.
//!
//! Minimizes `(M/2)|y - x|² + Σ_j p_j max_{i∈j}(a_i + g_i·y)` over the
//! first-stage bounds, first-stage rows and feasibility cuts. Every block `j`
//! keeps one basic cut `b(j)`; substituting it for the block maximum leaves a
//! strictly convex quadratic over the constraints
//!
//! * `(g_i - g_b)·y + (a_i - a_b) <= 0` for the other cuts of the block,
//! * `a + g·y <= 0` (or `= 0`) for feasibility cuts and rows,
//! * `y_k <= hi_k`, `lo_k <= y_k` for the bounds,
//!
//! which is solved by a dual active-set method. With scaled multipliers
//! `u = λ/M` the unconstrained minimizer is `yb = x - (1/M) Σ_j p_j g_b(j)`
//! and the active constraints `N` (restricted to the free variables `F`)
//! give `y_F = yb_F - N_F u` where `N_FᵀN_F u = N_Fᵀ yb_F + b`.

use log::{debug, trace, warn};

use crate::config::MasterConfig;
use crate::error::{DecompositionError, Result};
use crate::linalg::kernels::{axpy, copy, dot, neg_copy, pack, unpack};
use crate::linalg::{ActiveSetFactorization, Update};
use crate::master::cut::{Cut, CutKind, CutPool};
use crate::problem::LinearProgram;

/// Multipliers this far below zero count as sign violations.
const PRICE_TOLERANCE: f64 = 1e-12;

/// Rates of change below this are treated as zero in the ratio test.
const RATE_TOLERANCE: f64 = 1e-12;

/// Where the master is in the outer regularized iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPhase {
    /// No solve yet; the active set starts empty.
    ColdStart,
    /// The trial point was rejected; only the model changed.
    NullStep,
    /// The trial point became the new center.
    SeriousStep,
    /// Blocks were added; multipliers are re-primed on the next solve.
    ScenarioAdded,
    /// The last solve finished.
    Converged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Candidate {
    /// Pool cut, with the orientation of an equality row.
    Cut { cut: usize, sign: f64 },
    Bound { var: usize, side: Side },
}

/// Active member whose multiplier reached zero first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocker {
    /// Active cut at this position.
    Cut(usize),
    /// Fixed variable.
    Bound(usize),
    /// Basic cut of this block.
    Basic(usize),
}

/// A constraint being added, with the primal point and the multipliers
/// accumulated while its own multiplier `tau` grows.
#[derive(Debug, Clone)]
struct Entering {
    candidate: Candidate,
    tau: f64,
    y: Vec<f64>,
    u: Vec<f64>,
}

/// Effect of raising the entering multiplier by one.
struct Direction {
    normal: Vec<f64>,
    offset: f64,
    /// Primal step `s` in free-variable order.
    step: Vec<f64>,
    step_norm2: f64,
    /// Multiplier rates `r`, one per active cut.
    rates: Vec<f64>,
    dependent: bool,
}

enum MasterStep {
    CheckViolations,
    AddMember(Entering),
    Dependency(Entering),
    Delete(Entering, Blocker),
    Converged,
}

#[derive(Debug, Clone, Copy)]
struct ActiveCut {
    cut: usize,
    /// `-1` when an equality row entered from its negative side.
    sign: f64,
    offset: f64,
}

/// Trial point of a master solve.
#[derive(Debug, Clone)]
pub struct MasterSolution {
    pub trial: Vec<f64>,
    /// Cutting-plane model `f̂` at the trial point.
    pub model_value: f64,
    /// Add/delete steps taken.
    pub steps: usize,
    pub active_cuts: usize,
    pub fixed_variables: usize,
}

pub struct RegularizedMaster {
    config: MasterConfig,
    n: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
    /// Block weights; the last block is the first-stage objective.
    weights: Vec<f64>,
    pool: CutPool,
    basic: Vec<Option<usize>>,
    active: Vec<ActiveCut>,
    fixed: Vec<Option<Side>>,
    factor: ActiveSetFactorization,
    center: Vec<f64>,
    trial: Vec<f64>,
    prices: Vec<f64>,
    penalty: f64,
    tolcut: f64,
    phase: MasterPhase,
}

impl RegularizedMaster {
    /// Master over the first stage of `first_stage`, with one block per
    /// scenario weight plus the objective block `c·y`.
    pub fn new(
        first_stage: &LinearProgram,
        weights: &[f64],
        center: Vec<f64>,
        penalty: f64,
        config: MasterConfig,
    ) -> Result<Self> {
        let n = first_stage.num_cols();
        if center.len() != n {
            return Err(DecompositionError::invalid_problem(format!(
                "center has {} entries, expected {}",
                center.len(),
                n
            )));
        }
        if !(penalty > 0.0 && penalty.is_finite()) {
            return Err(DecompositionError::invalid_problem(format!(
                "penalty must be positive, got {}",
                penalty
            )));
        }

        let objective_block = weights.len();
        let mut pool = CutPool::new();
        pool.insert(Cut::optimality(
            objective_block,
            0.0,
            first_stage.objective.clone(),
        ))?;
        for ((row, &sense), &rhs) in first_stage
            .constraints
            .iter()
            .zip(first_stage.senses.iter())
            .zip(first_stage.rhs.iter())
        {
            pool.insert(Cut::row(objective_block, row, sense, rhs))?;
        }

        let mut block_weights = weights.to_vec();
        block_weights.push(1.0);
        let tolcut = config.cut_tolerance;
        let threshold = config.dependency_threshold;
        Ok(Self {
            config,
            n,
            lower: first_stage.lower.clone(),
            upper: first_stage.upper.clone(),
            weights: block_weights,
            pool,
            basic: vec![None; objective_block + 1],
            active: Vec::new(),
            fixed: vec![None; n],
            factor: ActiveSetFactorization::new(n, threshold),
            trial: center.clone(),
            center,
            prices: Vec::new(),
            penalty,
            tolcut,
            phase: MasterPhase::ColdStart,
        })
    }

    pub fn objective_block(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn phase(&self) -> MasterPhase {
        self.phase
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn trial(&self) -> &[f64] {
        &self.trial
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn set_penalty(&mut self, penalty: f64) {
        self.penalty = penalty;
    }

    /// Current violation tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolcut
    }

    pub fn pool(&self) -> &CutPool {
        &self.pool
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Adds a cut to the pool; `false` if it was a duplicate.
    pub fn add_cut(&mut self, cut: Cut) -> Result<bool> {
        if cut.gradient.len() != self.n || cut.block > self.objective_block() {
            return Err(DecompositionError::invalid_problem(format!(
                "cut for block {} with {} coefficients does not fit the master",
                cut.block,
                cut.gradient.len()
            )));
        }
        Ok(self.pool.insert(cut)?.is_some())
    }

    /// Adds a batch of cuts, returning how many were new.
    pub fn add_cuts<I: IntoIterator<Item = Cut>>(&mut self, cuts: I) -> Result<usize> {
        let mut added = 0;
        for cut in cuts {
            if self.add_cut(cut)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Grows the block list to the given scenario weights; the objective
    /// block moves behind the new scenarios.
    pub fn add_blocks(&mut self, weights: &[f64]) {
        let old = self.objective_block();
        let new = weights.len();
        if new > old {
            self.pool.relabel_block(old, new);
            let objective_basic = self.basic.pop().flatten();
            self.basic.resize(new, None);
            self.basic.push(objective_basic);
        }
        self.weights = weights.to_vec();
        self.weights.push(1.0);
        self.phase = MasterPhase::ScenarioAdded;
    }

    /// Accepts a new center and drops optimality cuts that are neither basic
    /// nor active.
    pub fn serious_step(&mut self, center: Vec<f64>) {
        self.center = center;
        self.phase = MasterPhase::SeriousStep;

        let mut keep = vec![false; self.pool.len()];
        for &b in self.basic.iter().flatten() {
            keep[b] = true;
        }
        for a in &self.active {
            keep[a.cut] = true;
        }
        let remap = self
            .pool
            .retain(|i, p| keep[i] || p.cut.is_constraint());
        self.basic = self.basic.iter().map(|b| b.and_then(|i| remap[i])).collect();
        for a in self.active.iter_mut() {
            if let Some(i) = remap[a.cut] {
                a.cut = i;
            }
        }
    }

    pub fn null_step(&mut self) {
        self.phase = MasterPhase::NullStep;
    }

    /// Cutting-plane model `Σ_j p_j max_{i∈j}(a_i + g_i·y)`.
    pub fn model_value(&self, y: &[f64]) -> f64 {
        self.weights
            .iter()
            .enumerate()
            .filter_map(|(j, &w)| self.pool.block_max(j, y).map(|(_, v)| w * v))
            .sum()
    }

    /// Runs the active-set iteration to the next trial point.
    pub fn solve(&mut self) -> Result<MasterSolution> {
        self.choose_missing_basics()?;
        if self.phase != MasterPhase::ColdStart {
            self.restore_dual_feasibility();
        }

        let mut steps = 0;
        let mut step = MasterStep::CheckViolations;
        loop {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(DecompositionError::MasterStepLimit(self.config.max_steps));
            }
            step = match step {
                MasterStep::CheckViolations => self.check_violations(),
                MasterStep::AddMember(e) => self.add_member(e)?,
                MasterStep::Dependency(e) => self.resolve_dependency(e)?,
                MasterStep::Delete(e, blocker) => self.delete_member(e, blocker),
                MasterStep::Converged => break,
            };
        }

        self.phase = MasterPhase::Converged;
        self.record_weights();
        let fixed_variables = self.fixed.iter().filter(|f| f.is_some()).count();
        debug!(
            "master: {} steps, {} active cuts, {} fixed variables, tolcut {:.1e}",
            steps,
            self.active.len(),
            fixed_variables,
            self.tolcut
        );
        Ok(MasterSolution {
            trial: self.trial.clone(),
            model_value: self.model_value(&self.trial),
            steps,
            active_cuts: self.active.len(),
            fixed_variables,
        })
    }

    fn choose_missing_basics(&mut self) -> Result<()> {
        for j in 0..self.weights.len() {
            if self.basic[j].is_some() {
                continue;
            }
            match self.pool.block_max(j, &self.center) {
                Some((i, _)) => self.basic[j] = Some(i),
                None => {
                    return Err(DecompositionError::invalid_problem(format!(
                        "block {} has no optimality cut",
                        j
                    )))
                }
            }
        }
        Ok(())
    }

    fn bound(&self, var: usize, side: Side) -> f64 {
        match side {
            Side::Lower => self.lower[var],
            Side::Upper => self.upper[var],
        }
    }

    fn has_free_multiplier(&self, var: usize) -> bool {
        self.lower[var] == self.upper[var]
    }

    fn basic_cut(&self, block: usize) -> Option<&Cut> {
        self.basic[block].map(|b| self.pool.get(b))
    }

    /// `yb = x - (1/M) Σ_j p_j g_b(j)`.
    fn unconstrained_trial(&self) -> Vec<f64> {
        let mut yb = self.center.clone();
        for (j, &w) in self.weights.iter().enumerate() {
            if let Some(cut) = self.basic_cut(j) {
                axpy(&mut yb, &cut.gradient, -w / self.penalty);
            }
        }
        yb
    }

    /// Normal and offset of a cut as an active constraint `n·y + e <= 0`.
    fn cut_row(&self, cut: usize, sign: f64) -> (Vec<f64>, f64) {
        let c = self.pool.get(cut);
        if c.kind == CutKind::Optimality {
            if let Some(b) = self.basic_cut(c.block) {
                let normal = c
                    .gradient
                    .iter()
                    .zip(b.gradient.iter())
                    .map(|(&g, &gb)| g - gb)
                    .collect();
                return (normal, c.constant - b.constant);
            }
        }
        let mut normal = vec![0.0; self.n];
        if sign < 0.0 {
            neg_copy(&c.gradient, &mut normal);
        } else {
            copy(&c.gradient, &mut normal);
        }
        (normal, sign * c.constant)
    }

    fn candidate_row(&self, candidate: Candidate) -> (Vec<f64>, f64) {
        match candidate {
            Candidate::Cut { cut, sign } => self.cut_row(cut, sign),
            Candidate::Bound { var, side } => {
                let mut normal = vec![0.0; self.n];
                match side {
                    Side::Upper => {
                        normal[var] = 1.0;
                        (normal, -self.upper[var])
                    }
                    Side::Lower => {
                        normal[var] = -1.0;
                        (normal, self.lower[var])
                    }
                }
            }
        }
    }

    fn candidate_block(&self, candidate: Candidate) -> Option<usize> {
        match candidate {
            Candidate::Cut { cut, .. } => {
                let c = self.pool.get(cut);
                (c.kind == CutKind::Optimality).then_some(c.block)
            }
            Candidate::Bound { .. } => None,
        }
    }

    /// Positions of the active cuts belonging to `block`.
    fn block_members(&self, block: usize) -> Vec<usize> {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                let c = self.pool.get(a.cut);
                c.kind == CutKind::Optimality && c.block == block
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Trial point and multipliers of the current active set: `R u = z + w`
    /// with `Rᵀz = N_Fᵀ yb_F` and `Rᵀw = b`, then `y_F = yb_F - N_F u`.
    fn solve_prices(&self) -> (Vec<f64>, Vec<f64>) {
        let yb = self.unconstrained_trial();
        let mut y = yb.clone();
        for (k, side) in self.fixed.iter().enumerate() {
            if let Some(side) = *side {
                y[k] = self.bound(k, side);
            }
        }
        let mut u: Vec<f64> = self
            .active
            .iter()
            .enumerate()
            .map(|(i, a)| dot(self.factor.column(i), &y) + a.offset)
            .collect();
        self.factor.solve_normal(&mut u);
        let free = self.factor.free_variables();
        let mut y_free = vec![0.0; free.len()];
        pack(&yb, &mut y_free, free);
        axpy(&mut y_free, &self.factor.times(&u), -1.0);
        unpack(&y_free, &mut y, free, false);
        (y, u)
    }

    /// Scaled multiplier of the bound holding `var`, given the active cut
    /// multipliers and an entering constraint `(normal, tau)`.
    fn bound_price(&self, var: usize, yb: &[f64], u: &[f64], entering: Option<(&[f64], f64)>) -> f64 {
        let mut s: f64 = u
            .iter()
            .enumerate()
            .map(|(i, &ui)| ui * self.factor.column(i)[var])
            .sum();
        if let Some((normal, tau)) = entering {
            s += tau * normal[var];
        }
        match self.fixed[var] {
            Some(Side::Upper) => yb[var] - s - self.upper[var],
            Some(Side::Lower) => self.lower[var] - yb[var] + s,
            None => 0.0,
        }
    }

    /// `β_j = p_j/M - Σ_{i∈A_j} u_i`, less `tau` when the entering cut is in `j`.
    fn basic_price(&self, block: usize, u: &[f64], members: &[usize], entering_tau: f64) -> f64 {
        self.weights[block] / self.penalty - members.iter().map(|&i| u[i]).sum::<f64>() - entering_tau
    }

    fn active_residual(&self, y: &[f64]) -> f64 {
        self.active
            .iter()
            .enumerate()
            .map(|(i, a)| (dot(self.factor.column(i), y) + a.offset).abs())
            .fold(0.0, f64::max)
    }

    /// Refactors and drops members found dependent.
    fn refactor(&mut self, u: Option<&mut Vec<f64>>) {
        let dropped = self.factor.rebuild();
        for &i in dropped.iter().rev() {
            self.active.remove(i);
        }
        if let Some(u) = u {
            for &i in dropped.iter().rev() {
                u.remove(i);
            }
        }
    }

    /// Makes the first active member of `block` with the largest multiplier
    /// its basic cut and re-expresses the remaining members against it.
    /// Returns `false` when the block has no active member.
    fn swap_basic(&mut self, block: usize, u: &mut Vec<f64>) -> bool {
        let members = self.block_members(block);
        let Some(&pos) = members.iter().fold(None, |best: Option<&usize>, i| match best {
            Some(b) if u[*b] >= u[*i] => best,
            _ => Some(i),
        }) else {
            return false;
        };
        let new_basic = self.active[pos].cut;
        self.factor.remove_column(pos);
        self.active.remove(pos);
        u.remove(pos);
        self.basic[block] = Some(new_basic);

        let remaining = self.block_members(block);
        for &i in &remaining {
            let (normal, offset) = self.cut_row(self.active[i].cut, self.active[i].sign);
            self.factor.set_column(i, normal);
            self.active[i].offset = offset;
        }
        if !remaining.is_empty() {
            self.refactor(Some(u));
        }
        trace!("block {} basic cut is now {}", block, new_basic);
        true
    }

    /// Drops members with sign-violating multipliers until the active set is
    /// dual feasible for the current center, penalty and weights.
    fn restore_dual_feasibility(&mut self) {
        let mut dropped = 0;
        loop {
            let (_, mut u) = self.solve_prices();
            let yb = self.unconstrained_trial();
            let mut worst: Option<(f64, Blocker)> = None;
            let mut consider = |price: f64, blocker: Blocker| {
                if price < -PRICE_TOLERANCE && worst.map_or(true, |(p, _)| price < p) {
                    worst = Some((price, blocker));
                }
            };
            for (i, a) in self.active.iter().enumerate() {
                if self.pool.get(a.cut).is_inequality() {
                    consider(u[i], Blocker::Cut(i));
                }
            }
            for k in 0..self.n {
                if self.fixed[k].is_some() && !self.has_free_multiplier(k) {
                    consider(self.bound_price(k, &yb, &u, None), Blocker::Bound(k));
                }
            }
            for j in 0..self.weights.len() {
                let members = self.block_members(j);
                consider(self.basic_price(j, &u, &members, 0.0), Blocker::Basic(j));
            }

            let Some((_, blocker)) = worst else {
                break;
            };
            match blocker {
                Blocker::Cut(i) => {
                    self.factor.remove_column(i);
                    self.active.remove(i);
                }
                Blocker::Bound(k) => {
                    self.factor.release_variable(k);
                    self.fixed[k] = None;
                }
                Blocker::Basic(j) => {
                    if !self.swap_basic(j, &mut u) {
                        break;
                    }
                }
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!("warm start ({:?}) dropped {} member(s)", self.phase, dropped);
        }
    }

    /// Rebuilds on drift or schedule, adapts `tolcut`, and picks the most
    /// violated constraint at the current trial point.
    fn check_violations(&mut self) -> MasterStep {
        let (mut y, mut u) = self.solve_prices();
        let mut residual = self.active_residual(&y);
        if residual > self.tolcut || self.factor.updates_since_rebuild() >= self.config.rebuild_interval {
            self.refactor(None);
            (y, u) = self.solve_prices();
            let after = self.active_residual(&y);
            if after > self.tolcut {
                let relaxed = (2.0 * after).min(self.config.max_cut_tolerance);
                warn!(
                    "active residual {:.2e} persists after refactoring, tolcut {:.1e} -> {:.1e}",
                    after, self.tolcut, relaxed
                );
                self.tolcut = relaxed;
            }
            residual = after;
        }
        if residual < self.tolcut / 100.0 && self.tolcut > self.config.cut_tolerance {
            self.tolcut = (self.tolcut / 2.0).max(self.config.cut_tolerance);
            debug!("tolcut tightened to {:.1e}", self.tolcut);
        }
        self.trial = y;
        self.prices = u;

        match self.most_violated() {
            Some(candidate) => MasterStep::AddMember(Entering {
                candidate,
                tau: 0.0,
                y: self.trial.clone(),
                u: self.prices.clone(),
            }),
            None => MasterStep::Converged,
        }
    }

    /// Largest violation beyond `tolcut`, ties to the first in scan order.
    fn most_violated(&self) -> Option<Candidate> {
        let y = &self.trial;
        let mut in_set = vec![false; self.pool.len()];
        for a in &self.active {
            in_set[a.cut] = true;
        }
        for &b in self.basic.iter().flatten() {
            in_set[b] = true;
        }

        let mut best: Option<(f64, Candidate)> = None;
        let mut consider = |violation: f64, candidate: Candidate| {
            if violation > self.tolcut && best.map_or(true, |(v, _)| violation > v) {
                best = Some((violation, candidate));
            }
        };
        for (i, cut) in self.pool.iter().enumerate() {
            if in_set[i] {
                continue;
            }
            let value = cut.value(y);
            match cut.kind {
                CutKind::Optimality => {
                    if let Some(b) = self.basic_cut(cut.block) {
                        consider(value - b.value(y), Candidate::Cut { cut: i, sign: 1.0 });
                    }
                }
                _ if cut.is_inequality() => consider(value, Candidate::Cut { cut: i, sign: 1.0 }),
                _ => consider(
                    value.abs(),
                    Candidate::Cut {
                        cut: i,
                        sign: value.signum(),
                    },
                ),
            }
        }
        for k in 0..self.n {
            if self.fixed[k].is_some() {
                continue;
            }
            consider(self.lower[k] - y[k], Candidate::Bound { var: k, side: Side::Lower });
            consider(y[k] - self.upper[k], Candidate::Bound { var: k, side: Side::Upper });
        }
        best.map(|(_, c)| c)
    }

    fn direction(&self, e: &Entering) -> Direction {
        let (normal, offset) = self.candidate_row(e.candidate);
        let projection = self.factor.project(self.factor.reduce(&normal));
        let dependent = projection.is_dependent(self.config.dependency_threshold);
        let mut rates = projection.coefficients;
        self.factor.triangular_solve(&mut rates, false);
        Direction {
            normal,
            offset,
            step: projection.residual,
            step_norm2: projection.residual_norm2,
            rates,
            dependent,
        }
    }

    /// Smallest step at which a sign-constrained multiplier reaches zero.
    fn ratio_test(&self, e: &Entering, dir: &Direction) -> Option<(f64, Blocker)> {
        let mut best: Option<(f64, Blocker)> = None;
        let mut consider = |t: f64, blocker: Blocker| {
            if best.map_or(true, |(bt, _)| t < bt) {
                best = Some((t, blocker));
            }
        };

        for (i, a) in self.active.iter().enumerate() {
            if self.pool.get(a.cut).is_inequality() && dir.rates[i] > RATE_TOLERANCE {
                consider(e.u[i].max(0.0) / dir.rates[i], Blocker::Cut(i));
            }
        }

        let yb = self.unconstrained_trial();
        for k in 0..self.n {
            let Some(side) = self.fixed[k] else {
                continue;
            };
            if self.has_free_multiplier(k) {
                continue;
            }
            let q = dir.normal[k]
                - dir
                    .rates
                    .iter()
                    .enumerate()
                    .map(|(i, &r)| r * self.factor.column(i)[k])
                    .sum::<f64>();
            let rate = match side {
                Side::Upper => -q,
                Side::Lower => q,
            };
            if rate < -RATE_TOLERANCE {
                let price = self.bound_price(k, &yb, &e.u, Some((dir.normal.as_slice(), e.tau)));
                consider(price.max(0.0) / -rate, Blocker::Bound(k));
            }
        }

        let entering_block = self.candidate_block(e.candidate);
        for j in 0..self.weights.len() {
            let members = self.block_members(j);
            let own = entering_block == Some(j);
            let rate = members.iter().map(|&i| dir.rates[i]).sum::<f64>() - if own { 1.0 } else { 0.0 };
            if rate < -RATE_TOLERANCE {
                let tau = if own { e.tau } else { 0.0 };
                let price = self.basic_price(j, &e.u, &members, tau);
                consider(price.max(0.0) / -rate, Blocker::Basic(j));
            }
        }
        best
    }

    fn take_step(&self, mut e: Entering, dir: &Direction, t: f64) -> Entering {
        if t > 0.0 {
            for (&var, &s) in self.factor.free_variables().iter().zip(dir.step.iter()) {
                e.y[var] -= t * s;
            }
            for (u, &r) in e.u.iter_mut().zip(dir.rates.iter()) {
                *u -= t * r;
            }
            e.tau += t;
        }
        e
    }

    fn add_member(&mut self, e: Entering) -> Result<MasterStep> {
        let dir = self.direction(&e);
        if dir.dependent {
            trace!("entering {:?} is dependent on the active set", e.candidate);
            return Ok(MasterStep::Dependency(e));
        }
        let violation = (dot(&dir.normal, &e.y) + dir.offset).max(0.0);
        let full = violation / dir.step_norm2;
        match self.ratio_test(&e, &dir) {
            Some((t, blocker)) if t < full => {
                let e = self.take_step(e, &dir, t);
                Ok(MasterStep::Delete(e, blocker))
            }
            _ => {
                let e = self.take_step(e, &dir, full);
                Ok(self.commit(e, dir))
            }
        }
    }

    fn resolve_dependency(&mut self, e: Entering) -> Result<MasterStep> {
        let dir = self.direction(&e);
        match self.ratio_test(&e, &dir) {
            Some((t, blocker)) => {
                let e = self.take_step(e, &dir, t);
                Ok(MasterStep::Delete(e, blocker))
            }
            None => Err(DecompositionError::InfeasibleMaster(format!(
                "{:?} is dependent on the active set and no member can be released",
                e.candidate
            ))),
        }
    }

    fn commit(&mut self, e: Entering, dir: Direction) -> MasterStep {
        let update = match e.candidate {
            Candidate::Cut { cut, sign } => {
                let update = self.factor.add_column(dir.normal);
                if update == Update::Applied {
                    self.active.push(ActiveCut {
                        cut,
                        sign,
                        offset: dir.offset,
                    });
                }
                update
            }
            Candidate::Bound { var, side } => {
                let update = self.factor.fix_variable(var);
                if update == Update::Applied {
                    self.fixed[var] = Some(side);
                }
                update
            }
        };
        match update {
            Update::Applied => {
                trace!("added {:?} with multiplier {:.3e}", e.candidate, e.tau);
                MasterStep::CheckViolations
            }
            Update::Dependent => MasterStep::Dependency(e),
        }
    }

    fn delete_member(&mut self, mut e: Entering, blocker: Blocker) -> MasterStep {
        trace!("releasing {:?} while adding {:?}", blocker, e.candidate);
        match blocker {
            Blocker::Cut(i) => {
                self.factor.remove_column(i);
                self.active.remove(i);
                e.u.remove(i);
            }
            Blocker::Bound(k) => {
                self.factor.release_variable(k);
                self.fixed[k] = None;
            }
            Blocker::Basic(j) => {
                if !self.swap_basic(j, &mut e.u) {
                    // The entering cut takes over the block.
                    if let Candidate::Cut { cut, .. } = e.candidate {
                        self.basic[j] = Some(cut);
                    }
                    return MasterStep::CheckViolations;
                }
            }
        }
        MasterStep::AddMember(e)
    }

    /// Stores multipliers (unscaled) as pool weights and ages idle cuts.
    fn record_weights(&mut self) {
        for i in 0..self.pool.len() {
            let entry = self.pool.entry_mut(i);
            entry.weight = 0.0;
            entry.idle += 1;
        }
        for (a, &u) in self.active.iter().zip(self.prices.iter()) {
            let entry = self.pool.entry_mut(a.cut);
            entry.weight = a.sign * self.penalty * u;
            entry.idle = 0;
        }
        for j in 0..self.weights.len() {
            if let Some(b) = self.basic[j] {
                let members = self.block_members(j);
                let beta = self.basic_price(j, &self.prices, &members, 0.0);
                let entry = self.pool.entry_mut(b);
                entry.weight = self.penalty * beta;
                entry.idle = 0;
            }
        }
    }
}
