//! Dense bounded-variable tableau simplex.
//!
//! The program `min c·x, A x {sense} b, l <= x <= u` is brought to the form
//! `A x + s + Σ a = b` with one slack `s_i` per row (its bounds encode the
//! sense) and one signed artificial `a_i` per row. Phase one minimizes the
//! artificials; phase two fixes them at zero and minimizes `c·x`. Nonbasic
//! columns rest at a finite bound, or at zero when they have none.
//!
//! Column layout: `0..n` structural, `n..n+m` slacks, `n+m..n+2m` artificials.

use log::{debug, trace};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SimplexConfig;
use crate::error::Result;
use crate::linalg::kernels::max_abs;
use crate::problem::LinearProgram;
use crate::subproblem::solver::{DualCertificate, RecourseSolver, SolveStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarStatus {
    Basic,
    AtLower,
    AtUpper,
    /// Nonbasic at zero with no finite bound.
    Free,
}

/// Basis of a finished solve; valid for any program of the same shape.
#[derive(Debug, Clone)]
pub struct BasisSnapshot {
    basis: Vec<usize>,
    status: Vec<VarStatus>,
    sigma: Vec<f64>,
}

impl BasisSnapshot {
    pub fn basis(&self) -> &[usize] {
        &self.basis
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopOutcome {
    Optimal,
    Unbounded,
    Infeasible,
    IterationLimit,
}

#[derive(Debug, Clone)]
pub struct DenseSimplex {
    config: SimplexConfig,
    rng: ChaCha8Rng,

    n: usize,
    m: usize,
    rows: Vec<Vec<f64>>,
    rhs: Vec<f64>,
    cost: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    sigma: Vec<f64>,

    tableau: Vec<Vec<f64>>,
    basis: Vec<usize>,
    status: Vec<VarStatus>,
    beta: Vec<f64>,
    scan: Vec<usize>,
    rank: Vec<usize>,

    iterations: usize,
    outcome: Option<SolveStatus>,
    certificate: Option<DualCertificate>,
    primal: Vec<f64>,
    objective: f64,
    residual: f64,
}

impl DenseSimplex {
    pub fn new(config: SimplexConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            n: 0,
            m: 0,
            rows: Vec::new(),
            rhs: Vec::new(),
            cost: Vec::new(),
            lower: Vec::new(),
            upper: Vec::new(),
            sigma: Vec::new(),
            tableau: Vec::new(),
            basis: Vec::new(),
            status: Vec::new(),
            beta: Vec::new(),
            scan: Vec::new(),
            rank: Vec::new(),
            iterations: 0,
            outcome: None,
            certificate: None,
            primal: Vec::new(),
            objective: 0.0,
            residual: 0.0,
        }
    }

    /// Status of the last solve, if any.
    pub fn status(&self) -> Option<SolveStatus> {
        self.outcome
    }

    fn total(&self) -> usize {
        self.n + 2 * self.m
    }

    fn artificial(&self, i: usize) -> usize {
        self.n + self.m + i
    }

    fn is_artificial(&self, j: usize) -> bool {
        j >= self.n + self.m
    }

    /// Entry `(i, j)` of `[A | I | Σ]`.
    fn entry(&self, i: usize, j: usize) -> f64 {
        if j < self.n {
            self.rows[i][j]
        } else if j < self.n + self.m {
            if j - self.n == i {
                1.0
            } else {
                0.0
            }
        } else if j - self.n - self.m == i {
            self.sigma[i]
        } else {
            0.0
        }
    }

    fn default_status(lower: f64, upper: f64) -> VarStatus {
        if lower.is_finite() {
            VarStatus::AtLower
        } else if upper.is_finite() {
            VarStatus::AtUpper
        } else {
            VarStatus::Free
        }
    }

    fn nonbasic_value(&self, j: usize) -> f64 {
        match self.status[j] {
            VarStatus::AtLower => self.lower[j],
            VarStatus::AtUpper => self.upper[j],
            VarStatus::Free | VarStatus::Basic => 0.0,
        }
    }

    fn is_fixed(&self, j: usize) -> bool {
        self.lower[j] == self.upper[j]
    }

    fn phase_one_cost(&self) -> Vec<f64> {
        let mut cost = vec![0.0; self.total()];
        for i in 0..self.m {
            let j = self.artificial(i);
            cost[j] = 1.0;
        }
        cost
    }

    fn phase_two_cost(&self) -> Vec<f64> {
        let mut cost = self.cost.clone();
        cost.resize(self.total(), 0.0);
        cost
    }

    fn set_artificial_bounds(&mut self, upper: f64) {
        for i in 0..self.m {
            let j = self.artificial(i);
            self.lower[j] = 0.0;
            self.upper[j] = upper;
            if self.status[j] != VarStatus::Basic {
                self.status[j] = VarStatus::AtLower;
            }
        }
    }

    fn reset_scan(&mut self) {
        self.scan = (0..self.total()).collect();
        self.rank = self.scan.clone();
    }

    fn shuffle_scan(&mut self) {
        self.scan.shuffle(&mut self.rng);
        for (k, &j) in self.scan.iter().enumerate() {
            self.rank[j] = k;
        }
    }

    /// `b - N x_N`, the right-hand side seen by the basic columns.
    fn basic_rhs(&self) -> Vec<f64> {
        let mut r = self.rhs.clone();
        for j in 0..self.total() {
            if self.status[j] == VarStatus::Basic {
                continue;
            }
            let x = self.nonbasic_value(j);
            if x == 0.0 {
                continue;
            }
            if j < self.n {
                for (ri, row) in r.iter_mut().zip(self.rows.iter()) {
                    *ri -= row[j] * x;
                }
            } else if j < self.n + self.m {
                r[j - self.n] -= x;
            } else {
                let i = j - self.n - self.m;
                r[i] -= self.sigma[i] * x;
            }
        }
        r
    }

    /// Basic values from scratch; the slack block of the tableau is `B⁻¹`.
    fn recompute_beta(&mut self) {
        let r = self.basic_rhs();
        let n = self.n;
        self.beta = self
            .tableau
            .iter()
            .map(|row| {
                row[n..n + self.m]
                    .iter()
                    .zip(r.iter())
                    .map(|(&t, &ri)| t * ri)
                    .sum()
            })
            .collect();
    }

    fn reduced_costs(&self, cost: &[f64]) -> Vec<f64> {
        let mut d = cost.to_vec();
        for (row, &b) in self.tableau.iter().zip(self.basis.iter()) {
            let cb = cost[b];
            if cb == 0.0 {
                continue;
            }
            for (dj, &t) in d.iter_mut().zip(row.iter()) {
                *dj -= cb * t;
            }
        }
        for &b in &self.basis {
            d[b] = 0.0;
        }
        d
    }

    fn pivot(&mut self, r: usize, q: usize) {
        let p = self.tableau[r][q];
        for x in self.tableau[r].iter_mut() {
            *x /= p;
        }
        self.tableau[r][q] = 1.0;
        let pivot_row = self.tableau[r].clone();
        for (i, row) in self.tableau.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let f = row[q];
            if f == 0.0 {
                continue;
            }
            for (x, &pr) in row.iter_mut().zip(pivot_row.iter()) {
                *x -= f * pr;
            }
            row[q] = 0.0;
        }
    }

    /// Entering column and direction (+1 increase, -1 decrease).
    fn price(&self, d: &[f64], bland: bool) -> Option<(usize, f64)> {
        let tol = self.config.tolerance;
        let mut best: Option<(usize, f64)> = None;
        let mut best_score = 0.0;
        for &j in &self.scan {
            let dir = match self.status[j] {
                VarStatus::Basic => continue,
                _ if self.is_fixed(j) => continue,
                VarStatus::AtLower if d[j] < -tol => 1.0,
                VarStatus::AtUpper if d[j] > tol => -1.0,
                VarStatus::Free if d[j].abs() > tol => -d[j].signum(),
                _ => continue,
            };
            if bland {
                return Some((j, dir));
            }
            if d[j].abs() > best_score {
                best_score = d[j].abs();
                best = Some((j, dir));
            }
        }
        best
    }

    fn primal_loop(&mut self, cost: &[f64]) -> LoopOutcome {
        let ptol = self.config.pivot_tolerance;
        let mut degenerate = 0;
        loop {
            if self.iterations >= self.config.max_iterations {
                return LoopOutcome::IterationLimit;
            }
            let d = self.reduced_costs(cost);
            let bland = degenerate >= self.config.degenerate_limit;
            let Some((q, dir)) = self.price(&d, bland) else {
                return LoopOutcome::Optimal;
            };

            let mut theta = if self.lower[q].is_finite() && self.upper[q].is_finite() {
                self.upper[q] - self.lower[q]
            } else {
                f64::INFINITY
            };
            let mut leave: Option<(usize, VarStatus)> = None;
            let mut best_pivot = 0.0;
            for i in 0..self.m {
                let alpha = self.tableau[i][q];
                if alpha.abs() <= ptol {
                    continue;
                }
                let rate = -dir * alpha;
                let b = self.basis[i];
                let (limit, side) = if rate < 0.0 {
                    if !self.lower[b].is_finite() {
                        continue;
                    }
                    ((self.beta[i] - self.lower[b]) / -rate, VarStatus::AtLower)
                } else {
                    if !self.upper[b].is_finite() {
                        continue;
                    }
                    ((self.upper[b] - self.beta[i]) / rate, VarStatus::AtUpper)
                };
                let limit = limit.max(0.0);
                let take = match leave {
                    None => limit < theta,
                    Some((r, _)) => {
                        let slack = 1e-12 * (1.0 + theta.abs());
                        if limit < theta - slack {
                            true
                        } else if limit <= theta + slack {
                            if bland {
                                self.rank[b] < self.rank[self.basis[r]]
                            } else {
                                alpha.abs() > best_pivot
                            }
                        } else {
                            false
                        }
                    }
                };
                if take {
                    theta = limit;
                    leave = Some((i, side));
                    best_pivot = alpha.abs();
                }
            }

            if theta == f64::INFINITY {
                return LoopOutcome::Unbounded;
            }

            for i in 0..self.m {
                self.beta[i] -= theta * dir * self.tableau[i][q];
            }
            match leave {
                None => {
                    self.status[q] = if dir > 0.0 {
                        VarStatus::AtUpper
                    } else {
                        VarStatus::AtLower
                    };
                    trace!("bound flip of column {}", q);
                }
                Some((r, side)) => {
                    let entering = self.nonbasic_value(q) + dir * theta;
                    let leaving = self.basis[r];
                    self.pivot(r, q);
                    self.beta[r] = entering;
                    self.status[leaving] = side;
                    self.status[q] = VarStatus::Basic;
                    self.basis[r] = q;
                    trace!("pivot row {} col {} theta {:.3e}", r, q, theta);
                }
            }
            degenerate = if theta <= self.config.tolerance {
                degenerate + 1
            } else {
                0
            };
            self.iterations += 1;
        }
    }

    /// Dual simplex from a dual feasible basis; `Infeasible` when a primal
    /// infeasible row has no eligible entering column.
    fn dual_loop(&mut self, cost: &[f64]) -> LoopOutcome {
        let tol = self.config.tolerance;
        let ptol = self.config.pivot_tolerance;
        loop {
            if self.iterations >= self.config.max_iterations {
                return LoopOutcome::IterationLimit;
            }
            let mut leave: Option<usize> = None;
            let mut worst = tol;
            for i in 0..self.m {
                let b = self.basis[i];
                let infeasibility = (self.lower[b] - self.beta[i]).max(self.beta[i] - self.upper[b]);
                if infeasibility > worst {
                    worst = infeasibility;
                    leave = Some(i);
                }
            }
            let Some(r) = leave else {
                return LoopOutcome::Optimal;
            };
            let leaving = self.basis[r];
            let below = self.beta[r] < self.lower[leaving];
            let d = self.reduced_costs(cost);

            let mut enter: Option<usize> = None;
            let mut best_ratio = f64::INFINITY;
            let mut best_pivot = 0.0;
            for &j in &self.scan {
                if self.status[j] == VarStatus::Basic || self.is_fixed(j) {
                    continue;
                }
                let alpha = self.tableau[r][j];
                if alpha.abs() <= ptol {
                    continue;
                }
                let eligible = match (self.status[j], below) {
                    (VarStatus::Free, _) => true,
                    (VarStatus::AtLower, true) | (VarStatus::AtUpper, false) => alpha < 0.0,
                    (VarStatus::AtUpper, true) | (VarStatus::AtLower, false) => alpha > 0.0,
                    (VarStatus::Basic, _) => false,
                };
                if !eligible {
                    continue;
                }
                let ratio = d[j].abs() / alpha.abs();
                if ratio < best_ratio - 1e-12 || (ratio <= best_ratio + 1e-12 && alpha.abs() > best_pivot) {
                    best_ratio = ratio;
                    best_pivot = alpha.abs();
                    enter = Some(j);
                }
            }
            let Some(q) = enter else {
                return LoopOutcome::Infeasible;
            };

            let bound = if below {
                self.lower[leaving]
            } else {
                self.upper[leaving]
            };
            let step = (self.beta[r] - bound) / self.tableau[r][q];
            for i in 0..self.m {
                self.beta[i] -= self.tableau[i][q] * step;
            }
            let entering = self.nonbasic_value(q) + step;
            self.pivot(r, q);
            self.beta[r] = entering;
            self.status[leaving] = if below {
                VarStatus::AtLower
            } else {
                VarStatus::AtUpper
            };
            self.status[q] = VarStatus::Basic;
            self.basis[r] = q;
            self.iterations += 1;
            trace!("dual pivot row {} col {}", r, q);
        }
    }

    /// Slack or artificial basis with structurals at their default bounds.
    fn install_initial_basis(&mut self) {
        let (n, m) = (self.n, self.m);
        let total = self.total();
        for j in 0..total {
            self.status[j] = Self::default_status(self.lower[j], self.upper[j]);
        }
        let r = self.basic_rhs();

        self.tableau = vec![vec![0.0; total]; m];
        self.basis = vec![0; m];
        self.beta = vec![0.0; m];
        for i in 0..m {
            let s = n + i;
            let slack_fits = r[i] >= self.lower[s] && r[i] <= self.upper[s];
            self.sigma[i] = if r[i] >= 0.0 { 1.0 } else { -1.0 };
            let (column, scale, value) = if slack_fits {
                (s, 1.0, r[i])
            } else {
                (self.artificial(i), self.sigma[i], r[i].abs())
            };
            for j in 0..total {
                self.tableau[i][j] = scale * self.entry(i, j);
            }
            self.basis[i] = column;
            self.status[column] = VarStatus::Basic;
            self.beta[i] = value;
        }
    }

    fn cold_start(&mut self) -> SolveStatus {
        self.set_artificial_bounds(f64::INFINITY);
        self.install_initial_basis();

        let phase_one = self.phase_one_cost();
        match self.primal_loop(&phase_one) {
            LoopOutcome::Optimal => {}
            _ => return self.finish(SolveStatus::Unknown, &phase_one),
        }
        self.recompute_beta();
        let infeasibility: f64 = self
            .basis
            .iter()
            .zip(self.beta.iter())
            .filter(|(&b, _)| self.is_artificial(b))
            .map(|(_, &v)| v)
            .sum();
        if infeasibility > self.config.tolerance * (1.0 + max_abs(&self.rhs)) {
            return self.finish(SolveStatus::Infeasible, &phase_one);
        }

        self.set_artificial_bounds(0.0);
        self.phase_two()
    }

    fn phase_two(&mut self) -> SolveStatus {
        let cost = self.phase_two_cost();
        let status = match self.primal_loop(&cost) {
            LoopOutcome::Optimal => SolveStatus::Optimal,
            LoopOutcome::Unbounded => SolveStatus::Unbounded,
            _ => SolveStatus::Unknown,
        };
        self.finish(status, &cost)
    }

    /// Rebuilds `B⁻¹[A | I | Σ]` for the given basis by Gauss–Jordan
    /// elimination; `false` when the basis is singular for this program.
    fn factor_basis(&mut self, columns: &[usize]) -> bool {
        let total = self.total();
        let m = self.m;
        let mut tableau: Vec<Vec<f64>> = (0..m)
            .map(|i| (0..total).map(|j| self.entry(i, j)).collect())
            .collect();
        let mut assigned = vec![false; m];
        let mut basis = vec![0; m];
        for &col in columns {
            let pick = (0..m)
                .filter(|&i| !assigned[i])
                .max_by(|&a, &b| {
                    tableau[a][col]
                        .abs()
                        .partial_cmp(&tableau[b][col].abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some(r) = pick else {
                return false;
            };
            if tableau[r][col].abs() <= self.config.pivot_tolerance {
                return false;
            }
            let p = tableau[r][col];
            for x in tableau[r].iter_mut() {
                *x /= p;
            }
            let pivot_row = tableau[r].clone();
            for (i, row) in tableau.iter_mut().enumerate() {
                if i == r || row[col] == 0.0 {
                    continue;
                }
                let f = row[col];
                for (x, &pr) in row.iter_mut().zip(pivot_row.iter()) {
                    *x -= f * pr;
                }
            }
            assigned[r] = true;
            basis[r] = col;
        }
        self.tableau = tableau;
        self.basis = basis;
        true
    }

    fn is_primal_feasible(&self) -> bool {
        let tol = self.config.tolerance;
        self.basis.iter().zip(self.beta.iter()).all(|(&b, &v)| {
            v >= self.lower[b] - tol * (1.0 + self.lower[b].abs())
                && v <= self.upper[b] + tol * (1.0 + self.upper[b].abs())
        })
    }

    fn is_dual_feasible(&self, d: &[f64]) -> bool {
        let tol = self.config.tolerance;
        (0..self.total()).all(|j| {
            if self.is_fixed(j) {
                return true;
            }
            match self.status[j] {
                VarStatus::Basic => true,
                VarStatus::AtLower => d[j] >= -tol,
                VarStatus::AtUpper => d[j] <= tol,
                VarStatus::Free => d[j].abs() <= tol,
            }
        })
    }

    fn warm_start(&mut self, snapshot: &BasisSnapshot) -> Option<SolveStatus> {
        if snapshot.basis.len() != self.m
            || snapshot.status.len() != self.total()
            || snapshot.sigma.len() != self.m
        {
            return None;
        }
        self.sigma = snapshot.sigma.clone();
        self.set_artificial_bounds(0.0);
        if !self.factor_basis(&snapshot.basis) {
            debug!("saved basis is singular for the new data");
            return None;
        }
        for j in 0..self.total() {
            let wanted = snapshot.status[j];
            self.status[j] = match wanted {
                VarStatus::AtLower if self.lower[j].is_finite() => wanted,
                VarStatus::AtUpper if self.upper[j].is_finite() => wanted,
                VarStatus::Free if !self.lower[j].is_finite() && !self.upper[j].is_finite() => wanted,
                _ => Self::default_status(self.lower[j], self.upper[j]),
            };
        }
        for &b in &self.basis {
            self.status[b] = VarStatus::Basic;
        }
        self.recompute_beta();

        if self.is_primal_feasible() {
            return Some(self.phase_two());
        }
        let cost = self.phase_two_cost();
        let d = self.reduced_costs(&cost);
        if !self.is_dual_feasible(&d) {
            return None;
        }
        match self.dual_loop(&cost) {
            LoopOutcome::Optimal => Some(self.finish(SolveStatus::Optimal, &cost)),
            _ => None,
        }
    }

    fn finish(&mut self, status: SolveStatus, cost: &[f64]) -> SolveStatus {
        self.recompute_beta();
        let total = self.total();
        let mut values: Vec<f64> = (0..total).map(|j| self.nonbasic_value(j)).collect();
        for (&b, &v) in self.basis.iter().zip(self.beta.iter()) {
            values[b] = v;
        }

        self.residual = (0..self.m)
            .map(|i| {
                let activity: f64 = (0..total).map(|j| self.entry(i, j) * values[j]).sum();
                (activity - self.rhs[i]).abs()
            })
            .fold(0.0, f64::max);
        self.primal = values[..self.n].to_vec();
        self.objective = self
            .cost
            .iter()
            .zip(self.primal.iter())
            .map(|(&c, &x)| c * x)
            .sum();

        self.certificate = match status {
            SolveStatus::Optimal | SolveStatus::Infeasible => {
                let d = self.reduced_costs(cost);
                let duals = (0..self.m).map(|i| -d[self.n + i]).collect();
                let bound_term = (0..total)
                    .filter(|&j| self.status[j] != VarStatus::Basic)
                    .map(|j| d[j] * self.nonbasic_value(j))
                    .sum();
                Some(DualCertificate { duals, bound_term })
            }
            _ => None,
        };
        self.outcome = Some(status);
        status
    }

    fn begin(&mut self) {
        self.iterations = 0;
        self.certificate = None;
        self.outcome = None;
    }
}

impl RecourseSolver for DenseSimplex {
    type Snapshot = BasisSnapshot;

    fn initialize(&mut self, lp: &LinearProgram) -> Result<()> {
        lp.validate()?;
        self.n = lp.num_cols();
        self.m = lp.num_rows();
        self.rows = lp.constraints.clone();
        self.rhs = lp.rhs.clone();
        self.cost = lp.objective.clone();

        self.lower = lp.lower.clone();
        self.upper = lp.upper.clone();
        for &sense in &lp.senses {
            let (lo, hi) = sense.slack_bounds();
            self.lower.push(lo);
            self.upper.push(hi);
        }
        self.lower.extend(std::iter::repeat(0.0).take(self.m));
        self.upper.extend(std::iter::repeat(f64::INFINITY).take(self.m));
        self.sigma = vec![1.0; self.m];

        self.tableau.clear();
        self.basis.clear();
        self.beta.clear();
        self.status = vec![VarStatus::AtLower; self.total()];
        self.reset_scan();
        self.primal = vec![0.0; self.n];
        self.objective = 0.0;
        self.residual = 0.0;
        self.begin();
        Ok(())
    }

    fn solve(&mut self) -> SolveStatus {
        self.begin();
        self.cold_start()
    }

    fn restart_from(&mut self, snapshot: &BasisSnapshot) -> SolveStatus {
        self.begin();
        match self.warm_start(snapshot) {
            Some(status) => status,
            None => {
                debug!("warm start rejected, solving from scratch");
                self.iterations = 0;
                self.cold_start()
            }
        }
    }

    fn restart(&mut self, randomize: bool) -> SolveStatus {
        if randomize {
            self.shuffle_scan();
        }
        self.solve()
    }

    fn certificate(&self) -> Option<&DualCertificate> {
        self.certificate.as_ref()
    }

    fn snapshot(&self) -> Option<BasisSnapshot> {
        if self.basis.len() != self.m || self.outcome.is_none() {
            return None;
        }
        Some(BasisSnapshot {
            basis: self.basis.clone(),
            status: self.status.clone(),
            sigma: self.sigma.clone(),
        })
    }

    fn primal(&self) -> &[f64] {
        &self.primal
    }

    fn objective_value(&self) -> f64 {
        self.objective
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn residual(&self) -> f64 {
        self.residual
    }
}
