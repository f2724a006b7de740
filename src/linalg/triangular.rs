use crate::linalg::kernels::dot;

/// Plane rotation `(c, s, r)` with `c*a + s*b = r >= 0` and `-s*a + c*b = 0`.
pub fn givens(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        if a >= 0.0 {
            (1.0, 0.0, a)
        } else {
            (-1.0, 0.0, -a)
        }
    } else {
        let r = a.hypot(b);
        (a / r, b / r, r)
    }
}

/// Square upper-triangular factor `R`, stored densely by rows.
///
/// Row `i` holds `R[i][0..k]`; entries below the diagonal are kept at zero.
/// Every update leaves the diagonal strictly positive.
#[derive(Debug, Clone, Default)]
pub struct UpperTriangular {
    rows: Vec<Vec<f64>>,
}

impl UpperTriangular {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Number of rows (and columns).
    pub fn order(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j]
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Solves `R x = rhs` (back substitution) or, with `transpose`,
    /// `Rᵀ x = rhs` (forward substitution), overwriting `rhs` with `x`.
    pub fn solve(&self, rhs: &mut [f64], transpose: bool) {
        let k = self.order();
        debug_assert_eq!(rhs.len(), k);
        if transpose {
            for i in 0..k {
                let mut acc = rhs[i];
                for j in 0..i {
                    acc -= self.rows[j][i] * rhs[j];
                }
                rhs[i] = acc / self.rows[i][i];
            }
        } else {
            for i in (0..k).rev() {
                let acc = rhs[i] - dot(&self.rows[i][i + 1..], &rhs[i + 1..]);
                rhs[i] = acc / self.rows[i][i];
            }
        }
    }

    /// Grows `R` to `[[R, p], [0, rho]]`.
    pub fn expand(&mut self, p: &[f64], rho: f64) {
        let k = self.order();
        debug_assert_eq!(p.len(), k);
        debug_assert!(rho > 0.0);
        for (row, &pi) in self.rows.iter_mut().zip(p.iter()) {
            row.push(pi);
        }
        let mut last = vec![0.0; k + 1];
        last[k] = rho;
        self.rows.push(last);
    }

    /// Removes column `j`, restoring the triangle with a sweep of rotations
    /// over rows `j..k`. The order shrinks by one.
    pub fn delete_column(&mut self, j: usize) {
        let k = self.order();
        debug_assert!(j < k);
        for row in self.rows.iter_mut() {
            row.remove(j);
        }
        for i in j..k - 1 {
            let (c, s, r) = givens(self.rows[i][i], self.rows[i + 1][i]);
            self.rotate_rows(i, c, s, i + 1);
            self.rows[i][i] = r;
            self.rows[i + 1][i] = 0.0;
        }
        self.rows.pop();
    }

    /// Folds an extra row `w` of the factored matrix into `R`, so that the
    /// new factor satisfies `R'ᵀR' = RᵀR + wwᵀ`. `w` is consumed as workspace.
    pub fn append_row(&mut self, w: &mut [f64]) {
        let k = self.order();
        debug_assert_eq!(w.len(), k);
        for i in 0..k {
            let (c, s, r) = givens(self.rows[i][i], w[i]);
            self.rows[i][i] = r;
            w[i] = 0.0;
            for col in i + 1..k {
                let t = self.rows[i][col];
                self.rows[i][col] = c * t + s * w[col];
                w[col] = -s * t + c * w[col];
            }
        }
    }

    /// Removes a row `w` from the factored matrix, `R'ᵀR' = RᵀR - wwᵀ`.
    ///
    /// `p` solves `Rᵀp = w` and `alpha² = 1 - |p|²` is the squared distance of
    /// the removed unit direction from the active column space; both come from
    /// the caller's orthogonalization.
    pub fn delete_row(&mut self, p: &[f64], alpha: f64) {
        let k = self.order();
        debug_assert_eq!(p.len(), k);
        debug_assert!(alpha > 0.0);
        let mut c = vec![0.0; k];
        let mut s = p.to_vec();
        let mut alpha = alpha;
        for i in (0..k).rev() {
            let scale = alpha + s[i].abs();
            let a = alpha / scale;
            let b = s[i] / scale;
            let norm = a.hypot(b);
            c[i] = a / norm;
            s[i] = b / norm;
            alpha = scale * norm;
        }
        for j in 0..k {
            let mut xx = 0.0;
            for i in (0..=j).rev() {
                let t = c[i] * xx + s[i] * self.rows[i][j];
                self.rows[i][j] = c[i] * self.rows[i][j] - s[i] * xx;
                xx = t;
            }
        }
        self.normalize_signs();
    }

    /// `RᵀR`, used to check the factor against the Gram matrix.
    pub fn gram(&self) -> Vec<Vec<f64>> {
        let k = self.order();
        let mut g = vec![vec![0.0; k]; k];
        for i in 0..k {
            for j in 0..k {
                let upto = i.min(j);
                g[i][j] = (0..=upto).map(|l| self.rows[l][i] * self.rows[l][j]).sum();
            }
        }
        g
    }

    pub fn is_upper_triangular(&self) -> bool {
        self.rows
            .iter()
            .enumerate()
            .all(|(i, row)| row.len() == self.order() && row[..i].iter().all(|&x| x == 0.0) && row[i] > 0.0)
    }

    fn rotate_rows(&mut self, i: usize, c: f64, s: f64, from_col: usize) {
        let (upper, lower) = self.rows.split_at_mut(i + 1);
        let top = &mut upper[i];
        let bottom = &mut lower[0];
        for col in from_col..top.len() {
            let x = top[col];
            let y = bottom[col];
            top[col] = c * x + s * y;
            bottom[col] = -s * x + c * y;
        }
    }

    // Negating a row leaves RᵀR unchanged.
    fn normalize_signs(&mut self) {
        for (i, row) in self.rows.iter_mut().enumerate() {
            if row[i] < 0.0 {
                for x in row[i..].iter_mut() {
                    *x = -*x;
                }
            }
        }
    }
}
