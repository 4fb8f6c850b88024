//! Fit statistics used by resampling callbacks.
//!
//! Functions return `None` instead of NaN when a statistic is undefined for
//! the input (empty slices, zero variance, singular systems).

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Mean absolute error between paired slices.
pub fn mean_absolute_error(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.len() != predicted.len() || observed.is_empty() {
        return None;
    }
    let total: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| (o - p).abs())
        .sum();
    Some(total / observed.len() as f64)
}

/// Coefficient of determination `1 - SS_res / SS_tot`.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> Option<f64> {
    if observed.len() != predicted.len() {
        return None;
    }
    let m = mean(observed)?;
    let ss_tot: f64 = observed.iter().map(|o| (o - m).powi(2)).sum();
    if ss_tot == 0.0 {
        return None;
    }
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(o, p)| (o - p).powi(2))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}

/// Pearson correlation coefficient.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

// ---------------------------------------------------------------------------
// Least squares
// ---------------------------------------------------------------------------

/// Ordinary least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Fit a line. `None` with fewer than two points or constant `x`.
pub fn fit_line(x: &[f64], y: &[f64]) -> Option<LineFit> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let slope = sxy / sxx;
    Some(LineFit {
        slope,
        intercept: my - slope * mx,
    })
}

/// Least-squares polynomial coefficients, lowest order first.
///
/// Solves the normal equations by Gaussian elimination with partial
/// pivoting. `None` when there are fewer points than coefficients or the
/// system is singular.
pub fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Option<Vec<f64>> {
    let n = degree + 1;
    if x.len() != y.len() || x.len() < n {
        return None;
    }

    // Augmented normal-equation matrix [XᵀX | Xᵀy].
    let mut m = vec![vec![0.0; n + 1]; n];
    for (&xi, &yi) in x.iter().zip(y) {
        let powers: Vec<f64> = (0..2 * n).map(|p| xi.powi(p as i32)).collect();
        for (row, cells) in m.iter_mut().enumerate() {
            for (col, cell) in cells.iter_mut().take(n).enumerate() {
                *cell += powers[row + col];
            }
            cells[n] += powers[row] * yi;
        }
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        let pivot_row = m[col].clone();
        for row in m.iter_mut().skip(col + 1) {
            let factor = row[col] / pivot_row[col];
            for k in col..=n {
                row[k] -= factor * pivot_row[k];
            }
        }
    }

    let mut coeffs = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[row][k] * coeffs[k]).sum();
        coeffs[row] = (m[row][n] - tail) / m[row][row];
    }
    Some(coeffs)
}

/// Evaluate a polynomial with coefficients lowest order first.
pub fn eval_polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

// ---------------------------------------------------------------------------
// Contingency and order statistics
// ---------------------------------------------------------------------------

/// Odds ratio of a 2×2 table `[[a, b], [c, d]]`.
///
/// Adds 0.5 to every cell when any cell is zero (Haldane correction).
pub fn odds_ratio(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
    if a == 0.0 || b == 0.0 || c == 0.0 || d == 0.0 {
        ((a + 0.5) * (d + 0.5)) / ((b + 0.5) * (c + 0.5))
    } else {
        (a * d) / (b * c)
    }
}

/// Linearly interpolated percentile of sorted data, `q` in `[0, 1]`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
