//! Dense least squares for the small regressions used by the models.

/// Row-major dense matrix
pub type Matrix = Vec<Vec<f64>>;

const PIVOT_EPSILON: f64 = 1e-12;

/// Inverts a square matrix by Gauss-Jordan elimination with partial pivoting.
///
/// Returns `None` when the matrix is singular to working precision.
pub fn invert(a: &[Vec<f64>]) -> Option<Matrix> {
    let n = a.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    let mut work: Matrix = a
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut extended = row.clone();
            extended.extend((0..n).map(|j| if i == j { 1.0 } else { 0.0 }));
            extended
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| work[r1][col].abs().total_cmp(&work[r2][col].abs()))?;
        if work[pivot][col].abs() <= PIVOT_EPSILON * scale {
            return None;
        }
        work.swap(col, pivot);

        let p = work[col][col];
        for value in work[col].iter_mut() {
            *value /= p;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..2 * n {
                work[row][k] -= factor * work[col][k];
            }
        }
    }

    Some(work.into_iter().map(|row| row[n..].to_vec()).collect())
}

/// Solves `a x = b`
pub fn solve(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let inverse = invert(a)?;
    Some(inverse.iter().map(|row| dot(row, b)).collect())
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `XᵀX` and `Xᵀy` for design rows `x`
fn normal_equations(x: &[Vec<f64>], y: &[f64]) -> (Matrix, Vec<f64>) {
    let k = x.first().map_or(0, Vec::len);
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, target) in x.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * target;
            for j in i..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }
    (xtx, xty)
}

/// Ordinary least squares fit
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Sum of squared residuals
    pub ssr: f64,
    pub nobs: usize,
}

impl OlsFit {
    /// Gaussian log-likelihood at the fitted coefficients
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion, counting every regressor
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.coefficients.len() as f64
    }

    pub fn t_value(&self, index: usize) -> f64 {
        self.coefficients[index] / self.std_errors[index]
    }
}

/// Fits `y ≈ X β`. `None` when the design is rank deficient or has no residual
/// degrees of freedom.
pub fn ols(x: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let nobs = y.len();
    let k = x.first().map_or(0, Vec::len);
    if k == 0 || nobs <= k || x.len() != nobs {
        return None;
    }

    let (xtx, xty) = normal_equations(x, y);
    let inverse = invert(&xtx)?;
    let coefficients: Vec<f64> = inverse.iter().map(|row| dot(row, &xty)).collect();
    let residuals: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(row, target)| target - dot(row, &coefficients))
        .collect();
    let ssr: f64 = residuals.iter().map(|r| r * r).sum();
    let s2 = ssr / (nobs - k) as f64;
    let std_errors = (0..k).map(|i| (s2 * inverse[i][i]).max(0.0).sqrt()).collect();

    Some(OlsFit {
        coefficients,
        std_errors,
        residuals,
        ssr,
        nobs,
    })
}

/// Penalized least squares: minimizes `‖y − Xβ‖² + Σ penalties[i]·βᵢ²`
pub fn ridge(x: &[Vec<f64>], y: &[f64], penalties: &[f64]) -> Option<Vec<f64>> {
    let k = x.first().map_or(0, Vec::len);
    if k == 0 || penalties.len() != k {
        return None;
    }
    let (mut xtx, xty) = normal_equations(x, y);
    for (i, penalty) in penalties.iter().enumerate() {
        xtx[i][i] += penalty;
    }
    solve(&xtx, &xty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invert_2x2() {
        let inv = invert(&[vec![4.0, 7.0], vec![2.0, 6.0]]).unwrap();
        assert!((inv[0][0] - 0.6).abs() < 1e-12);
        assert!((inv[0][1] + 0.7).abs() < 1e-12);
        assert!((inv[1][0] + 0.2).abs() < 1e-12);
        assert!((inv[1][1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_singular_matrix() {
        assert!(invert(&[vec![1.0, 2.0], vec![2.0, 4.0]]).is_none());
    }

    #[test]
    fn test_ols_recovers_line() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..10)
            .map(|i| 3.0 + 2.0 * i as f64 + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let fit = ols(&x, &y).unwrap();
        assert!((fit.coefficients[0] - 3.0).abs() < 0.1);
        assert!((fit.coefficients[1] - 2.0).abs() < 0.05);
        assert!(fit.std_errors.iter().all(|s| *s > 0.0));
        assert!(fit.aic().is_finite());
    }

    #[test]
    fn test_ols_needs_degrees_of_freedom() {
        let x = vec![vec![1.0, 0.0], vec![1.0, 1.0]];
        assert!(ols(&x, &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_ridge_shrinks() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..5).map(|i| 2.0 * i as f64).collect();
        let free = ridge(&x, &y, &[0.0]).unwrap();
        let shrunk = ridge(&x, &y, &[100.0]).unwrap();
        assert!((free[0] - 2.0).abs() < 1e-12);
        assert!(shrunk[0] < free[0]);
    }
}
