//! Augmented Dickey–Fuller unit-root test with a constant term.
//!
//! Lag order is chosen by AIC over `0..=maxlag` augmentation lags with
//! `maxlag = ceil(12·(n/100)^¼)`, and the p-value uses MacKinnon's (1994)
//! response-surface approximation for a single integrated series.

use log::trace;

use crate::detection::linalg;
use crate::utils::error::{AppError, AppResult};
use crate::utils::stats;

// MacKinnon response surface, constant-only regression, one series.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

#[derive(Debug, Clone, PartialEq)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    /// Augmentation lags selected by AIC
    pub used_lag: usize,
    /// Observations in the final regression
    pub nobs: usize,
}

/// Runs the test on `series`.
///
/// A constant series is reported as stationary (statistic −∞, p = 0).
pub fn adfuller(series: &[f64]) -> AppResult<AdfResult> {
    let n = series.len();
    let lo = series.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if n > 0 && lo == hi {
        return Ok(AdfResult {
            statistic: f64::NEG_INFINITY,
            p_value: 0.0,
            used_lag: 0,
            nobs: n.saturating_sub(1),
        });
    }

    let max_lag = (n / 2) as i64 - 2;
    if max_lag < 0 {
        return Err(AppError::processing(format!(
            "series of {} observations is too short for the unit-root test",
            n
        )));
    }
    let max_lag = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil().min(max_lag as f64) as usize;

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    // Search over a common sample so the criteria are comparable.
    let mut best: Option<(f64, usize)> = None;
    for lags in 0..=max_lag {
        let (x, y) = design(series, &diffs, lags, max_lag);
        let Some(fit) = linalg::ols(&x, &y) else {
            continue;
        };
        let aic = fit.aic();
        trace!("ADF lag {} aic {:.4}", lags, aic);
        if best.map_or(true, |(best_aic, _)| aic < best_aic) {
            best = Some((aic, lags));
        }
    }
    let (_, used_lag) =
        best.ok_or_else(|| AppError::processing("unit-root regression is singular"))?;

    let (x, y) = design(series, &diffs, used_lag, used_lag);
    let fit = linalg::ols(&x, &y)
        .ok_or_else(|| AppError::processing("unit-root regression is singular"))?;
    let statistic = fit.t_value(1);

    Ok(AdfResult {
        statistic,
        p_value: mackinnon_p(statistic),
        used_lag,
        nobs: y.len(),
    })
}

/// Regression of Δy_t on [1, y_{t−1}, Δy_{t−1}, …, Δy_{t−lags}] over the sample
/// that `trim` lags leave available.
fn design(series: &[f64], diffs: &[f64], lags: usize, trim: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut x = Vec::with_capacity(diffs.len().saturating_sub(trim));
    let mut y = Vec::with_capacity(diffs.len().saturating_sub(trim));
    for t in trim..diffs.len() {
        let mut row = Vec::with_capacity(lags + 2);
        row.push(1.0);
        row.push(series[t]);
        row.extend((1..=lags).map(|k| diffs[t - k]));
        x.push(row);
        y.push(diffs[t]);
    }
    (x, y)
}

/// Approximate p-value of an ADF statistic (constant, no trend)
pub fn mackinnon_p(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coefficients: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    let poly = coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, c| acc * statistic + c);
    stats::normal_cdf(poly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_mackinnon_reference_points() {
        // 5% critical value for the constant-only case
        assert!((mackinnon_p(-2.86) - 0.05).abs() < 0.005);
        assert_eq!(mackinnon_p(3.0), 1.0);
        assert_eq!(mackinnon_p(-20.0), 0.0);
        assert!(mackinnon_p(-1.0) > 0.5);
    }

    #[test]
    fn test_white_noise_is_stationary() {
        let result = adfuller(&noise(200, 7)).unwrap();
        assert!(result.p_value < 0.05, "p = {}", result.p_value);
    }

    #[test]
    fn test_random_walk_is_not_stationary() {
        let walk: Vec<f64> = noise(200, 11)
            .into_iter()
            .scan(0.0, |level, step| {
                *level += step + 0.05;
                Some(*level)
            })
            .collect();
        let result = adfuller(&walk).unwrap();
        assert!(result.p_value > 0.05, "p = {}", result.p_value);
    }

    #[test]
    fn test_constant_series() {
        let result = adfuller(&[2.0; 10]).unwrap();
        assert_eq!(result.p_value, 0.0);
    }

    #[test]
    fn test_too_short() {
        assert!(adfuller(&[1.0, 2.0, 1.5]).is_err());
    }
}
