//! Additive trend + seasonality model with a simulated predictive interval.
//!
//! `y(t) = g(t) + s(t) + ε`, where `g` is piecewise linear with changepoints spread
//! over the first part of the history and `s` is a sum of weekly and daily Fourier
//! terms. Coefficients are the MAP estimate under Gaussian priors (ridge), and the
//! interval comes from Monte Carlo draws of future trend changes plus observation
//! noise.

use log::{debug, info};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Normal, Poisson};
use std::f64::consts::PI;

use crate::detection::linalg;
use crate::detection::model::{FittedModel, ModelKind, ModelOutcome, SeriesModel};
use crate::features::table::TimeSeries;
use crate::utils::error::{AppError, AppResult};
use crate::utils::stats;

const SECONDS_PER_DAY: f64 = 86_400.0;
const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const DAILY_PERIOD_DAYS: f64 = 1.0;
/// Prior standard deviation of the base growth rate and offset
const TREND_PRIOR_SCALE: f64 = 5.0;
const MIN_NOISE_VARIANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProphetParams {
    /// Probability mass covered by the predictive interval
    pub interval_width: f64,
    /// Scale of the Laplace prior on trend changes
    pub changepoint_prior_scale: f64,
    pub n_changepoints: usize,
    /// Share of the history in which changepoints may be placed
    pub changepoint_range: f64,
    pub weekly_fourier_order: usize,
    pub daily_fourier_order: usize,
    pub seasonality_prior_scale: f64,
    pub uncertainty_samples: usize,
    pub seed: u64,
}

impl Default for ProphetParams {
    fn default() -> Self {
        Self {
            interval_width: 0.95,
            changepoint_prior_scale: 0.05,
            n_changepoints: 25,
            changepoint_range: 0.8,
            weekly_fourier_order: 3,
            daily_fourier_order: 4,
            seasonality_prior_scale: 10.0,
            uncertainty_samples: 1000,
            seed: 42,
        }
    }
}

/// A fitted additive model
#[derive(Debug, Clone)]
pub struct FittedProphet {
    pub params: ProphetParams,
    t_start: f64,
    t_scale: f64,
    y_scale: f64,
    /// Changepoint locations on the scaled time axis
    changepoints: Vec<f64>,
    /// `[m, k, δ…, seasonal β…]` on the scaled axes
    coefficients: Vec<f64>,
    /// Residual standard deviation on the scaled value axis
    sigma_obs: f64,
}

impl FittedProphet {
    fn scaled_time(&self, timestamp: f64) -> f64 {
        (timestamp - self.t_start) / self.t_scale
    }

    fn design_row(&self, timestamp: f64) -> Vec<f64> {
        design_row(
            timestamp,
            self.scaled_time(timestamp),
            &self.changepoints,
            &self.params,
        )
    }

    /// Point forecasts
    pub fn predict(&self, timestamps: &[f64]) -> Vec<f64> {
        timestamps
            .iter()
            .map(|ts| linalg::dot(&self.design_row(*ts), &self.coefficients) * self.y_scale)
            .collect()
    }

    /// Lower and upper interval bounds from simulated futures
    pub fn predict_interval(&self, timestamps: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let point = self.predict(timestamps);
        let samples = self.params.uncertainty_samples;
        if samples == 0 {
            return (point.clone(), point);
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let t: Vec<f64> = timestamps.iter().map(|ts| self.scaled_time(*ts)).collect();
        let horizon = t.iter().copied().fold(1.0f64, f64::max);

        let deltas = &self.coefficients[2..2 + self.changepoints.len()];
        let change_scale = deltas.iter().map(|d| d.abs()).sum::<f64>()
            / deltas.len().max(1) as f64
            + 1e-8;
        let change_rate = self.changepoints.len() as f64 * (horizon - 1.0);
        let arrivals = Poisson::new(change_rate).ok();
        let noise = Normal::new(0.0, self.sigma_obs).ok();

        let mut draws: Vec<Vec<f64>> = vec![Vec::with_capacity(samples); t.len()];
        for _ in 0..samples {
            let n_changes = arrivals.as_ref().map_or(0, |p| p.sample(&mut rng) as usize);
            let future_changes: Vec<(f64, f64)> = (0..n_changes)
                .map(|_| {
                    let at = 1.0 + rng.gen::<f64>() * (horizon - 1.0);
                    (at, laplace(&mut rng, change_scale))
                })
                .collect();

            for (i, ti) in t.iter().enumerate() {
                let trend_shift: f64 = future_changes
                    .iter()
                    .map(|(at, delta)| delta * (ti - at).max(0.0))
                    .sum();
                let eps = noise.as_ref().map_or(0.0, |n| n.sample(&mut rng));
                draws[i].push(point[i] + (trend_shift + eps) * self.y_scale);
            }
        }

        let lower_q = 100.0 * (1.0 - self.params.interval_width) / 2.0;
        let upper_q = 100.0 * (1.0 + self.params.interval_width) / 2.0;
        draws
            .iter()
            .map(|d| (stats::percentile(d, lower_q), stats::percentile(d, upper_q)))
            .unzip()
    }
}

fn laplace<R: Rng>(rng: &mut R, scale: f64) -> f64 {
    let u = rng.gen::<f64>() - 0.5;
    -scale * u.signum() * (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE).ln()
}

fn fourier(days: f64, period: f64, order: usize, row: &mut Vec<f64>) {
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * days / period;
        row.push(angle.sin());
        row.push(angle.cos());
    }
}

fn design_row(timestamp: f64, t: f64, changepoints: &[f64], params: &ProphetParams) -> Vec<f64> {
    let mut row = Vec::with_capacity(
        2 + changepoints.len() + 2 * (params.weekly_fourier_order + params.daily_fourier_order),
    );
    row.push(1.0);
    row.push(t);
    row.extend(changepoints.iter().map(|s| (t - s).max(0.0)));
    let days = timestamp / SECONDS_PER_DAY;
    fourier(days, WEEKLY_PERIOD_DAYS, params.weekly_fourier_order, &mut row);
    fourier(days, DAILY_PERIOD_DAYS, params.daily_fourier_order, &mut row);
    row
}

/// Changepoint positions: evenly spaced rows within the first
/// `changepoint_range` share of the history, excluding the first row.
fn changepoints(t: &[f64], params: &ProphetParams) -> Vec<f64> {
    let hist_size = (t.len() as f64 * params.changepoint_range).floor() as usize;
    let count = params.n_changepoints.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }
    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|i| {
            let index = (last * i as f64 / count as f64).round() as usize;
            t[index]
        })
        .collect()
}

/// Fits the model to `train`
pub fn fit(train: &TimeSeries, params: &ProphetParams) -> AppResult<FittedProphet> {
    if train.len() < 2 {
        return Err(AppError::processing(
            "additive model needs at least 2 training points",
        ));
    }

    let t_start = train.timestamps[0];
    let span = train.timestamps[train.len() - 1] - t_start;
    let t_scale = if span > 0.0 { span } else { 1.0 };
    let y_max = train.values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let y_scale = if y_max > 0.0 { y_max } else { 1.0 };

    let t: Vec<f64> = train.timestamps.iter().map(|ts| (ts - t_start) / t_scale).collect();
    let y: Vec<f64> = train.values.iter().map(|v| v / y_scale).collect();
    let changepoints = changepoints(&t, params);

    let x: Vec<Vec<f64>> = train
        .timestamps
        .iter()
        .zip(&t)
        .map(|(ts, ti)| design_row(*ts, *ti, &changepoints, params))
        .collect();

    // Prior variances per coefficient: trend, changepoints (Laplace variance 2b²),
    // seasonality.
    let mut prior_variance = vec![TREND_PRIOR_SCALE.powi(2); 2];
    prior_variance.extend(
        std::iter::repeat(2.0 * params.changepoint_prior_scale.powi(2)).take(changepoints.len()),
    );
    prior_variance.resize(x[0].len(), params.seasonality_prior_scale.powi(2));

    let mut noise_variance = stats::population_std(&y).powi(2).max(MIN_NOISE_VARIANCE);
    let mut coefficients = Vec::new();
    for _ in 0..2 {
        let penalties: Vec<f64> = prior_variance.iter().map(|v| noise_variance / v).collect();
        coefficients = linalg::ridge(&x, &y, &penalties)
            .ok_or_else(|| AppError::processing("additive model design is singular"))?;
        let mse = x
            .iter()
            .zip(&y)
            .map(|(row, target)| (target - linalg::dot(row, &coefficients)).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        noise_variance = mse.max(MIN_NOISE_VARIANCE);
    }

    let residual_sq: f64 = x
        .iter()
        .zip(&y)
        .map(|(row, target)| (target - linalg::dot(row, &coefficients)).powi(2))
        .sum();
    let sigma_obs = (residual_sq / y.len() as f64).sqrt();
    debug!(
        "Additive model: {} changepoints, sigma {:.6} (scaled)",
        changepoints.len(),
        sigma_obs
    );

    Ok(FittedProphet {
        params: params.clone(),
        t_start,
        t_scale,
        y_scale,
        changepoints,
        coefficients,
        sigma_obs,
    })
}

impl SeriesModel for ProphetParams {
    fn kind(&self) -> ModelKind {
        ModelKind::Prophet
    }

    fn detect(&self, train: &TimeSeries, test: &TimeSeries) -> AppResult<ModelOutcome> {
        info!("Fitting additive seasonal model on {} windows", train.len());
        let fitted = fit(train, self)?;
        let predictions = fitted.predict(&test.timestamps);
        let (lower, upper) = fitted.predict_interval(&test.timestamps);

        let scores: Vec<f64> = test
            .values
            .iter()
            .zip(lower.iter().zip(&upper))
            .map(|(actual, (lo, hi))| {
                if actual < lo {
                    lo - actual
                } else if actual > hi {
                    actual - hi
                } else {
                    0.0
                }
            })
            .collect();
        let anomalies: Vec<bool> = test
            .values
            .iter()
            .zip(lower.iter().zip(&upper))
            .map(|(actual, (lo, hi))| actual < lo || actual > hi)
            .collect();

        let outcome = ModelOutcome {
            predictions: Some(TimeSeries::new(test.timestamps.clone(), predictions)),
            lower_bound: Some(TimeSeries::new(test.timestamps.clone(), lower)),
            upper_bound: Some(TimeSeries::new(test.timestamps.clone(), upper)),
            anomalies,
            anomaly_scores: scores,
            model: Some(FittedModel::Prophet(Box::new(fitted))),
            ..Default::default()
        };
        info!(
            "{} of {} test windows outside the {:.0}% interval",
            outcome.anomaly_count(),
            test.len(),
            self.interval_width * 100.0
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize, f: impl Fn(usize) -> f64) -> TimeSeries {
        let start = 1_700_000_000.0;
        TimeSeries::new(
            (0..n).map(|i| start + i as f64).collect(),
            (0..n).map(f).collect(),
        )
    }

    #[test]
    fn test_changepoint_placement() {
        let t: Vec<f64> = (0..10).map(|i| i as f64 / 9.0).collect();
        let params = ProphetParams::default();
        let cps = changepoints(&t, &params);
        // hist size 8, at most 7 changepoints at rows 1..=7
        assert_eq!(cps.len(), 7);
        assert_eq!(cps[0], t[1]);
        assert_eq!(cps[6], t[7]);
    }

    #[test]
    fn test_linear_trend_extrapolates() {
        let train = series(40, |i| 100.0 + 2.0 * i as f64);
        let fitted = fit(&train, &ProphetParams::default()).unwrap();
        let next = [train.timestamps[39] + 1.0, train.timestamps[39] + 5.0];
        let predicted = fitted.predict(&next);
        assert!((predicted[0] - 180.0).abs() < 2.0, "{:?}", predicted);
        assert!((predicted[1] - 188.0).abs() < 3.0, "{:?}", predicted);
    }

    #[test]
    fn test_interval_contains_prediction() {
        let train = series(50, |i| 20.0 + if i % 2 == 0 { 1.0 } else { -1.0 });
        let fitted = fit(&train, &ProphetParams::default()).unwrap();
        let future: Vec<f64> = (50..60).map(|i| train.timestamps[0] + i as f64).collect();
        let point = fitted.predict(&future);
        let (lower, upper) = fitted.predict_interval(&future);
        for i in 0..future.len() {
            assert!(lower[i] <= point[i] + 1e-9 && point[i] <= upper[i] + 1e-9);
            assert!(upper[i] > lower[i]);
        }
    }

    #[test]
    fn test_detect_flags_outlier() {
        let full = series(60, |i| {
            let base = 50.0 + if i % 2 == 0 { 1.0 } else { -1.0 };
            if i == 55 {
                base + 200.0
            } else {
                base
            }
        });
        let (train, test) = full.split_at(42);
        let outcome = ProphetParams::default().detect(&train, &test).unwrap();

        assert_eq!(outcome.anomalies.len(), test.len());
        assert!(outcome.anomalies[13]);
        assert!(outcome.anomaly_scores[13] > 100.0);
        assert!(outcome.threshold.is_none());
        for (flag, score) in outcome.anomalies.iter().zip(&outcome.anomaly_scores) {
            assert_eq!(*flag, *score > 0.0);
        }
    }

    #[test]
    fn test_same_seed_same_interval() {
        let train = series(30, |i| (i % 5) as f64);
        let fitted = fit(&train, &ProphetParams::default()).unwrap();
        let future = vec![train.timestamps[29] + 3.0];
        assert_eq!(fitted.predict_interval(&future), fitted.predict_interval(&future));
    }

    #[test]
    fn test_needs_two_points() {
        let train = series(1, |_| 1.0);
        assert!(fit(&train, &ProphetParams::default()).is_err());
    }
}
