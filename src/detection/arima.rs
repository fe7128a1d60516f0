//! Seasonal ARIMA estimated by conditional sum of squares.
//!
//! The model is `φ(B)Φ(Bˢ)(1−B)ᵈ(1−Bˢ)ᴰ yₜ = θ(B)Θ(Bˢ) eₜ`, with a mean term only
//! when no differencing is applied. Starting values for the non-seasonal part come
//! from a Hannan–Rissanen regression; all coefficients are then refined with
//! Nelder–Mead on the conditional sum of squares.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::detection::adf;
use crate::detection::linalg;
use crate::detection::model::{residual_outcome, FittedModel, ModelKind, ModelOutcome, SeriesModel};
use crate::detection::optimize::NelderMead;
use crate::features::table::TimeSeries;
use crate::utils::error::{AppError, AppResult};
use crate::utils::stats;

/// Significance level of the stationarity check
pub const ADF_SIGNIFICANCE: f64 = 0.05;
/// Highest differencing order the stationarity check will reach
pub const MAX_DIFFERENCING: usize = 2;

/// Orders of a (seasonal) ARIMA model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl SarimaOrder {
    pub fn arima(order: [usize; 3]) -> Self {
        Self {
            p: order[0],
            d: order[1],
            q: order[2],
            ..Default::default()
        }
    }

    pub fn seasonal(order: [usize; 3], seasonal: [usize; 4]) -> Self {
        Self {
            p: order[0],
            d: order[1],
            q: order[2],
            seasonal_p: seasonal[0],
            seasonal_d: seasonal[1],
            seasonal_q: seasonal[2],
            period: seasonal[3],
        }
    }

    fn period(&self) -> usize {
        if self.period > 1 {
            self.period
        } else {
            0
        }
    }

    fn has_mean(&self) -> bool {
        self.d == 0 && (self.seasonal_d == 0 || self.period() == 0)
    }

    fn parameter_count(&self) -> usize {
        let seasonal = if self.period() > 0 {
            self.seasonal_p + self.seasonal_q
        } else {
            0
        };
        usize::from(self.has_mean()) + self.p + self.q + seasonal
    }
}

/// Multiplies two polynomials in the backshift operator
fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `1 + sign·c₁Bˢ + sign·c₂B²ˢ + …`
fn lag_poly(coefficients: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * step] = sign * c;
    }
    poly
}

/// Coefficients of `(1−B)ᵈ(1−Bˢ)ᴰ`
fn differencing_poly(order: &SarimaOrder) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..order.d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    let period = order.period();
    if period > 0 {
        let mut seasonal = vec![0.0; period + 1];
        seasonal[0] = 1.0;
        seasonal[period] = -1.0;
        for _ in 0..order.seasonal_d {
            poly = poly_mul(&poly, &seasonal);
        }
    }
    poly
}

fn apply_differencing(series: &[f64], poly: &[f64]) -> Vec<f64> {
    let degree = poly.len() - 1;
    (degree..series.len())
        .map(|t| poly.iter().enumerate().map(|(k, c)| c * series[t - k]).sum())
        .collect()
}

/// Unpacked coefficient vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmaCoefficients {
    pub mean: f64,
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
}

impl ArmaCoefficients {
    fn unpack(order: &SarimaOrder, params: &[f64]) -> Self {
        let mut rest = params;
        let mut take = |n: usize| {
            let (head, tail) = rest.split_at(n);
            rest = tail;
            head.to_vec()
        };
        let mean = if order.has_mean() { take(1)[0] } else { 0.0 };
        let seasonal = order.period() > 0;
        Self {
            mean,
            ar: take(order.p),
            seasonal_ar: take(if seasonal { order.seasonal_p } else { 0 }),
            ma: take(order.q),
            seasonal_ma: take(if seasonal { order.seasonal_q } else { 0 }),
        }
    }

    /// Lag coefficients `a₁…` of the expanded AR side (`zₜ = Σ aₖ zₜ₋ₖ + …`)
    fn ar_lags(&self, period: usize) -> Vec<f64> {
        let poly = poly_mul(
            &lag_poly(&self.ar, 1, -1.0),
            &lag_poly(&self.seasonal_ar, period.max(1), -1.0),
        );
        poly[1..].iter().map(|c| -c).collect()
    }

    /// Lag coefficients `b₁…` of the expanded MA side
    fn ma_lags(&self, period: usize) -> Vec<f64> {
        let poly = poly_mul(
            &lag_poly(&self.ma, 1, 1.0),
            &lag_poly(&self.seasonal_ma, period.max(1), 1.0),
        );
        poly[1..].to_vec()
    }
}

/// Innovations of an ARMA recursion over `z` from index `start`.
///
/// Values and innovations before the start of `z` are taken as zero.
fn innovations(z: &[f64], ar: &[f64], ma: &[f64], start: usize) -> Vec<f64> {
    let mut e = vec![0.0; z.len()];
    for t in start..z.len() {
        let ar_part: f64 = ar
            .iter()
            .enumerate()
            .take_while(|(k, _)| *k < t)
            .map(|(k, a)| a * z[t - k - 1])
            .sum();
        let ma_part: f64 = ma
            .iter()
            .enumerate()
            .take_while(|(k, _)| *k < t)
            .map(|(k, b)| b * e[t - k - 1])
            .sum();
        e[t] = z[t] - ar_part - ma_part;
    }
    e
}

/// A fitted seasonal ARIMA model
#[derive(Debug, Clone)]
pub struct FittedArima {
    pub order: SarimaOrder,
    pub coefficients: ArmaCoefficients,
    /// Conditional sum of squares at the optimum
    pub css: f64,
    history: Vec<f64>,
    differenced: Vec<f64>,
    /// Leading differenced values the sum of squares conditions on
    conditioned: usize,
    innovations: Vec<f64>,
    ar_lags: Vec<f64>,
    ma_lags: Vec<f64>,
    diff_poly: Vec<f64>,
}

impl FittedArima {
    /// In-sample one-step residuals
    pub fn residuals(&self) -> &[f64] {
        &self.innovations[self.conditioned..]
    }

    /// Population standard deviation of the in-sample residuals
    pub fn sigma(&self) -> f64 {
        stats::population_std(self.residuals())
    }

    /// Forecasts `steps` values past the end of the training series
    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        let mean = self.coefficients.mean;
        let mut z: Vec<f64> = self.differenced.iter().map(|w| w - mean).collect();
        let mut e = self.innovations.clone();

        for _ in 0..steps {
            let t = z.len();
            let ar_part: f64 = self
                .ar_lags
                .iter()
                .enumerate()
                .filter(|(k, _)| *k < t)
                .map(|(k, a)| a * z[t - k - 1])
                .sum();
            let ma_part: f64 = self
                .ma_lags
                .iter()
                .enumerate()
                .filter(|(k, _)| *k < t)
                .map(|(k, b)| b * e[t - k - 1])
                .sum();
            z.push(ar_part + ma_part);
            e.push(0.0);
        }

        // Undo the differencing: yₜ = wₜ − Σₖ≥₁ δₖ yₜ₋ₖ
        let mut y = self.history.clone();
        let start = self.differenced.len();
        for step in 0..steps {
            let w = z[start + step] + mean;
            let t = y.len();
            let carried: f64 = self.diff_poly[1..]
                .iter()
                .enumerate()
                .map(|(k, c)| c * y[t - k - 1])
                .sum();
            y.push(w - carried);
        }
        y.split_off(self.history.len())
    }
}

/// Fits `order` to `series`
pub fn fit(series: &[f64], order: SarimaOrder) -> AppResult<FittedArima> {
    if series.iter().any(|v| !v.is_finite()) {
        return Err(AppError::processing("series contains non-finite values"));
    }

    let diff_poly = differencing_poly(&order);
    let period = order.period();
    let k = order.parameter_count();
    let observed = series.len().saturating_sub(diff_poly.len() - 1);
    if observed <= k {
        return Err(AppError::processing(format!(
            "series of {} observations is too short for SARIMA({},{},{})x({},{},{},{}), need at least {}",
            series.len(),
            order.p,
            order.d,
            order.q,
            order.seasonal_p,
            order.seasonal_d,
            order.seasonal_q,
            order.period,
            diff_poly.len() + k
        )));
    }
    // Condition on the full AR span when the sample allows it, otherwise on as
    // many leading values as the parameter count leaves over.
    let ar_span = order.p + period * order.seasonal_p;
    let conditioned = ar_span.min(observed - k - 1);

    let differenced = apply_differencing(series, &diff_poly);
    let start = initial_parameters(&differenced, &order);

    let objective = |params: &[f64]| {
        let coefficients = ArmaCoefficients::unpack(&order, params);
        let z: Vec<f64> = differenced.iter().map(|w| w - coefficients.mean).collect();
        let ar = coefficients.ar_lags(period);
        let e = innovations(&z, &ar, &coefficients.ma_lags(period), conditioned);
        let css: f64 = e[conditioned..].iter().map(|x| x * x).sum();
        if css.is_finite() {
            css
        } else {
            f64::INFINITY
        }
    };

    let minimum = NelderMead::default().minimize(objective, &start);
    let coefficients = ArmaCoefficients::unpack(&order, &minimum.point);
    debug!(
        "SARIMA fit: {} iterations, css {:.6}, coefficients {:?}",
        minimum.iterations, minimum.value, coefficients
    );

    let ar_lags = coefficients.ar_lags(period);
    let ma_lags = coefficients.ma_lags(period);
    let z: Vec<f64> = differenced.iter().map(|w| w - coefficients.mean).collect();
    let innovations = innovations(&z, &ar_lags, &ma_lags, conditioned);

    Ok(FittedArima {
        order,
        coefficients,
        css: minimum.value,
        history: series.to_vec(),
        differenced,
        conditioned,
        innovations,
        ar_lags,
        ma_lags,
        diff_poly,
    })
}

/// Mean of the differenced series plus Hannan–Rissanen estimates for the
/// non-seasonal coefficients; seasonal coefficients start at zero.
fn initial_parameters(differenced: &[f64], order: &SarimaOrder) -> Vec<f64> {
    let mean = if order.has_mean() {
        stats::mean(differenced)
    } else {
        0.0
    };
    let z: Vec<f64> = differenced.iter().map(|w| w - mean).collect();
    let (ar, ma) = hannan_rissanen(&z, order.p, order.q)
        .unwrap_or_else(|| (vec![0.0; order.p], vec![0.0; order.q]));

    let seasonal = order.period() > 0;
    let mut params = Vec::with_capacity(order.parameter_count());
    if order.has_mean() {
        params.push(mean);
    }
    params.extend(ar.iter().map(|c| c.clamp(-0.95, 0.95)));
    params.extend(std::iter::repeat(0.0).take(if seasonal { order.seasonal_p } else { 0 }));
    params.extend(ma.iter().map(|c| c.clamp(-0.95, 0.95)));
    params.extend(std::iter::repeat(0.0).take(if seasonal { order.seasonal_q } else { 0 }));
    params
}

fn hannan_rissanen(z: &[f64], p: usize, q: usize) -> Option<(Vec<f64>, Vec<f64>)> {
    if p + q == 0 {
        return Some((Vec::new(), Vec::new()));
    }

    let lagged = |t: usize, lags: usize, source: &[f64]| -> Vec<f64> {
        (1..=lags).map(|k| source[t - k]).collect()
    };

    let residuals = if q > 0 {
        // Long autoregression approximates the innovations.
        let long = ((12.0 * (z.len() as f64 / 100.0).powf(0.25)).floor() as usize)
            .max(p + q)
            .min(z.len().saturating_sub(1) / 2);
        if long == 0 {
            return None;
        }
        let x: Vec<Vec<f64>> = (long..z.len()).map(|t| lagged(t, long, z)).collect();
        let fit = linalg::ols(&x, &z[long..])?;
        let mut e = vec![0.0; long];
        e.extend(fit.residuals);
        Some((long, e))
    } else {
        None
    };

    let first = match &residuals {
        Some((long, _)) => p.max(long + q),
        None => p,
    };
    if first >= z.len() {
        return None;
    }
    let rows: Vec<Vec<f64>> = (first..z.len())
        .map(|t| {
            let mut row = lagged(t, p, z);
            if let Some((_, e)) = &residuals {
                row.extend(lagged(t, q, e));
            }
            row
        })
        .collect();
    let fit = linalg::ols(&rows, &z[first..])?;
    let (ar, ma) = fit.coefficients.split_at(p);
    Some((ar.to_vec(), ma.to_vec()))
}

/// Parameters of the ARIMA detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaParams {
    /// (p, d, q); d is raised while the training series looks non-stationary
    pub order: [usize; 3],
    pub sigma_multiplier: f64,
}

impl Default for ArimaParams {
    fn default() -> Self {
        Self {
            order: [2, 1, 2],
            sigma_multiplier: 3.0,
        }
    }
}

/// Parameters of the SARIMA detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarimaParams {
    pub order: [usize; 3],
    /// (P, D, Q, s)
    pub seasonal_order: [usize; 4],
    pub sigma_multiplier: f64,
}

impl Default for SarimaParams {
    fn default() -> Self {
        Self {
            order: [1, 1, 1],
            seasonal_order: [1, 1, 1, 12],
            sigma_multiplier: 3.0,
        }
    }
}

/// Differencing order chosen by repeated ADF tests.
///
/// The level series is tested first; while it looks non-stationary and `d` is
/// below the cap, it is differenced once more, `d` grows and the test is repeated.
/// A series too short for the test keeps the order reached so far.
pub fn select_differencing(series: &[f64], initial_d: usize) -> usize {
    let mut d = initial_d;
    let mut current = series.to_vec();
    loop {
        let result = match adf::adfuller(&current) {
            Ok(result) => result,
            Err(e) => {
                warn!("Keeping differencing order {}: {}", d, e);
                return d;
            }
        };
        debug!(
            "ADF statistic {:.4}, p-value {:.4}, differencing order {}",
            result.statistic, result.p_value, d
        );
        if result.p_value <= ADF_SIGNIFICANCE || d >= MAX_DIFFERENCING {
            return d;
        }
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
        d += 1;
    }
}

fn score_forecast(
    fitted: FittedArima,
    test: &TimeSeries,
    sigma_multiplier: f64,
) -> ModelOutcome {
    let forecast = fitted.forecast(test.len());
    let mut outcome = residual_outcome(forecast, test, fitted.sigma(), sigma_multiplier);
    info!(
        "{} of {} test windows outside ±{:.4}",
        outcome.anomaly_count(),
        test.len(),
        outcome.threshold.unwrap_or_default()
    );
    outcome.model = Some(FittedModel::Arima(Box::new(fitted)));
    outcome
}

impl SeriesModel for ArimaParams {
    fn kind(&self) -> ModelKind {
        ModelKind::Arima
    }

    fn detect(&self, train: &TimeSeries, test: &TimeSeries) -> AppResult<ModelOutcome> {
        let d = select_differencing(&train.values, self.order[1]);
        let order = SarimaOrder::arima([self.order[0], d, self.order[2]]);
        info!("Fitting ARIMA({},{},{}) on {} windows", order.p, order.d, order.q, train.len());
        let fitted = fit(&train.values, order)?;
        Ok(score_forecast(fitted, test, self.sigma_multiplier))
    }
}

impl SeriesModel for SarimaParams {
    fn kind(&self) -> ModelKind {
        ModelKind::Sarima
    }

    fn detect(&self, train: &TimeSeries, test: &TimeSeries) -> AppResult<ModelOutcome> {
        let mut order = SarimaOrder::seasonal(self.order, self.seasonal_order);
        let period = order.period();
        if period > 0 && train.len() < 2 * period {
            warn!(
                "{} training windows cover fewer than two seasons of {}, fitting without seasonal terms",
                train.len(),
                period
            );
            order = SarimaOrder::arima(self.order);
        }
        info!(
            "Fitting SARIMA({},{},{})x({},{},{},{}) on {} windows",
            order.p,
            order.d,
            order.q,
            order.seasonal_p,
            order.seasonal_d,
            order.seasonal_q,
            order.period,
            train.len()
        );
        let fitted = fit(&train.values, order)?;
        Ok(score_forecast(fitted, test, self.sigma_multiplier))
    }
}
