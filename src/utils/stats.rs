//! Descriptive statistics shared by the windowizer, the post-processor and the
//! model bank.
//!
//! Conventions follow the dataframe semantics the feature table is specified in:
//! `sample_std` uses `n - 1` (and is 0 below two samples), `population_std` uses `n`.

use std::collections::HashMap;
use std::hash::Hash;

use statrs::function::erf::{erfc, erfc_inv};
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics, Statistics};

/// Summary of a sample, as produced for packet sizes and inter-arrival times.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// Summarizes `values` with a sample standard deviation. Empty input is all zeros.
pub fn summarize(values: &[f64]) -> Summary {
    if values.is_empty() {
        return Summary::default();
    }
    let mut data = Data::new(values.to_vec());

    Summary {
        mean: data.mean().unwrap_or(0.0),
        std_dev: if values.len() > 1 {
            data.std_dev().unwrap_or(0.0)
        } else {
            0.0
        },
        min: data.min(),
        max: data.max(),
        median: data.median(),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::mean(values.iter())
}

pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(values.iter())
}

pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::population_std_dev(values.iter())
}

/// Shannon entropy (base 2) of the distribution of `values`.
///
/// Zero when fewer than two distinct values are present.
pub fn shannon_entropy<T, I>(values: I) -> f64
where
    T: Hash + Eq,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut total = 0usize;
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
        total += 1;
    }
    if counts.len() <= 1 {
        return 0.0;
    }

    let total = total as f64;
    -counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Trailing rolling mean with `min_periods = 1`.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean(&values[start..=i])
        })
        .collect()
}

/// Trailing rolling sample standard deviation, 0 where fewer than two samples exist.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            sample_std(&values[start..=i])
        })
        .collect()
}

/// Percentile with linear interpolation between closest ranks (`q` in 0..=100).
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile function, `p` in (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}
