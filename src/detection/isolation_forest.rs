//! Isolation forest over window features augmented with rolling statistics.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::detection::model::{FittedModel, ModelOutcome};
use crate::features::table::FeatureTable;
use crate::utils::error::{AppError, AppResult};
use crate::utils::stats;

/// Columns never used as model input
pub const NON_FEATURE_COLUMNS: [&str; 3] = ["timestamp", "label", "source"];

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Expected share of outliers; sets the decision offset
    pub contamination: f64,
    pub seed: u64,
    /// Window of the `_roll_mean` / `_roll_std` companions
    pub rolling_window: usize,
    /// Upper bound of the per-tree subsample
    pub max_samples: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.1,
            seed: 42,
            rolling_window: 10,
            max_samples: 256,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Expected path length of an unsuccessful search in a binary tree of `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A fitted isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    n_features: usize,
    /// Scores below this are outliers
    pub offset: f64,
    /// Input column names, in matrix order
    pub feature_names: Vec<String>,
}

impl IsolationForest {
    /// Fits on row-major `data`
    pub fn fit(data: &[Vec<f64>], params: &ForestParams) -> AppResult<Self> {
        let n = data.len();
        let n_features = data.first().map_or(0, Vec::len);
        if n == 0 || n_features == 0 {
            return Err(AppError::processing("isolation forest needs a non-empty training set"));
        }
        if params.n_estimators == 0 {
            return Err(AppError::configuration("n_estimators must be at least 1"));
        }

        let sample_size = params.max_samples.max(1).min(n);
        let depth_limit = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let rows = index::sample(&mut rng, n, sample_size).into_vec();
                build(data, rows, 0, depth_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features,
            offset: 0.0,
            feature_names: Vec::new(),
        };
        let train_scores = forest.score_samples(data);
        forest.offset = stats::percentile(&train_scores, 100.0 * params.contamination);
        debug!(
            "Isolation forest: {} trees, subsample {}, offset {:.6}",
            forest.trees.len(),
            sample_size,
            forest.offset
        );
        Ok(forest)
    }

    /// Opposite of the anomaly score; lower is more abnormal, in [-1, 0)
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        let normalizer = average_path_length(self.sample_size);
        data.iter()
            .map(|row| {
                let mean_depth = self.trees.iter().map(|tree| path_length(tree, row)).sum::<f64>()
                    / self.trees.len() as f64;
                let ratio = if normalizer > 0.0 {
                    mean_depth / normalizer
                } else {
                    1.0
                };
                -(2f64.powf(-ratio))
            })
            .collect()
    }

    /// True for rows scored below the offset
    pub fn predict_outliers(&self, scores: &[f64]) -> Vec<bool> {
        scores.iter().map(|s| *s < self.offset).collect()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn build(
    data: &[Vec<f64>],
    rows: Vec<usize>,
    depth: usize,
    depth_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= depth_limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    let n_features = data[rows[0]].len();
    let candidates: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|feature| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][feature]), hi.max(data[r][feature]))
            });
            (hi > lo).then_some((feature, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build(data, left, depth + 1, depth_limit, rng)),
        right: Box::new(build(data, right, depth + 1, depth_limit, rng)),
    }
}

fn path_length(tree: &Node, row: &[f64]) -> f64 {
    let mut node = tree;
    let mut depth = 0usize;
    loop {
        match node {
            Node::Leaf { size } => return depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                node = if row[*feature] <= *threshold { left } else { right };
                depth += 1;
            }
        }
    }
}

/// Resolves the model input columns: the caller's list (each must exist) or every
/// numeric column except timestamp/label/source.
pub fn feature_columns(table: &FeatureTable, requested: Option<&[String]>) -> AppResult<Vec<String>> {
    let columns: Vec<String> = match requested {
        Some(requested) => {
            if let Some(missing) = requested.iter().find(|c| !table.has_column(c)) {
                return Err(AppError::configuration(format!(
                    "feature column '{}' not found",
                    missing
                )));
            }
            requested.to_vec()
        }
        None => table
            .column_names()
            .filter(|name| !NON_FEATURE_COLUMNS.contains(name))
            .map(str::to_string)
            .collect(),
    };
    if columns.is_empty() {
        return Err(AppError::configuration("no feature columns selected"));
    }
    Ok(columns)
}

/// Row-major matrix of `columns` followed by a rolling mean and rolling std per
/// column, computed within `table` only.
pub fn rolling_matrix(
    table: &FeatureTable,
    columns: &[String],
    window: usize,
) -> AppResult<(Vec<String>, Vec<Vec<f64>>)> {
    let mut names = columns.to_vec();
    let mut series: Vec<Vec<f64>> = Vec::with_capacity(columns.len() * 3);
    for name in columns {
        let values = table
            .column(name)
            .ok_or_else(|| AppError::configuration(format!("feature column '{}' not found", name)))?;
        series.push(values.to_vec());
    }
    for name in columns {
        let values = table.column(name).unwrap_or_default();
        names.push(format!("{}_roll_mean", name));
        series.push(stats::rolling_mean(values, window));
        names.push(format!("{}_roll_std", name));
        series.push(stats::rolling_std(values, window));
    }

    let rows = (0..table.len())
        .map(|r| series.iter().map(|s| s[r]).collect())
        .collect();
    Ok((names, rows))
}

impl ForestParams {
    /// Fits on `train` and scores `test`
    pub fn detect(
        &self,
        train: &FeatureTable,
        test: &FeatureTable,
        feature_cols: Option<&[String]>,
    ) -> AppResult<ModelOutcome> {
        let columns = feature_columns(train, feature_cols)?;
        let (names, x_train) = rolling_matrix(train, &columns, self.rolling_window)?;
        let (_, x_test) = rolling_matrix(test, &columns, self.rolling_window)?;
        info!(
            "Fitting isolation forest on {} windows x {} features",
            x_train.len(),
            names.len()
        );

        let mut forest = IsolationForest::fit(&x_train, self)?;
        forest.feature_names = names;
        let scores = forest.score_samples(&x_test);
        let anomalies = forest.predict_outliers(&scores);

        let outcome = ModelOutcome {
            anomalies,
            anomaly_scores: scores.iter().map(|s| -s).collect(),
            model: Some(FittedModel::IsolationForest(Box::new(forest))),
            ..Default::default()
        };
        info!(
            "{} of {} test windows isolated as outliers",
            outcome.anomaly_count(),
            test.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::window::WindowFeatures;

    fn cluster(n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.244).abs() < 0.01);
    }

    #[test]
    fn test_outlier_scores_lower() {
        let forest = IsolationForest::fit(&cluster(200, 1), &ForestParams::default()).unwrap();
        let scores = forest.score_samples(&[vec![0.0, 0.0], vec![8.0, -8.0]]);
        assert!(scores[1] < scores[0]);
        assert!(scores.iter().all(|s| (-1.0..0.0).contains(s)));
        assert_eq!(forest.predict_outliers(&scores), vec![false, true]);
    }

    #[test]
    fn test_contamination_sets_offset() {
        let data = cluster(100, 2);
        let forest = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        let flagged = forest
            .predict_outliers(&forest.score_samples(&data))
            .into_iter()
            .filter(|f| *f)
            .count();
        assert!((5..=15).contains(&flagged), "flagged {}", flagged);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = cluster(50, 3);
        let a = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        let b = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        assert_eq!(a.score_samples(&data), b.score_samples(&data));
    }

    #[test]
    fn test_constant_data_is_a_leaf() {
        let data = vec![vec![1.0, 1.0]; 20];
        let forest = IsolationForest::fit(&data, &ForestParams::default()).unwrap();
        assert!(forest.predict_outliers(&forest.score_samples(&data)).iter().all(|f| !f));
    }

    fn table(counts: &[u64]) -> FeatureTable {
        let windows: Vec<WindowFeatures> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| WindowFeatures {
                timestamp: i as f64,
                packet_count: *c,
                byte_count: c * 60,
                label: "unknown".into(),
                ..Default::default()
            })
            .collect();
        FeatureTable::from_windows(&windows)
    }

    #[test]
    fn test_rolling_matrix_layout() {
        let t = table(&[1, 3, 5]);
        let cols = vec!["packet_count".to_string()];
        let (names, rows) = rolling_matrix(&t, &cols, 10).unwrap();
        assert_eq!(
            names,
            vec!["packet_count", "packet_count_roll_mean", "packet_count_roll_std"]
        );
        assert_eq!(rows[0], vec![1.0, 1.0, 0.0]);
        assert_eq!(rows[2][1], 3.0);
        assert!((rows[2][2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_feature_column() {
        let t = table(&[1, 2]);
        let cols = vec!["nope".to_string()];
        assert!(matches!(
            feature_columns(&t, Some(&cols)),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_detect_on_tables() {
        let mut counts: Vec<u64> = (0..40).map(|i| 10 + (i % 3)).collect();
        counts[35] = 400;
        let t = table(&counts);
        let (train, test) = (t.slice(0..28), t.slice(28..40));
        let cols = vec!["packet_count".to_string(), "byte_count".to_string()];

        let outcome = ForestParams::default()
            .detect(&train, &test, Some(&cols))
            .unwrap();
        assert_eq!(outcome.anomalies.len(), 12);
        assert!(outcome.anomalies[7]);
        assert!(outcome.anomaly_scores.iter().all(|s| *s > 0.0));
    }
}
