//! Pure transformations applied to a windowed feature table: gap filling onto the
//! full time grid and derived time-series columns.

use log::debug;
use std::collections::BTreeMap;

use crate::features::table::{Column, FeatureTable};
use crate::utils::stats;

/// Columns that receive lag/rolling derivatives
pub const KEY_COLUMNS: [&str; 4] = ["packet_count", "byte_count", "unique_flows", "entropy_dst_ip"];

/// Trailing window of the rolling derivatives
pub const ROLLING_WINDOW: usize = 5;

/// Label used for filled rows when no label exists at all
pub const FALLBACK_LABEL: &str = "unknown";

/// Reindexes `table` onto the contiguous grid `min, min + w, ..., max`.
///
/// Numeric gaps are zero, label gaps take the most frequent existing label. Tables
/// with fewer than two rows are returned unchanged.
pub fn fill_gaps(table: FeatureTable, window_size: f64) -> FeatureTable {
    if table.len() < 2 || !(window_size > 0.0) {
        return table;
    }

    let timestamps = table.timestamps();
    let start = timestamps[0];
    let end = timestamps[timestamps.len() - 1];
    let slots = ((end - start) / window_size).round() as usize + 1;
    if slots == table.len() {
        return table;
    }

    let mut rows: Vec<Option<usize>> = vec![None; slots];
    for (row, ts) in timestamps.iter().enumerate() {
        let slot = ((ts - start) / window_size).round() as usize;
        if let Some(cell) = rows.get_mut(slot) {
            *cell = Some(row);
        }
    }

    let fill_label = most_frequent(table.labels()).unwrap_or_else(|| FALLBACK_LABEL.to_string());
    let grid: Vec<f64> = (0..slots).map(|i| start + i as f64 * window_size).collect();
    let columns = table
        .columns()
        .iter()
        .map(|column| Column {
            name: column.name.clone(),
            values: rows
                .iter()
                .map(|row| row.map_or(0.0, |r| column.values[r]))
                .collect(),
        })
        .collect();
    let labels = rows
        .iter()
        .map(|row| row.map_or_else(|| fill_label.clone(), |r| table.labels()[r].clone()))
        .collect();

    debug!(
        "Filled {} empty windows ({} -> {} rows)",
        slots - table.len(),
        table.len(),
        slots
    );
    FeatureTable::from_parts(grid, columns, labels)
}

/// Appends `<m>_diff`, `<m>_pct_change`, `<m>_ma5`, `<m>_ma5_dev` and
/// `<m>_rolling_std` for every key column present, then `packet_count_zscore`.
///
/// Tables with fewer than three rows are returned unchanged.
pub fn add_derived_features(table: FeatureTable) -> FeatureTable {
    if table.len() < 3 {
        return table;
    }

    let mut table = table;
    for name in KEY_COLUMNS {
        let Some(values) = table.column(name).map(<[f64]>::to_vec) else {
            continue;
        };
        let ma = stats::rolling_mean(&values, ROLLING_WINDOW);
        let deviation = values.iter().zip(&ma).map(|(v, m)| v - m).collect();

        table = table
            .with_column(format!("{}_diff", name), diff(&values))
            .with_column(format!("{}_pct_change", name), pct_change(&values))
            .with_column(format!("{}_ma5", name), ma)
            .with_column(format!("{}_ma5_dev", name), deviation)
            .with_column(
                format!("{}_rolling_std", name),
                stats::rolling_std(&values, ROLLING_WINDOW),
            );
    }

    if let Some(zscores) = table.column("packet_count").map(zscore) {
        table = table.with_column("packet_count_zscore", zscores);
    }
    table
}

/// First difference, 0 for the first row
pub fn diff(values: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(values.windows(2).map(|w| w[1] - w[0]))
        .take(values.len())
        .collect()
}

/// Relative change against the previous row; undefined or infinite changes are 0
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(values.windows(2).map(|w| {
            let change = (w[1] - w[0]) / w[0];
            if change.is_finite() {
                change
            } else {
                0.0
            }
        }))
        .take(values.len())
        .collect()
}

/// Global z-score with a sample standard deviation; all zeros when it is 0
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let mean = stats::mean(values);
    let std = stats::sample_std(values);
    if std > 0.0 {
        values.iter().map(|v| (v - mean) / std).collect()
    } else {
        vec![0.0; values.len()]
    }
}

// Ties resolve to the smallest value.
fn most_frequent(labels: &[String]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    let best = counts.values().copied().max()?;
    counts
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(label, _)| label.to_string())
}
