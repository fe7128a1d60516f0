use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::ops::Range;

use crate::models::window::{WindowFeatures, FEATURE_COLUMNS};

/// Name of the time index column in serialized records
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// Name of the text label column
pub const LABEL_COLUMN: &str = "label";

/// Render seconds since the epoch as an RFC 3339 UTC timestamp
pub fn format_timestamp(secs: f64) -> String {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| secs.to_string())
}

/// A named numeric column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Time-indexed table of window features.
///
/// Rows are ordered by timestamp; every column has one value per row. Methods that
/// change the table consume it and return a new value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    timestamps: Vec<f64>,
    columns: Vec<Column>,
    labels: Vec<String>,
}

impl FeatureTable {
    /// Build a table from per-window vectors (already in timestamp order)
    pub fn from_windows(windows: &[WindowFeatures]) -> Self {
        let mut columns: Vec<Column> = FEATURE_COLUMNS
            .iter()
            .map(|name| Column {
                name: (*name).to_string(),
                values: Vec::with_capacity(windows.len()),
            })
            .collect();

        for window in windows {
            for (column, value) in columns.iter_mut().zip(window.values()) {
                column.values.push(value);
            }
        }

        Self {
            timestamps: windows.iter().map(|w| w.timestamp).collect(),
            columns,
            labels: windows.iter().map(|w| w.label.clone()).collect(),
        }
    }

    /// Assemble a table from parts; every column and the labels must match the
    /// timestamp count.
    pub fn from_parts(timestamps: Vec<f64>, columns: Vec<Column>, labels: Vec<String>) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == timestamps.len()));
        debug_assert_eq!(labels.len(), timestamps.len());
        Self {
            timestamps,
            columns,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Append (or replace) a column
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.len());
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        self
    }

    /// Rows in `range` as a new table
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            timestamps: self.timestamps[range.clone()].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values[range.clone()].to_vec(),
                })
                .collect(),
            labels: self.labels[range].to_vec(),
        }
    }

    /// One numeric column indexed by the table timestamps
    pub fn series(&self, name: &str) -> Option<TimeSeries> {
        self.column(name).map(|values| TimeSeries {
            timestamps: self.timestamps.clone(),
            values: values.to_vec(),
        })
    }

    /// Rows as field-name → value mappings
    pub fn records(&self) -> Vec<Map<String, Value>> {
        (0..self.len())
            .map(|row| {
                let mut record = Map::new();
                record.insert(
                    TIMESTAMP_COLUMN.to_string(),
                    Value::String(format_timestamp(self.timestamps[row])),
                );
                for column in &self.columns {
                    record.insert(column.name.clone(), json_number(column.values[row]));
                }
                record.insert(
                    LABEL_COLUMN.to_string(),
                    Value::String(self.labels[row].clone()),
                );
                record
            })
            .collect()
    }
}

impl Serialize for FeatureTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let records = self.records();
        let mut seq = serializer.serialize_seq(Some(records.len()))?;
        for record in &records {
            seq.serialize_element(record)?;
        }
        seq.end()
    }
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// A numeric series over window timestamps.
///
/// Serializes as an ordered array of `{timestamp, value}` pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(timestamps: Vec<f64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        Self { timestamps, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Chronological split at `index`
    pub fn split_at(&self, index: usize) -> (TimeSeries, TimeSeries) {
        let (t_left, t_right) = self.timestamps.split_at(index);
        let (v_left, v_right) = self.values.split_at(index);
        (
            TimeSeries::new(t_left.to_vec(), v_left.to_vec()),
            TimeSeries::new(t_right.to_vec(), v_right.to_vec()),
        )
    }
}

struct TimedValue<'a> {
    timestamp: f64,
    value: &'a f64,
}

impl Serialize for TimedValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("timestamp", &format_timestamp(self.timestamp))?;
        map.serialize_entry("value", self.value)?;
        map.end()
    }
}

impl Serialize for TimeSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for (timestamp, value) in self.timestamps.iter().zip(&self.values) {
            seq.serialize_element(&TimedValue {
                timestamp: *timestamp,
                value,
            })?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(ts: f64, packets: u64) -> WindowFeatures {
        WindowFeatures {
            timestamp: ts,
            packet_count: packets,
            label: "unknown".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_windows() {
        let table = FeatureTable::from_windows(&[window(10.0, 3), window(11.0, 5)]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("packet_count").unwrap(), &[3.0, 5.0]);
        assert_eq!(table.columns().len(), FEATURE_COLUMNS.len());
        assert_eq!(table.labels(), &["unknown".to_string(), "unknown".to_string()]);
    }

    #[test]
    fn test_with_column_is_new_value() {
        let table = FeatureTable::from_windows(&[window(0.0, 1)]);
        let extended = table.clone().with_column("extra", vec![2.0]);
        assert!(!table.has_column("extra"));
        assert_eq!(extended.column("extra").unwrap(), &[2.0]);
    }

    #[test]
    fn test_records_shape() {
        let table = FeatureTable::from_windows(&[window(0.0, 4)]);
        let records = table.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["timestamp"], "1970-01-01T00:00:00Z");
        assert_eq!(records[0]["packet_count"], 4.0);
        assert_eq!(records[0]["label"], "unknown");
    }

    #[test]
    fn test_series_serializes_as_pairs() {
        let series = TimeSeries::new(vec![1.5, 2.5], vec![3.0, 4.0]);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json[0]["timestamp"], "1970-01-01T00:00:01.500Z");
        assert_eq!(json[1]["value"], 4.0);
    }

    #[test]
    fn test_split_at() {
        let series = TimeSeries::new(vec![0.0, 1.0, 2.0], vec![5.0, 6.0, 7.0]);
        let (train, test) = series.split_at(2);
        assert_eq!(train.values, vec![5.0, 6.0]);
        assert_eq!(test.timestamps, vec![2.0]);
    }
}
