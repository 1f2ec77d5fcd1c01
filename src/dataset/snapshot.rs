//! Structural fingerprints of a dataset at a point in time.

use crate::utils::format_bytes;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Column name and dtype as recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,

    /// Polars data type as string (e.g. "i64", "str", "f64")
    pub dtype: String,
}

/// Immutable structural fingerprint of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub row_count: usize,
    pub column_count: usize,
    /// Estimated in-memory size in bytes
    pub memory_estimate: usize,
    pub columns: Vec<SchemaColumn>,
}

impl Snapshot {
    pub fn capture(df: &DataFrame) -> Self {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| SchemaColumn {
                name: c.name().to_string(),
                dtype: c.dtype().to_string(),
            })
            .collect();

        Self {
            row_count: df.height(),
            column_count: df.width(),
            memory_estimate: df.estimated_size(),
            columns,
        }
    }

    /// Fingerprint of a dense `f64` matrix with named columns.
    pub fn of_matrix(rows: usize, feature_names: &[String]) -> Self {
        Self {
            row_count: rows,
            column_count: feature_names.len(),
            memory_estimate: rows * feature_names.len() * size_of::<f64>(),
            columns: feature_names
                .iter()
                .map(|name| SchemaColumn {
                    name: name.clone(),
                    dtype: "f64".to_owned(),
                })
                .collect(),
        }
    }

    /// Fingerprint of several row-disjoint parts that share the first part's columns.
    pub fn combined(parts: &[&Self]) -> Self {
        let columns = parts.first().map(|p| p.columns.clone()).unwrap_or_default();
        Self {
            row_count: parts.iter().map(|p| p.row_count).sum(),
            column_count: columns.len(),
            memory_estimate: parts.iter().map(|p| p.memory_estimate).sum(),
            columns,
        }
    }

    pub fn dtype_of(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.dtype.as_str())
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.row_count == other.row_count && self.column_count == other.column_count
    }

    pub fn describe(&self) -> String {
        format!(
            "{} rows x {} cols ({})",
            self.row_count,
            self.column_count,
            format_bytes(self.memory_estimate)
        )
    }
}

/// Before/after comparison of two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDelta {
    pub rows_delta: i64,
    pub columns_delta: i64,
    pub memory_delta_bytes: i64,
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
    pub type_changes: Vec<TypeChange>,
}

/// Dtype change of a column present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub column: String,
    pub old_type: String,
    pub new_type: String,
}

impl SnapshotDelta {
    pub fn between(before: &Snapshot, after: &Snapshot) -> Self {
        let columns_added = after
            .columns
            .iter()
            .filter(|c| before.dtype_of(&c.name).is_none())
            .map(|c| c.name.clone())
            .collect();
        let columns_removed = before
            .columns
            .iter()
            .filter(|c| after.dtype_of(&c.name).is_none())
            .map(|c| c.name.clone())
            .collect();
        let type_changes = before
            .columns
            .iter()
            .filter_map(|c| {
                let new_type = after.dtype_of(&c.name)?;
                (new_type != c.dtype).then(|| TypeChange {
                    column: c.name.clone(),
                    old_type: c.dtype.clone(),
                    new_type: new_type.to_owned(),
                })
            })
            .collect();

        Self {
            rows_delta: signed(after.row_count) - signed(before.row_count),
            columns_delta: signed(after.column_count) - signed(before.column_count),
            memory_delta_bytes: signed(after.memory_estimate) - signed(before.memory_estimate),
            columns_added,
            columns_removed,
            type_changes,
        }
    }
}

fn signed(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture() -> anyhow::Result<()> {
        let df = df! {
            "tenure" => &[1i64, 2, 3],
            "contract" => &["a", "b", "c"],
        }?;
        let snap = Snapshot::capture(&df);
        assert_eq!(snap.row_count, 3);
        assert_eq!(snap.column_count, 2);
        assert_eq!(snap.dtype_of("tenure"), Some("i64"));
        assert_eq!(snap.dtype_of("missing"), None);
        Ok(())
    }

    #[test]
    fn test_delta_reports_type_and_column_changes() -> anyhow::Result<()> {
        let before = Snapshot::capture(&df! {
            "a" => &["1", "2"],
            "b" => &[1i64, 2],
        }?);
        let after = Snapshot::capture(&df! {
            "a" => &[1.0, 2.0],
            "c" => &[true, false],
        }?);
        let delta = SnapshotDelta::between(&before, &after);
        assert_eq!(delta.rows_delta, 0);
        assert_eq!(delta.columns_added, vec!["c"]);
        assert_eq!(delta.columns_removed, vec!["b"]);
        assert_eq!(delta.type_changes.len(), 1);
        assert_eq!(delta.type_changes.first().map(|t| t.new_type.as_str()), Some("f64"));
        Ok(())
    }
}
