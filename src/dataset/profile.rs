//! Read-only quality diagnostics: missing values and dtype distribution.

use crate::utils::{percent, round_to};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Above this share of missing cells a column is badged `High`.
pub const HIGH_MISSING_PCT: f64 = 5.0;
/// Above this share of missing cells a column is badged `Significant`.
pub const SIGNIFICANT_MISSING_PCT: f64 = 15.0;
/// Default number of columns listed in the missing summary.
pub const DEFAULT_MISSING_TOP_N: usize = 12;

/// Cosmetic badge for a column's missing share. Never gates anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    High,
    Significant,
}

impl Severity {
    pub fn from_missing_pct(pct: f64) -> Self {
        if pct > SIGNIFICANT_MISSING_PCT {
            Self::Significant
        } else if pct > HIGH_MISSING_PCT {
            Self::High
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing_count: usize,
    pub missing_pct: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingSummary {
    pub total_cells: usize,
    pub missing_cells: usize,
    pub global_missing_pct: f64,
    /// Columns with at least one missing value, worst first
    pub top_columns: Vec<ColumnMissing>,
    pub columns_with_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtypeCount {
    pub dtype: String,
    pub columns: usize,
}

pub fn missing_summary(df: &DataFrame, top_n: usize) -> MissingSummary {
    let rows = df.height();
    let mut per_column: Vec<ColumnMissing> = df
        .get_columns()
        .iter()
        .filter(|c| c.null_count() > 0)
        .map(|c| {
            let pct = round_to(percent(c.null_count(), rows), 2);
            ColumnMissing {
                column: c.name().to_string(),
                missing_count: c.null_count(),
                missing_pct: pct,
                severity: Severity::from_missing_pct(pct),
            }
        })
        .collect();
    per_column.sort_by(|a, b| {
        b.missing_count
            .cmp(&a.missing_count)
            .then_with(|| a.column.cmp(&b.column))
    });

    let missing_cells: usize = df.get_columns().iter().map(|c| c.null_count()).sum();
    let total_cells = rows * df.width();
    let columns_with_missing = per_column.len();
    per_column.truncate(top_n);

    MissingSummary {
        total_cells,
        missing_cells,
        global_missing_pct: round_to(percent(missing_cells, total_cells), 2),
        top_columns: per_column,
        columns_with_missing,
    }
}

pub fn dtype_summary(df: &DataFrame) -> Vec<DtypeCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for column in df.get_columns() {
        *counts.entry(column.dtype().to_string()).or_default() += 1;
    }
    let mut out: Vec<DtypeCount> = counts
        .into_iter()
        .map(|(dtype, columns)| DtypeCount { dtype, columns })
        .collect();
    out.sort_by(|a, b| b.columns.cmp(&a.columns).then_with(|| a.dtype.cmp(&b.dtype)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_summary() -> anyhow::Result<()> {
        let df = df! {
            "a" => &[Some(1i64), None, None, Some(4)],
            "b" => &[Some("x"), None, Some("z"), Some("w")],
            "c" => &[1.0, 2.0, 3.0, 4.0],
        }?;
        let summary = missing_summary(&df, 1);
        assert_eq!(summary.total_cells, 12);
        assert_eq!(summary.missing_cells, 3);
        assert_eq!(summary.global_missing_pct, 25.0);
        assert_eq!(summary.columns_with_missing, 2);
        assert_eq!(summary.top_columns.len(), 1);
        let worst = summary.top_columns.first().map(|c| c.column.as_str());
        assert_eq!(worst, Some("a"));
        Ok(())
    }

    #[test]
    fn test_severity_badges() {
        assert_eq!(Severity::from_missing_pct(2.0), Severity::Low);
        assert_eq!(Severity::from_missing_pct(6.0), Severity::High);
        assert_eq!(Severity::from_missing_pct(40.0), Severity::Significant);
    }

    #[test]
    fn test_dtype_summary() -> anyhow::Result<()> {
        let df = df! {
            "a" => &[1i64],
            "b" => &[2i64],
            "c" => &["x"],
        }?;
        let summary = dtype_summary(&df);
        assert_eq!(
            summary.first(),
            Some(&DtypeCount {
                dtype: "i64".to_owned(),
                columns: 2
            })
        );
        Ok(())
    }
}
