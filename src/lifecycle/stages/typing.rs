//! Typing stage - declared type conversions, duplicates and conversion nulls
//!
//! Only representation changes are made (numeric strings become numbers).
//! Re-running on an already converted dataset reports zero impact.

use super::{Stage, StageExecutor};
use crate::dataset::Snapshot;
use crate::dataset::values::{is_numeric_dtype, is_text_dtype, replace_columns, series, text_values};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, ColumnChange, ExcludedColumn, ExclusionReason, StageReport};
use crate::lifecycle::payload::Payload;
use crate::utils::{percent, round_to};
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Representation a column is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionTarget {
    Numeric,
    Text,
}

/// What happens to values that cannot be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConversionError {
    /// Unparseable values become null and are reported
    Coerce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conversion {
    pub column: String,
    pub to: ConversionTarget,
    pub on_error: OnConversionError,
}

/// Declared set of conversions. An empty list is a valid, explicit choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TypingDecisionDoc")]
pub struct TypingDecision {
    conversions: Vec<Conversion>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TypingDecisionDoc {
    conversions: Vec<Conversion>,
}

impl TryFrom<TypingDecisionDoc> for TypingDecision {
    type Error = PipelineError;

    fn try_from(doc: TypingDecisionDoc) -> Result<Self> {
        Self::new(doc.conversions)
    }
}

impl TypingDecision {
    pub fn new(conversions: Vec<Conversion>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for c in &conversions {
            if c.column.trim().is_empty() {
                return Err(PipelineError::Decision(
                    "typing conversion with a blank column name".to_owned(),
                ));
            }
            if !seen.insert(c.column.as_str()) {
                return Err(PipelineError::Decision(format!(
                    "column '{}' has more than one declared conversion",
                    c.column
                )));
            }
        }
        Ok(Self { conversions })
    }

    pub fn conversions(&self) -> &[Conversion] {
        &self.conversions
    }

    pub fn to_numeric(columns: &[&str]) -> Result<Self> {
        Self::new(
            columns
                .iter()
                .map(|c| Conversion {
                    column: (*c).to_owned(),
                    to: ConversionTarget::Numeric,
                    on_error: OnConversionError::Coerce,
                })
                .collect(),
        )
    }
}

/// One row of the conversion report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRow {
    pub column: String,
    pub dtype_before: String,
    pub dtype_after: String,
    pub nulls_before: usize,
    pub nulls_after: usize,
    /// Nulls created by the conversion itself
    pub introduced_nulls: usize,
    pub introduced_pct: f64,
    pub converted_non_null: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingReport {
    pub record: AuditRecord,
    pub conversions: Vec<ConversionRow>,
    /// Rows taking part in any duplication, every copy counted
    pub duplicate_rows: usize,
}

impl TypingReport {
    pub fn total_introduced_nulls(&self) -> usize {
        self.conversions.iter().map(|c| c.introduced_nulls).sum()
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Counts rows that have at least one identical twin, every copy included.
pub fn count_duplicate_rows(df: &DataFrame) -> Result<usize> {
    if df.width() == 0 || df.height() == 0 {
        return Ok(0);
    }
    Ok(df.is_duplicated()?.num_trues())
}

pub struct TypingStage {
    decision: TypingDecision,
}

impl TypingStage {
    pub fn new(decision: TypingDecision) -> Self {
        Self { decision }
    }

    fn convert(&self, conversion: &Conversion, source: &Series) -> Result<Option<(Series, ColumnChange)>> {
        let dtype = source.dtype();
        let already = match conversion.to {
            ConversionTarget::Numeric => is_numeric_dtype(dtype),
            ConversionTarget::Text => is_text_dtype(dtype),
        };
        if already {
            return Ok(None);
        }

        let before = text_values(source)?;
        let mut change = ColumnChange::new(conversion.column.as_str());
        let converted = match conversion.to {
            ConversionTarget::Numeric => {
                let values: Vec<Option<f64>> = before
                    .iter()
                    .map(|v| v.as_deref().and_then(parse_number))
                    .collect();
                // Conversion nulls first so they lead the examples.
                for (b, a) in before.iter().zip(&values) {
                    if let (Some(raw), None) = (b, a) {
                        change.record(Some(raw), None);
                    }
                }
                for (b, a) in before.iter().zip(&values) {
                    if let (Some(raw), Some(num)) = (b, a) {
                        change.record(Some(raw), Some(&num.to_string()));
                    }
                }
                Series::new(source.name().clone(), values)
            }
            ConversionTarget::Text => {
                for raw in before.iter().flatten() {
                    change.record(Some(raw), Some(raw));
                }
                Series::new(source.name().clone(), before)
            }
        };
        Ok(Some((converted, change)))
    }
}

impl StageExecutor for TypingStage {
    fn stage(&self) -> Stage {
        Stage::Typing
    }

    fn description(&self) -> String {
        format!("Apply {} declared type conversions", self.decision.conversions.len())
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Typing)?;
        let df = payload.dataset();
        let snapshot_before = payload.snapshot().clone();
        let rows = df.height();

        let mut replacements = Vec::new();
        let mut rows_report = Vec::new();
        let mut column_changes = Vec::new();
        let mut excluded = Vec::new();
        let mut effective = Vec::new();

        for conversion in &self.decision.conversions {
            let Ok(source) = series(df, &conversion.column) else {
                tracing::warn!(column = %conversion.column, "declared conversion skipped: column not present");
                excluded.push(ExcludedColumn {
                    column: conversion.column.clone(),
                    reason: ExclusionReason::NotPresent,
                });
                continue;
            };
            effective.push(conversion.column.clone());

            let Some((converted, change)) = self.convert(conversion, source)? else {
                continue;
            };

            let nulls_before = source.null_count();
            let nulls_after = converted.null_count();
            let introduced = nulls_after.saturating_sub(nulls_before);
            rows_report.push(ConversionRow {
                column: conversion.column.clone(),
                dtype_before: source.dtype().to_string(),
                dtype_after: converted.dtype().to_string(),
                nulls_before,
                nulls_after,
                introduced_nulls: introduced,
                introduced_pct: round_to(percent(introduced, rows), 2),
                converted_non_null: rows - nulls_after,
            });
            column_changes.push(change);
            replacements.push(converted);
        }

        let out = replace_columns(df, replacements)?;
        if out.shape() != df.shape() {
            return Err(PipelineError::StructuralInvariant(format!(
                "typing changed the shape from {:?} to {:?}",
                df.shape(),
                out.shape()
            )));
        }

        let duplicate_rows = count_duplicate_rows(&out)?;
        let record = AuditRecord {
            stage: Stage::Typing,
            created_utc: Utc::now(),
            snapshot_before,
            snapshot_after: Snapshot::capture(&out),
            rules_applied: self
                .decision
                .conversions
                .iter()
                .map(|c| format!("{} -> {:?} (on error: {:?})", c.column, c.to, c.on_error))
                .collect(),
            declared_scope: self
                .decision
                .conversions
                .iter()
                .map(|c| c.column.clone())
                .collect(),
            effective_scope: effective,
            excluded,
            column_changes,
        };
        let report = TypingReport {
            record,
            conversions: rows_report,
            duplicate_rows,
        };

        tracing::info!(
            converted = report.conversions.len(),
            introduced_nulls = report.total_introduced_nulls(),
            duplicate_rows,
            "typing complete"
        );
        Ok(payload.advance(Stage::Typing, out, StageReport::Typing(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::stages::ingest::{IngestSource, IngestionStage};

    fn ingested(df: DataFrame) -> anyhow::Result<Payload> {
        let stage = IngestionStage::new(IngestSource::Frame {
            label: "test".to_owned(),
            df,
        });
        Ok(stage.execute(&Payload::start())?)
    }

    fn typing_report(payload: &Payload) -> anyhow::Result<&TypingReport> {
        match payload.trail().report_for(Stage::Typing) {
            Some(StageReport::Typing(r)) => Ok(r),
            _ => anyhow::bail!("missing typing report"),
        }
    }

    #[test]
    fn test_numeric_conversion_reports_introduced_nulls() -> anyhow::Result<()> {
        let df = df! {
            "customer" => &["a", "b", "c", "d"],
            "total_charges" => &[Some("29.85"), Some(" "), None, Some("1889.5")],
        }?;
        let payload = ingested(df)?;
        let stage = TypingStage::new(TypingDecision::to_numeric(&["total_charges", "ghost"])?);
        let next = stage.execute(&payload)?;

        let converted = series(next.dataset(), "total_charges")?;
        assert_eq!(converted.dtype(), &DataType::Float64);

        let report = typing_report(&next)?;
        let row = report.conversions.first().ok_or_else(|| anyhow::anyhow!("no row"))?;
        assert_eq!(row.nulls_before, 1);
        assert_eq!(row.nulls_after, 2);
        assert_eq!(row.introduced_nulls, 1);
        assert_eq!(row.introduced_pct, 25.0);
        assert_eq!(row.converted_non_null, 2);
        assert_eq!(report.record.excluded.len(), 1);
        assert_eq!(report.record.effective_scope, vec!["total_charges"]);

        // Untouched column is carried over unchanged.
        assert!(series(next.dataset(), "customer")?.equals_missing(series(payload.dataset(), "customer")?));
        Ok(())
    }

    #[test]
    fn test_rerun_is_idempotent() -> anyhow::Result<()> {
        let df = df! { "amount" => &[1.5, 2.5] }?;
        let payload = ingested(df)?;
        let next = TypingStage::new(TypingDecision::to_numeric(&["amount"])?).execute(&payload)?;
        let report = typing_report(&next)?;
        assert!(report.conversions.is_empty());
        assert_eq!(report.record.total_cells_changed(), 0);
        assert!(next.dataset().equals_missing(payload.dataset()));
        Ok(())
    }

    #[test]
    fn test_duplicate_rows_count_every_copy() -> anyhow::Result<()> {
        let df = df! {
            "a" => &[Some(1i64), Some(1), Some(2), None, None],
            "b" => &["x", "x", "y", "z", "z"],
        }?;
        assert_eq!(count_duplicate_rows(&df)?, 4);
        Ok(())
    }

    #[test]
    fn test_duplicate_conversion_rejected() {
        assert!(TypingDecision::to_numeric(&["a", "a"]).is_err());
        let doc = "conversions:\n  - {column: a, to: numeric, on_error: coerce}\n  - {column: a, to: text, on_error: coerce}\n";
        assert!(serde_yaml::from_str::<TypingDecision>(doc).is_err());
        let missing_policy = "conversions:\n  - {column: a, to: numeric}\n";
        assert!(serde_yaml::from_str::<TypingDecision>(missing_policy).is_err());
    }
}
