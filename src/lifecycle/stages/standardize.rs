//! Categorical standardization stage - literal value substitutions on
//! declared feature columns
//!
//! Values are matched in normalized form (trimmed, lowercased, whitespace
//! collapsed). Nothing is inferred: a cell changes only when its normalized
//! form equals a declared rule key.

use super::{Stage, StageExecutor};
use crate::dataset::Snapshot;
use crate::dataset::values::{is_text_dtype, replace_columns, series, text_values};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, ColumnChange, ExcludedColumn, ExclusionReason, StageReport};
use crate::lifecycle::payload::Payload;
use crate::utils::normalize_text;
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Whether the normalized form is written back to unmatched cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Normalize only to match rules; unmatched cells stay byte-identical
    MatchOnly,
    /// Write the normalized form of every non-null cell
    Rewrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StandardizationDecisionDoc")]
pub struct StandardizationDecision {
    columns: Vec<String>,
    /// Normalized rule key -> normalized replacement
    substitutions: BTreeMap<String, String>,
    normalization: NormalizationMode,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StandardizationDecisionDoc {
    columns: Vec<String>,
    substitutions: BTreeMap<String, String>,
    normalization: NormalizationMode,
}

impl TryFrom<StandardizationDecisionDoc> for StandardizationDecision {
    type Error = PipelineError;

    fn try_from(doc: StandardizationDecisionDoc) -> Result<Self> {
        Self::new(doc.columns, doc.substitutions, doc.normalization)
    }
}

impl StandardizationDecision {
    pub fn new(
        columns: Vec<String>,
        substitutions: BTreeMap<String, String>,
        normalization: NormalizationMode,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.trim().is_empty() {
                return Err(PipelineError::Decision(
                    "standardization column names must not be blank".to_owned(),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(PipelineError::Decision(format!(
                    "column '{column}' is declared twice for standardization"
                )));
            }
        }

        let mut rules = BTreeMap::new();
        for (from, to) in &substitutions {
            let key = normalize_text(from);
            if key.is_empty() {
                return Err(PipelineError::Decision(
                    "substitution rule with an empty source value".to_owned(),
                ));
            }
            let value = normalize_text(to);
            if let Some(previous) = rules.insert(key.clone(), value.clone())
                && previous != value
            {
                return Err(PipelineError::Decision(format!(
                    "rules for '{key}' disagree: '{previous}' vs '{value}'"
                )));
            }
        }

        Ok(Self {
            columns,
            substitutions: rules,
            normalization,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn substitutions(&self) -> &BTreeMap<String, String> {
        &self.substitutions
    }

    pub fn normalization(&self) -> NormalizationMode {
        self.normalization
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizationReport {
    pub record: AuditRecord,
    pub normalization: NormalizationMode,
    pub rules_count: usize,
    /// Cells rewritten by a substitution rule
    pub total_cells_changed: usize,
    /// Cells only normalized (`rewrite` mode)
    pub total_cells_normalized: usize,
    pub normalization_edits: Vec<ColumnChange>,
}

pub struct StandardizationStage {
    decision: StandardizationDecision,
}

struct ColumnOutcome {
    values: Vec<Option<String>>,
    substituted: ColumnChange,
    normalized: ColumnChange,
}

impl StandardizationStage {
    pub fn new(decision: StandardizationDecision) -> Self {
        Self { decision }
    }

    fn standardize(&self, name: &str, values: Vec<Option<String>>) -> ColumnOutcome {
        let mut substituted = ColumnChange::new(name);
        let mut normalized = ColumnChange::new(name);
        let rewrite = self.decision.normalization == NormalizationMode::Rewrite;

        let values = values
            .into_iter()
            .map(|cell| {
                let raw = cell?;
                let norm = normalize_text(&raw);
                match self.decision.substitutions.get(&norm) {
                    Some(to) if *to != norm => {
                        substituted.record(Some(&raw), Some(to));
                        Some(to.clone())
                    }
                    _ if rewrite && norm != raw => {
                        normalized.record(Some(&raw), Some(&norm));
                        Some(norm)
                    }
                    _ => Some(raw),
                }
            })
            .collect();

        ColumnOutcome {
            values,
            substituted,
            normalized,
        }
    }
}

impl StageExecutor for StandardizationStage {
    fn stage(&self) -> Stage {
        Stage::Standardization
    }

    fn description(&self) -> String {
        format!(
            "Apply {} substitution rules to {} declared columns",
            self.decision.substitutions.len(),
            self.decision.columns.len()
        )
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Standardization)?;
        let scope = payload.require_scope()?;
        scope.verify_target_isolation()?;
        if let Some(target) = self.decision.columns.iter().find(|c| scope.is_target(c)) {
            return Err(PipelineError::ScopeIntegrity(format!(
                "standardization decision includes the target '{target}'"
            )));
        }

        let df = payload.dataset();
        let mut effective = Vec::new();
        let mut excluded = Vec::new();
        for column in &self.decision.columns {
            let reason = if !scope.is_feature(column) {
                Some(ExclusionReason::NotAFeature)
            } else {
                match series(df, column) {
                    Err(_) => Some(ExclusionReason::NotPresent),
                    Ok(s) if !is_text_dtype(s.dtype()) => Some(ExclusionReason::NotTextual),
                    Ok(_) => None,
                }
            };
            match reason {
                Some(reason) => excluded.push(ExcludedColumn {
                    column: column.clone(),
                    reason,
                }),
                None => effective.push(column.clone()),
            }
        }
        scope.ensure_within_features(&effective)?;

        let mut replacements = Vec::new();
        let mut column_changes = Vec::new();
        let mut normalization_edits = Vec::new();
        for column in &effective {
            let values = text_values(series(df, column)?)?;
            let outcome = self.standardize(column, values);
            replacements.push(Series::new(column.as_str().into(), outcome.values));
            if outcome.normalized.cells_changed > 0 {
                normalization_edits.push(outcome.normalized);
            }
            column_changes.push(outcome.substituted);
        }
        column_changes.sort_by(|a, b| {
            b.cells_changed
                .cmp(&a.cells_changed)
                .then_with(|| a.column.cmp(&b.column))
        });

        let out = replace_columns(df, replacements)?;
        if out.shape() != df.shape() {
            return Err(PipelineError::StructuralInvariant(format!(
                "standardization changed the shape from {:?} to {:?}",
                df.shape(),
                out.shape()
            )));
        }

        let record = AuditRecord {
            stage: Stage::Standardization,
            created_utc: Utc::now(),
            snapshot_before: payload.snapshot().clone(),
            snapshot_after: Snapshot::capture(&out),
            rules_applied: self
                .decision
                .substitutions
                .iter()
                .map(|(from, to)| format!("'{from}' -> '{to}'"))
                .collect(),
            declared_scope: self.decision.columns.clone(),
            effective_scope: effective,
            excluded,
            column_changes,
        };
        let report = StandardizationReport {
            total_cells_changed: record.total_cells_changed(),
            total_cells_normalized: normalization_edits.iter().map(|c| c.cells_changed).sum(),
            rules_count: self.decision.substitutions.len(),
            normalization: self.decision.normalization,
            normalization_edits,
            record,
        };

        tracing::info!(
            columns = report.record.effective_scope.len(),
            cells_changed = report.total_cells_changed,
            cells_normalized = report.total_cells_normalized,
            "standardization complete"
        );
        Ok(payload.advance(Stage::Standardization, out, StageReport::Standardization(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SchemaContract;
    use crate::lifecycle::stages::contract::ContractStage;
    use crate::lifecycle::stages::ingest::{IngestSource, IngestionStage};
    use crate::lifecycle::stages::typing::{TypingDecision, TypingStage};
    use pretty_assertions::assert_eq;

    fn enforced() -> anyhow::Result<Payload> {
        let df = df! {
            "online_security" => &[Some("Yes"), Some("No internet service"), Some(" no  internet SERVICE"), None, Some("No")],
            "tech_support" => &["No internet service", "Yes", "No", "No", "Yes "],
            "tenure" => &[1i64, 2, 3, 4, 5],
            "Churn" => &["Yes", "No", "No internet service", "No", "Yes"],
        }?;
        let ingested = IngestionStage::new(IngestSource::Frame {
            label: "test".to_owned(),
            df,
        })
        .execute(&Payload::start())?;
        let typed = TypingStage::new(TypingDecision::new(Vec::new())?).execute(&ingested)?;
        let contract = SchemaContract::new(
            "churn",
            vec!["online_security".to_owned(), "tech_support".to_owned(), "tenure".to_owned()],
            Some("Churn".to_owned()),
        )?;
        Ok(ContractStage::new(contract).execute(&typed)?)
    }

    fn no_service_rule() -> BTreeMap<String, String> {
        BTreeMap::from([("No internet service".to_owned(), "No".to_owned())])
    }

    fn report(payload: &Payload) -> anyhow::Result<&StandardizationReport> {
        match payload.trail().report_for(Stage::Standardization) {
            Some(StageReport::Standardization(r)) => Ok(r),
            _ => anyhow::bail!("missing standardization report"),
        }
    }

    #[test]
    fn test_match_only_substitutes_and_preserves_the_rest() -> anyhow::Result<()> {
        let payload = enforced()?;
        let decision = StandardizationDecision::new(
            vec!["online_security".to_owned(), "tenure".to_owned(), "ghost".to_owned()],
            no_service_rule(),
            NormalizationMode::MatchOnly,
        )?;
        let next = StandardizationStage::new(decision).execute(&payload)?;

        let values = text_values(series(next.dataset(), "online_security")?)?;
        assert_eq!(
            values,
            vec![
                Some("Yes".to_owned()),
                Some("no".to_owned()),
                Some("no".to_owned()),
                None,
                Some("No".to_owned()),
            ]
        );

        let report = report(&next)?;
        assert_eq!(report.total_cells_changed, 2);
        assert_eq!(report.total_cells_normalized, 0);
        assert_eq!(report.record.effective_scope, vec!["online_security"]);
        let reasons: Vec<_> = report.record.excluded.iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec![ExclusionReason::NotTextual, ExclusionReason::NotAFeature]);

        // Columns outside the effective scope are bit-for-bit unchanged.
        for untouched in ["tech_support", "tenure", "Churn"] {
            assert!(series(next.dataset(), untouched)?.equals_missing(series(payload.dataset(), untouched)?));
        }
        Ok(())
    }

    #[test]
    fn test_rewrite_reports_normalization_separately() -> anyhow::Result<()> {
        let payload = enforced()?;
        let decision = StandardizationDecision::new(
            vec!["tech_support".to_owned()],
            no_service_rule(),
            NormalizationMode::Rewrite,
        )?;
        let next = StandardizationStage::new(decision).execute(&payload)?;
        let values = text_values(series(next.dataset(), "tech_support")?)?;
        assert_eq!(
            values,
            vec![Some("no"), Some("yes"), Some("no"), Some("no"), Some("yes")]
                .into_iter()
                .map(|v| v.map(str::to_owned))
                .collect::<Vec<_>>()
        );
        let report = report(&next)?;
        assert_eq!(report.total_cells_changed, 1);
        assert_eq!(report.total_cells_normalized, 4);
        Ok(())
    }

    #[test]
    fn test_target_in_decision_is_rejected() -> anyhow::Result<()> {
        let payload = enforced()?;
        let decision = StandardizationDecision::new(
            vec!["Churn".to_owned()],
            no_service_rule(),
            NormalizationMode::MatchOnly,
        )?;
        let err = StandardizationStage::new(decision).execute(&payload).unwrap_err();
        assert_eq!(err.invariant(), "target-isolation");
        Ok(())
    }

    #[test]
    fn test_zero_changes_is_valid() -> anyhow::Result<()> {
        let payload = enforced()?;
        let decision =
            StandardizationDecision::new(vec!["tech_support".to_owned()], BTreeMap::new(), NormalizationMode::MatchOnly)?;
        let next = StandardizationStage::new(decision).execute(&payload)?;
        assert_eq!(report(&next)?.total_cells_changed, 0);
        assert!(next.dataset().equals_missing(payload.dataset()));
        Ok(())
    }

    #[test]
    fn test_decision_requires_normalization_mode() {
        let doc = "columns: [a]\nsubstitutions: {x: y}\n";
        assert!(serde_yaml::from_str::<StandardizationDecision>(doc).is_err());
        let conflicting = BTreeMap::from([
            ("Yes".to_owned(), "1".to_owned()),
            (" yes".to_owned(), "2".to_owned()),
        ]);
        assert!(StandardizationDecision::new(vec![], conflicting, NormalizationMode::Rewrite).is_err());
    }
}
