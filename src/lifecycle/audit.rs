//! Append-only evidence of what every stage saw and changed.

use super::stages::Stage;
use super::stages::contract::ContractReport;
use super::stages::impute::ImputationReport;
use super::stages::ingest::IngestionReport;
use super::stages::represent::RepresentationReport;
use super::stages::split::SplitReport;
use super::stages::standardize::StandardizationReport;
use super::stages::target_audit::TargetAuditReport;
use super::stages::typing::TypingReport;
use crate::dataset::{Snapshot, SnapshotDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of before/after examples kept per column.
pub const MAX_EXAMPLES_PER_COLUMN: usize = 8;

/// A single cell value before and after a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChange {
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Per-column change count with a bounded set of distinct examples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub column: String,
    pub cells_changed: usize,
    pub examples: Vec<ValueChange>,
}

impl ColumnChange {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            cells_changed: 0,
            examples: Vec::new(),
        }
    }

    /// Count one changed cell and keep it as an example if it is new.
    pub fn record(&mut self, before: Option<&str>, after: Option<&str>) {
        self.cells_changed += 1;
        if self.examples.len() < MAX_EXAMPLES_PER_COLUMN {
            let change = ValueChange {
                before: before.map(str::to_owned),
                after: after.map(str::to_owned),
            };
            if !self.examples.contains(&change) {
                self.examples.push(change);
            }
        }
    }
}

/// Why a declared column did not make it into a stage's effective scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Not one of the scope's features
    NotAFeature,
    /// Not present in the dataset
    NotPresent,
    /// Listed in the decision's exclusion list
    ExcludedByDecision,
    /// The stage only handles text columns
    NotTextual,
    /// Named in the contract's `drop_columns`
    DroppedByContract,
    /// Named in the contract's `id_columns`
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedColumn {
    pub column: String,
    pub reason: ExclusionReason,
}

/// Evidence produced by one execution stage. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub stage: Stage,
    pub created_utc: DateTime<Utc>,
    pub snapshot_before: Snapshot,
    pub snapshot_after: Snapshot,
    /// Rules or strategies applied, in human-readable form
    pub rules_applied: Vec<String>,
    /// Columns named by the decision
    pub declared_scope: Vec<String>,
    /// Columns actually processed
    pub effective_scope: Vec<String>,
    pub excluded: Vec<ExcludedColumn>,
    pub column_changes: Vec<ColumnChange>,
}

impl AuditRecord {
    pub fn total_cells_changed(&self) -> usize {
        self.column_changes.iter().map(|c| c.cells_changed).sum()
    }

    pub fn delta(&self) -> SnapshotDelta {
        SnapshotDelta::between(&self.snapshot_before, &self.snapshot_after)
    }

    pub fn change_for(&self, column: &str) -> Option<&ColumnChange> {
        self.column_changes.iter().find(|c| c.column == column)
    }
}

/// Stage-specific report stored in the trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    Ingestion(IngestionReport),
    Typing(TypingReport),
    ContractEnforcement(ContractReport),
    Standardization(StandardizationReport),
    TargetAudit(TargetAuditReport),
    Imputation(ImputationReport),
    Split(SplitReport),
    Representation(RepresentationReport),
}

impl StageReport {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Ingestion(_) => Stage::Ingestion,
            Self::Typing(_) => Stage::Typing,
            Self::ContractEnforcement(_) => Stage::ContractEnforcement,
            Self::Standardization(_) => Stage::Standardization,
            Self::TargetAudit(_) => Stage::TargetAudit,
            Self::Imputation(_) => Stage::Imputation,
            Self::Split(_) => Stage::Split,
            Self::Representation(_) => Stage::Representation,
        }
    }

    /// The audit record, for execution stages.
    pub fn audit_record(&self) -> Option<&AuditRecord> {
        match self {
            Self::Ingestion(_) | Self::TargetAudit(_) => None,
            Self::Typing(r) => Some(&r.record),
            Self::ContractEnforcement(r) => Some(&r.record),
            Self::Standardization(r) => Some(&r.record),
            Self::Imputation(r) => Some(&r.record),
            Self::Split(r) => Some(&r.record),
            Self::Representation(r) => Some(&r.record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub sequence: usize,
    pub recorded_utc: DateTime<Utc>,
    pub report: StageReport,
}

/// Append-only trail of stage reports for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    run_id: Uuid,
    started_utc: DateTime<Utc>,
    entries: Vec<TrailEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_utc: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, report: StageReport) {
        self.entries.push(TrailEntry {
            sequence: self.entries.len(),
            recorded_utc: Utc::now(),
            report,
        });
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_utc(&self) -> DateTime<Utc> {
        self.started_utc
    }

    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn report_for(&self, stage: Stage) -> Option<&StageReport> {
        self.entries
            .iter()
            .map(|e| &e.report)
            .find(|r| r.stage() == stage)
    }

    /// The most recent audit record, i.e. the last consistent recovery point.
    pub fn last_record(&self) -> Option<&AuditRecord> {
        self.entries
            .iter()
            .rev()
            .find_map(|e| e.report.audit_record())
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_change_keeps_distinct_examples() {
        let mut change = ColumnChange::new("internet_service");
        for _ in 0..3 {
            change.record(Some("No internet service"), Some("no"));
        }
        for i in 0..20 {
            let before = format!("v{i}");
            change.record(Some(&before), None);
        }
        assert_eq!(change.cells_changed, 23);
        assert_eq!(change.examples.len(), MAX_EXAMPLES_PER_COLUMN);
        assert_eq!(
            change.examples.first(),
            Some(&ValueChange {
                before: Some("No internet service".to_owned()),
                after: Some("no".to_owned()),
            })
        );
    }

    #[test]
    fn test_empty_trail() {
        let trail = AuditTrail::new();
        assert!(trail.is_empty());
        assert!(trail.last_record().is_none());
        assert!(trail.report_for(Stage::Ingestion).is_none());
    }
}
