//! Contract enforcement stage - keep/drop by contract, derive the scope and
//! diagnose categorical candidates

use super::candidates::{CandidateReport, CandidateThresholds, discover_candidates};
use super::{Stage, StageExecutor};
use crate::contract::{SchemaContract, Scope};
use crate::dataset::Snapshot;
use crate::dataset::values::{column_names, select_columns};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, ExcludedColumn, ExclusionReason, StageReport};
use crate::lifecycle::payload::Payload;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReport {
    pub record: AuditRecord,
    pub contract_name: String,
    pub contract_version: u32,
    /// Features then target, in contract order
    pub kept: Vec<String>,
    /// Every other column of the input, sorted
    pub dropped: Vec<String>,
    /// Optional features the dataset does not have
    pub missing_optional: Vec<String>,
    pub scope: Scope,
    pub candidates: CandidateReport,
}

pub struct ContractStage {
    contract: SchemaContract,
    thresholds: CandidateThresholds,
}

impl ContractStage {
    pub fn new(contract: SchemaContract) -> Self {
        Self {
            contract,
            thresholds: CandidateThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: CandidateThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

impl StageExecutor for ContractStage {
    fn stage(&self) -> Stage {
        Stage::ContractEnforcement
    }

    fn description(&self) -> String {
        format!(
            "Enforce contract '{}' v{} ({} features)",
            self.contract.name,
            self.contract.version,
            self.contract.feature_names.len()
        )
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::ContractEnforcement)?;
        let df = payload.dataset();
        let present = column_names(df);
        let has = |name: &str| present.iter().any(|c| c == name);

        let mut missing = Vec::new();
        let mut missing_optional = Vec::new();
        let mut features = Vec::new();
        for feature in &self.contract.feature_names {
            if has(feature) {
                features.push(feature.clone());
            } else if self.contract.is_optional(feature) {
                missing_optional.push(feature.clone());
            } else {
                missing.push(feature.clone());
            }
        }
        if let Some(target) = &self.contract.target_name
            && !has(target)
        {
            missing.push(target.clone());
        }
        if !missing.is_empty() {
            return Err(PipelineError::ContractViolation(format!(
                "dataset lacks contract columns: {}",
                missing.join(", ")
            )));
        }

        let scope = Scope::new(features, self.contract.target_name.clone())?;
        let mut kept = scope.features().to_vec();
        if let Some(target) = scope.target() {
            kept.push(target.to_owned());
        }
        let mut dropped: Vec<String> = present.iter().filter(|c| !kept.contains(c)).cloned().collect();
        dropped.sort();

        let out = select_columns(df, &kept)?;
        let exclude: Vec<String> = scope.target().map(str::to_owned).into_iter().collect();
        let candidates = discover_candidates(&out, &exclude, &self.thresholds)?;

        let excluded = missing_optional
            .iter()
            .map(|c| ExcludedColumn {
                column: c.clone(),
                reason: ExclusionReason::NotPresent,
            })
            .chain(dropped.iter().map(|c| ExcludedColumn {
                column: c.clone(),
                reason: self.contract.drop_reason(c),
            }))
            .collect();
        let declared_drops: Vec<&str> = dropped
            .iter()
            .filter(|c| self.contract.drop_columns.contains(c))
            .map(String::as_str)
            .collect();

        let record = AuditRecord {
            stage: Stage::ContractEnforcement,
            created_utc: Utc::now(),
            snapshot_before: payload.snapshot().clone(),
            snapshot_after: Snapshot::capture(&out),
            rules_applied: vec![
                format!("keep {} contract columns", kept.len()),
                format!("drop {} non-contract columns", dropped.len()),
                format!("declared drops: {}", declared_drops.join(", ")),
            ],
            declared_scope: self.contract.kept_columns(),
            effective_scope: kept.clone(),
            excluded,
            column_changes: Vec::new(),
        };

        if !missing_optional.is_empty() {
            tracing::warn!(missing = ?missing_optional, "optional contract features absent from dataset");
        }
        tracing::info!(
            kept = kept.len(),
            dropped = dropped.len(),
            candidates = candidates.candidates.len(),
            "contract enforced"
        );

        let report = ContractReport {
            record,
            contract_name: self.contract.name.clone(),
            contract_version: self.contract.version,
            kept,
            dropped,
            missing_optional,
            scope: scope.clone(),
            candidates,
        };
        Ok(payload
            .advance(Stage::ContractEnforcement, out, StageReport::ContractEnforcement(report))
            .with_scope(self.contract.clone(), scope))
    }
}
