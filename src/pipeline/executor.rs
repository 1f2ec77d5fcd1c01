//! Pipeline execution engine.
//!
//! Threads one immutable [`Payload`] through the eight stages in order. The
//! first error stops the run; the failure carries the stage, the violated
//! invariant, the trail accumulated so far and the last consistent audit record.

use super::spec::RunPlan;
use super::validation::validate_plan;
use crate::contract::SchemaContract;
use crate::dataset::SnapshotDelta;
use crate::dataset::profile::DEFAULT_MISSING_TOP_N;
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, AuditTrail};
use crate::lifecycle::payload::Payload;
use crate::lifecycle::stages::contract::ContractStage;
use crate::lifecycle::stages::impute::ImputationStage;
use crate::lifecycle::stages::ingest::{IngestSource, IngestionStage};
use crate::lifecycle::stages::represent::RepresentationStage;
use crate::lifecycle::stages::split::SplitStage;
use crate::lifecycle::stages::standardize::StandardizationStage;
use crate::lifecycle::stages::target_audit::TargetAuditStage;
use crate::lifecycle::stages::typing::TypingStage;
use crate::lifecycle::stages::{Stage, StageExecutor};
use crate::representation::Representation;
use std::time::{Duration, Instant};

/// A contract plus a validated run plan, ready to run against any source.
#[derive(Debug, Clone)]
pub struct Pipeline {
    contract: SchemaContract,
    plan: RunPlan,
    missing_top_n: usize,
}

impl Pipeline {
    /// Validate `plan` against `contract` before any data is read.
    pub fn new(contract: SchemaContract, plan: RunPlan) -> Result<Self> {
        let errors = validate_plan(&plan, &contract, None);
        if !errors.is_empty() {
            return Err(PipelineError::Decision(format!(
                "Run plan validation failed:\n{}",
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n")
            )));
        }
        Ok(Self {
            contract,
            plan,
            missing_top_n: DEFAULT_MISSING_TOP_N,
        })
    }

    /// Columns listed in the ingestion missing-value summary.
    pub fn with_missing_top_n(mut self, top_n: usize) -> Self {
        self.missing_top_n = top_n;
        self
    }

    pub fn contract(&self) -> &SchemaContract {
        &self.contract
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    fn executors(&self, source: IngestSource) -> Vec<Box<dyn StageExecutor>> {
        vec![
            Box::new(IngestionStage::new(source).with_missing_top_n(self.missing_top_n)),
            Box::new(TypingStage::new(self.plan.typing.clone())),
            Box::new(
                ContractStage::new(self.contract.clone()).with_thresholds(self.plan.candidates.clone()),
            ),
            Box::new(StandardizationStage::new(self.plan.standardization.clone())),
            Box::new(TargetAuditStage::new()),
            Box::new(ImputationStage::new(self.plan.imputation.clone())),
            Box::new(SplitStage::new(self.plan.split.clone())),
            Box::new(RepresentationStage::new(self.plan.representation.clone())),
        ]
    }

    /// Run every stage over `source`.
    pub fn run(&self, source: IngestSource) -> std::result::Result<PipelineOutcome, PipelineFailure> {
        let start = Instant::now();
        let mut payload = Payload::start();
        tracing::info!(plan = %self.plan.name, contract = %self.contract.name, "pipeline started");

        for executor in self.executors(source) {
            let stage = executor.stage();
            tracing::info!(%stage, description = %executor.description(), "stage started");

            let next = executor
                .execute(&payload)
                .map_err(|error| PipelineFailure::at(stage, error, &payload))?;

            let delta = SnapshotDelta::between(payload.snapshot(), next.snapshot());
            tracing::info!(
                %stage,
                rows = next.snapshot().row_count,
                columns = next.snapshot().column_count,
                rows_delta = delta.rows_delta,
                columns_delta = delta.columns_delta,
                type_changes = delta.type_changes.len(),
                "stage finished"
            );
            payload = next;

            if stage == Stage::TargetAudit {
                self.check_target_gate(&payload)?;
            }
        }

        let outcome = PipelineOutcome {
            payload,
            duration: start.elapsed(),
        };
        tracing::info!("{}", outcome.summary());
        Ok(outcome)
    }

    fn check_target_gate(&self, payload: &Payload) -> std::result::Result<(), PipelineFailure> {
        let Some(status) = payload.target_status() else {
            return Ok(());
        };
        if self.plan.target_gate.blocks(status) {
            let error = PipelineError::TargetGate(format!(
                "target audit status '{status}' under policy '{}'",
                self.plan.target_gate.as_str()
            ));
            return Err(PipelineFailure::at(Stage::TargetAudit, error, payload));
        }
        Ok(())
    }
}

/// Successful run: the terminal payload.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    payload: Payload,
    duration: Duration,
}

impl PipelineOutcome {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn trail(&self) -> &AuditTrail {
        self.payload.trail()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn representation(&self) -> Result<&Representation> {
        self.payload.representation().ok_or_else(|| {
            PipelineError::StageOrder("run finished without a representation".to_owned())
        })
    }

    /// Create a summary message
    pub fn summary(&self) -> String {
        let stages = self.payload.trail().len();
        let secs = self.duration.as_secs_f64();
        match self.payload.representation() {
            Some(rep) => format!(
                "Pipeline completed: train {} / test {} rows, {} features, {stages} stages, {secs:.2}s",
                rep.x_train.nrows(),
                rep.x_test.nrows(),
                rep.feature_names.len(),
            ),
            None => format!(
                "Pipeline completed: {} rows, {stages} stages, {secs:.2}s",
                self.payload.snapshot().row_count
            ),
        }
    }
}

/// Why and where a run stopped.
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    /// Stable invariant name, see [`PipelineError::invariant`]
    pub invariant: &'static str,
    pub error: PipelineError,
    /// Everything recorded before the failing stage
    pub trail: AuditTrail,
    /// Last consistent audit record, the recovery point
    pub last_record: Option<AuditRecord>,
}

impl PipelineFailure {
    fn at(stage: Stage, error: PipelineError, payload: &Payload) -> Self {
        tracing::error!(%stage, invariant = error.invariant(), %error, "pipeline aborted");
        Self {
            stage,
            invariant: error.invariant(),
            trail: payload.trail().clone(),
            last_record: payload.trail().last_record().cloned(),
            error,
        }
    }

    pub fn summary(&self) -> String {
        let recovery = self
            .last_record
            .as_ref()
            .map_or_else(|| "none".to_owned(), |r| r.stage.to_string());
        format!(
            "Pipeline aborted at '{}' ({}): {}. Last consistent record: {recovery}",
            self.stage, self.invariant, self.error
        )
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
