//! The immutable value threaded through the stages of one run.

use super::audit::{AuditTrail, StageReport};
use super::stages::Stage;
use super::stages::split::Partition;
use super::stages::target_audit::TargetStatus;
use crate::contract::{SchemaContract, Scope};
use crate::dataset::Snapshot;
use crate::error::{PipelineError, Result};
use crate::representation::Representation;
use polars::prelude::*;

/// Dataset-in-progress plus everything the stages derived so far.
///
/// A payload is never changed in place. Each stage reads one and builds the
/// next through [`Payload::advance`], so a failed stage leaves the previous
/// payload (and its trail) intact as the recovery point.
#[derive(Debug, Clone)]
pub struct Payload {
    dataset: DataFrame,
    snapshot: Snapshot,
    contract: Option<SchemaContract>,
    scope: Option<Scope>,
    target_status: Option<TargetStatus>,
    partition: Option<Partition>,
    representation: Option<Representation>,
    trail: AuditTrail,
    last_stage: Option<Stage>,
}

impl Payload {
    /// Payload before ingestion: no data, empty trail.
    pub fn start() -> Self {
        let dataset = DataFrame::empty();
        Self {
            snapshot: Snapshot::capture(&dataset),
            dataset,
            contract: None,
            scope: None,
            target_status: None,
            partition: None,
            representation: None,
            trail: AuditTrail::new(),
            last_stage: None,
        }
    }

    pub fn dataset(&self) -> &DataFrame {
        &self.dataset
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn contract(&self) -> Option<&SchemaContract> {
        self.contract.as_ref()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn target_status(&self) -> Option<TargetStatus> {
        self.target_status
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    pub fn representation(&self) -> Option<&Representation> {
        self.representation.as_ref()
    }

    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    pub fn last_stage(&self) -> Option<Stage> {
        self.last_stage
    }

    /// Fails unless `stage` is exactly the next stage to run.
    pub fn ensure_ready_for(&self, stage: Stage) -> Result<()> {
        let ready = match self.last_stage {
            None => stage == Stage::Ingestion,
            Some(last) => last.can_transition_to(stage),
        };
        if ready {
            Ok(())
        } else {
            Err(PipelineError::StageOrder(format!(
                "cannot run '{stage}' after '{}'",
                self.last_stage.map_or("start", |s| s.as_str())
            )))
        }
    }

    /// Scope, which exists from contract enforcement onwards.
    pub fn require_scope(&self) -> Result<&Scope> {
        self.scope.as_ref().ok_or_else(|| {
            PipelineError::StageOrder("no scope yet: contract enforcement has not run".to_owned())
        })
    }

    pub fn require_partition(&self) -> Result<&Partition> {
        self.partition.as_ref().ok_or_else(|| {
            PipelineError::StageOrder("no partition yet: split has not run".to_owned())
        })
    }

    /// Next payload after `stage` produced `dataset` and `report`.
    pub(crate) fn advance(&self, stage: Stage, dataset: DataFrame, report: StageReport) -> Self {
        let mut trail = self.trail.clone();
        trail.push(report);
        Self {
            snapshot: Snapshot::capture(&dataset),
            dataset,
            contract: self.contract.clone(),
            scope: self.scope.clone(),
            target_status: self.target_status,
            partition: self.partition.clone(),
            representation: self.representation.clone(),
            trail,
            last_stage: Some(stage),
        }
    }

    pub(crate) fn with_scope(mut self, contract: SchemaContract, scope: Scope) -> Self {
        self.contract = Some(contract);
        self.scope = Some(scope);
        self
    }

    pub(crate) fn with_target_status(mut self, status: TargetStatus) -> Self {
        self.target_status = Some(status);
        self
    }

    pub(crate) fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    pub(crate) fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = Some(representation);
        self
    }
}
