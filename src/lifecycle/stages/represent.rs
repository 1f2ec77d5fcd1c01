//! Representation stage - fit on the train features only, transform both
//! partitions and encode the target
//!
//! The steps run in a fixed order and any failure returns before a
//! [`Representation`] exists, so a run never ends with a partial one:
//!
//! 1. build the transformer from the decision
//! 2. fit it on `x_train`
//! 3. transform `x_train` and `x_test`
//! 4. check that both matrices carry the fitted feature names
//! 5. check that the target mapping covers every value of `y_train ∪ y_test`
//! 6. encode the target with the declared output type

use super::split::Partition;
use super::{Stage, StageExecutor};
use crate::contract::Scope;
use crate::dataset::Snapshot;
use crate::dataset::values::{column_names, text_values};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, StageReport};
use crate::lifecycle::payload::Payload;
use crate::representation::{
    CategoricalEncoding, ColumnTransformer, FittedTransformer, NumericEncoding, Representation,
    TargetEncoding,
};
use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RepresentationDecisionDoc")]
pub struct RepresentationDecision {
    numeric: NumericEncoding,
    categorical: CategoricalEncoding,
    target: TargetEncoding,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RepresentationDecisionDoc {
    numeric: NumericEncoding,
    categorical: CategoricalEncoding,
    target: TargetEncoding,
}

impl TryFrom<RepresentationDecisionDoc> for RepresentationDecision {
    type Error = PipelineError;

    fn try_from(doc: RepresentationDecisionDoc) -> Result<Self> {
        Self::new(doc.numeric, doc.categorical, doc.target)
    }
}

impl RepresentationDecision {
    pub fn new(
        numeric: NumericEncoding,
        categorical: CategoricalEncoding,
        target: TargetEncoding,
    ) -> Result<Self> {
        target.validate()?;
        Ok(Self {
            numeric,
            categorical,
            target,
        })
    }

    pub fn numeric(&self) -> NumericEncoding {
        self.numeric
    }

    pub fn categorical(&self) -> CategoricalEncoding {
        self.categorical
    }

    pub fn target(&self) -> &TargetEncoding {
        &self.target
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentationDiagnostics {
    pub x_train_before: (usize, usize),
    pub x_test_before: (usize, usize),
    pub x_train_after: (usize, usize),
    pub x_test_after: (usize, usize),
    pub feature_count: usize,
    pub fit_on: String,
    pub feature_names_match: bool,
    pub nan_after_train: usize,
    pub nan_after_test: usize,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub target_output_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationReport {
    pub record: AuditRecord,
    pub diagnostics: RepresentationDiagnostics,
    pub feature_names: Vec<String>,
}

pub struct RepresentationStage {
    decision: RepresentationDecision,
}

impl RepresentationStage {
    pub fn new(decision: RepresentationDecision) -> Self {
        Self { decision }
    }
}

fn nan_count(matrix: &Array2<f64>) -> usize {
    matrix.iter().filter(|v| v.is_nan()).count()
}

fn diagnostics(
    partition: &Partition,
    fitted: &FittedTransformer,
    x_train: &Array2<f64>,
    x_test: &Array2<f64>,
    mapping: &TargetEncoding,
) -> RepresentationDiagnostics {
    RepresentationDiagnostics {
        x_train_before: partition.x_train.shape(),
        x_test_before: partition.x_test.shape(),
        x_train_after: x_train.dim(),
        x_test_after: x_test.dim(),
        feature_count: fitted.n_features_out(),
        fit_on: "train_only".to_owned(),
        feature_names_match: x_train.ncols() == x_test.ncols(),
        nan_after_train: nan_count(x_train),
        nan_after_test: nan_count(x_test),
        numeric_columns: fitted.numeric_columns().into_iter().map(str::to_owned).collect(),
        categorical_columns: fitted.categorical_columns().into_iter().map(str::to_owned).collect(),
        target_output_type: mapping.output_type().as_str().to_owned(),
    }
}

/// Both feature frames must carry exactly the scope's features, in order.
fn check_partition_columns(scope: &Scope, partition: &Partition) -> Result<()> {
    for (side, frame) in [("x_train", &partition.x_train), ("x_test", &partition.x_test)] {
        let columns = column_names(frame);
        if let Some(target) = scope.target()
            && columns.iter().any(|c| c == target)
        {
            return Err(PipelineError::ScopeIntegrity(format!(
                "target '{target}' present in {side}"
            )));
        }
        if columns != scope.features() {
            return Err(PipelineError::RepresentationInconsistency(format!(
                "{side} columns do not match the scope features"
            )));
        }
    }
    Ok(())
}

impl StageExecutor for RepresentationStage {
    fn stage(&self) -> Stage {
        Stage::Representation
    }

    fn description(&self) -> String {
        format!(
            "Fit on train only: numeric {}, categorical {}, target {}",
            self.decision.numeric.as_str(),
            self.decision.categorical.describe(),
            self.decision.target.output_type().as_str()
        )
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Representation)?;
        let scope = payload.require_scope()?;
        let partition = payload.require_partition()?;
        check_partition_columns(scope, partition)?;

        let transformer = ColumnTransformer::new(self.decision.numeric, self.decision.categorical);
        let fitted = transformer.fit(&partition.x_train)?;
        let x_train = fitted.transform(&partition.x_train)?;
        let x_test = fitted.transform(&partition.x_test)?;

        let feature_names = fitted.feature_names().to_vec();
        if x_train.ncols() != feature_names.len() || x_test.ncols() != feature_names.len() {
            return Err(PipelineError::RepresentationInconsistency(format!(
                "train has {} columns, test has {}, fitted names {}",
                x_train.ncols(),
                x_test.ncols(),
                feature_names.len()
            )));
        }

        let mapping = &self.decision.target;
        let observed = [text_values(&partition.y_train)?, text_values(&partition.y_test)?].concat();
        let missing = mapping.uncovered(&observed);
        if !missing.is_empty() {
            tracing::warn!(?missing, "target mapping does not cover observed values");
            return Err(PipelineError::MappingCoverage { missing });
        }
        let y_train = mapping.encode(&partition.y_train)?;
        let y_test = mapping.encode(&partition.y_test)?;

        let diagnostics = diagnostics(partition, &fitted, &x_train, &x_test, mapping);
        if diagnostics.nan_after_train + diagnostics.nan_after_test > 0 {
            tracing::warn!(
                train = diagnostics.nan_after_train,
                test = diagnostics.nan_after_test,
                "missing numeric values survive into the representation"
            );
        }

        let record = AuditRecord {
            stage: Stage::Representation,
            created_utc: Utc::now(),
            snapshot_before: payload.snapshot().clone(),
            snapshot_after: Snapshot::of_matrix(x_train.nrows() + x_test.nrows(), &feature_names),
            rules_applied: vec![
                format!("numeric: {}", self.decision.numeric.as_str()),
                format!("categorical: {}", self.decision.categorical.describe()),
                format!("target: encode to {}", mapping.output_type().as_str()),
                "fit on x_train only".to_owned(),
            ],
            declared_scope: scope.features().to_vec(),
            effective_scope: fitted.input_columns().to_vec(),
            excluded: Vec::new(),
            column_changes: Vec::new(),
        };

        tracing::info!(
            features_in = fitted.n_features_in(),
            features_out = feature_names.len(),
            train_rows = x_train.nrows(),
            test_rows = x_test.nrows(),
            "representation built"
        );

        let report = RepresentationReport {
            record,
            diagnostics,
            feature_names: feature_names.clone(),
        };
        let representation = Representation {
            x_train,
            x_test,
            y_train,
            y_test,
            feature_names,
            transformer: fitted,
            target_mapping: mapping.clone(),
        };
        Ok(payload
            .advance(
                Stage::Representation,
                payload.dataset().clone(),
                StageReport::Representation(report),
            )
            .with_representation(representation))
    }
}
