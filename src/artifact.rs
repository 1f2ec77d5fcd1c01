//! Terminal artifact: one JSON bundle holding the fitted transformer, the
//! target mapping and an estimator.
//!
//! A bundle is loadable on its own. Applying its transformer to a raw record
//! with the contract's features reproduces the training encoding, so the
//! inference side never needs the pipeline.
//!
//! [`export_run`] writes the rest of a run's outputs: the audit trail and
//! the encoded partitions as CSV, each with an integrity receipt.

use crate::dataset::save_df;
use crate::error::{PipelineError, Result, ResultExt as _};
use crate::inference::estimator::EstimatorSpec;
use crate::integrity::{
    ArtifactKind, ArtifactShape, IntegrityReceipt, ProducerInfo, create_receipt, save_receipt,
};
use crate::lifecycle::audit::AuditTrail;
use crate::pipeline::PipelineOutcome;
use crate::representation::{FittedTransformer, Representation, TargetEncoding};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current bundle schema version.
pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub bundle_version: u32,
    pub created_utc: DateTime<Utc>,
    pub producer: ProducerInfo,
    /// Raw input columns, in the order the transformer expects them
    pub contract_features: Vec<String>,
    pub target: String,
    pub transformer: FittedTransformer,
    pub target_mapping: TargetEncoding,
    pub estimator: EstimatorSpec,
}

impl ModelBundle {
    /// Bundle a run's representation with an externally trained estimator.
    pub fn new(representation: &Representation, target: impl Into<String>, estimator: EstimatorSpec) -> Self {
        Self {
            bundle_version: BUNDLE_VERSION,
            created_utc: Utc::now(),
            producer: ProducerInfo::current(),
            contract_features: representation.transformer.input_columns().to_vec(),
            target: target.into(),
            transformer: representation.transformer.clone(),
            target_mapping: representation.target_mapping.clone(),
            estimator,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: Self = serde_json::from_str(json)?;
        bundle.check()?;
        Ok(bundle)
    }

    fn check(&self) -> Result<()> {
        if self.bundle_version != BUNDLE_VERSION {
            return Err(PipelineError::Config(format!(
                "unsupported bundle version {}, expected {BUNDLE_VERSION}",
                self.bundle_version
            )));
        }
        if self.contract_features != self.transformer.input_columns() {
            return Err(PipelineError::RepresentationInconsistency(
                "bundle contract features differ from the transformer's input columns".to_owned(),
            ));
        }
        Ok(())
    }

    /// Write the bundle and its receipt, returning both paths.
    pub fn save(&self, path: &Path) -> Result<(PathBuf, IntegrityReceipt)> {
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write model bundle {}", path.display()))?;
        let shape = ArtifactShape {
            rows: None,
            columns: Some(self.transformer.n_features_out()),
        };
        let receipt = create_receipt(path, ArtifactKind::ModelBundle, Some(shape))?;
        let receipt_path = save_receipt(&receipt, path)?;
        tracing::info!(bundle = %path.display(), receipt = %receipt_path.display(), "model bundle saved");
        Ok((receipt_path, receipt))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model bundle {}", path.display()))?;
        Self::from_json(&json)
    }
}

/// Encoded matrix as a frame whose columns are the final feature names.
pub fn matrix_frame(matrix: &Array2<f64>, feature_names: &[String]) -> Result<DataFrame> {
    if matrix.ncols() != feature_names.len() {
        return Err(PipelineError::RepresentationInconsistency(format!(
            "{} feature names for a matrix with {} columns",
            feature_names.len(),
            matrix.ncols()
        )));
    }
    let columns: Vec<Column> = feature_names
        .iter()
        .zip(matrix.columns())
        .map(|(name, values)| Column::from(Series::new(name.as_str().into(), values.to_vec())))
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Write the trail as pretty JSON.
pub fn write_trail(trail: &AuditTrail, path: &Path) -> Result<()> {
    fs::write(path, trail.to_json()?)
        .with_context(|| format!("Failed to write audit trail {}", path.display()))
}

fn receipt_for(path: &Path, kind: ArtifactKind, shape: ArtifactShape, receipts: bool) -> Result<()> {
    if receipts {
        let receipt = create_receipt(path, kind, Some(shape))?;
        save_receipt(&receipt, path)?;
    }
    Ok(())
}

/// Write the audit trail and encoded partitions of a finished run into
/// `out_dir`. Returns the written artifact paths (receipts excluded).
pub fn export_run(outcome: &PipelineOutcome, out_dir: &Path, receipts: bool) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let rep = outcome.representation()?;
    let mut written = Vec::new();

    let trail_path = out_dir.join("audit_trail.json");
    write_trail(outcome.trail(), &trail_path)?;
    receipt_for(&trail_path, ArtifactKind::AuditTrail, ArtifactShape::default(), receipts)?;
    written.push(trail_path);

    for (name, matrix) in [("x_train.csv", &rep.x_train), ("x_test.csv", &rep.x_test)] {
        let path = out_dir.join(name);
        save_df(&mut matrix_frame(matrix, &rep.feature_names)?, &path)?;
        let shape = ArtifactShape {
            rows: Some(matrix.nrows()),
            columns: Some(matrix.ncols()),
        };
        receipt_for(&path, ArtifactKind::FeatureMatrix, shape, receipts)?;
        written.push(path);
    }

    for (name, y) in [("y_train.csv", &rep.y_train), ("y_test.csv", &rep.y_test)] {
        let path = out_dir.join(name);
        save_df(&mut DataFrame::new(vec![Column::from(y.clone())])?, &path)?;
        let shape = ArtifactShape {
            rows: Some(y.len()),
            columns: Some(1),
        };
        receipt_for(&path, ArtifactKind::TargetVector, shape, receipts)?;
        written.push(path);
    }

    tracing::info!(out_dir = %out_dir.display(), files = written.len(), "run outputs exported");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::estimator::LinearScorer;
    use crate::integrity::verify_receipt;
    use crate::representation::{
        CategoricalEncoding, ColumnTransformer, HandleUnknown, NumericEncoding, TargetDtype,
    };
    use polars::prelude::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn representation() -> anyhow::Result<Representation> {
        let train = df!(
            "tenure" => [1_i64, 5, 9],
            "contract" => ["Month-to-month", "One year", "Two year"],
        )?;
        let transformer = ColumnTransformer::new(
            NumericEncoding::StandardScaler,
            CategoricalEncoding::OneHot {
                handle_unknown: HandleUnknown::Ignore,
            },
        )
        .fit(&train)?;
        let mapping: BTreeMap<String, i64> =
            [("No".to_owned(), 0), ("Yes".to_owned(), 1)].into_iter().collect();
        Ok(Representation {
            x_train: transformer.transform(&train)?,
            x_test: Array2::zeros((0, transformer.n_features_out())),
            y_train: Series::new("Churn".into(), [0_i64, 1, 0]),
            y_test: Series::new("Churn".into(), Vec::<i64>::new()),
            feature_names: transformer.feature_names().to_vec(),
            target_mapping: TargetEncoding::map(mapping, TargetDtype::Int64)?,
            transformer,
        })
    }

    #[test]
    fn test_bundle_saves_with_verifiable_receipt() -> anyhow::Result<()> {
        let rep = representation()?;
        let estimator = LinearScorer::new(0.1, vec![0.0; rep.feature_names.len()])?.to_spec()?;
        let bundle = ModelBundle::new(&rep, "Churn", estimator);

        let dir = TempDir::new()?;
        let path = dir.path().join("model_bundle.json");
        let (receipt_path, receipt) = bundle.save(&path)?;
        assert_eq!(receipt.artifact.shape.columns, Some(4));
        assert!(verify_receipt(&receipt_path)?.passed);

        let loaded = ModelBundle::load(&path)?;
        assert_eq!(loaded.contract_features, vec!["tenure", "contract"]);
        assert_eq!(loaded.transformer.feature_names(), bundle.transformer.feature_names());
        assert_eq!(loaded.target_mapping, bundle.target_mapping);
        assert_eq!(loaded.estimator, bundle.estimator);
        Ok(())
    }

    #[test]
    fn test_tampered_feature_list_is_rejected() -> anyhow::Result<()> {
        let rep = representation()?;
        let estimator = LinearScorer::new(0.0, vec![0.0; 4])?.to_spec()?;
        let mut bundle = ModelBundle::new(&rep, "Churn", estimator);
        bundle.contract_features.reverse();

        let err = ModelBundle::from_json(&bundle.to_json()?).unwrap_err();
        assert_eq!(err.invariant(), "train-test-feature-parity");
        Ok(())
    }

    #[test]
    fn test_matrix_frame_uses_feature_names() -> anyhow::Result<()> {
        let rep = representation()?;
        let frame = matrix_frame(&rep.x_train, &rep.feature_names)?;
        assert_eq!(frame.shape(), (3, 4));
        assert_eq!(
            frame.get_column_names_str(),
            vec![
                "num__tenure",
                "cat__contract_Month-to-month",
                "cat__contract_One year",
                "cat__contract_Two year"
            ]
        );

        let err = matrix_frame(&rep.x_train, &rep.feature_names[..2]).unwrap_err();
        assert_eq!(err.invariant(), "train-test-feature-parity");
        Ok(())
    }
}
