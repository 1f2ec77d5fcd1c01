//! Inference boundary: typed requests, the feature mapping and scoring
//! against a saved [`ModelBundle`].
//!
//! - [`boundary`]: the 8-field request, the labelled response and the
//!   error classes a gateway distinguishes
//! - [`mapping`]: declarative boundary-field to model-feature mapping
//! - [`estimator`]: the scoring trait and the bundled linear scorer

pub mod boundary;
pub mod estimator;
pub mod mapping;

pub use boundary::{BoundaryError, BoundaryErrorKind, ChurnLabel, PredictRequest, PredictResponse};
pub use estimator::{Estimator, EstimatorSpec, LinearScorer, load_estimator};
pub use mapping::{FeatureMap, FieldMapping, MappedRecord};

use crate::artifact::ModelBundle;
use std::path::Path;

/// A loaded bundle ready to answer requests.
pub struct Predictor {
    bundle: ModelBundle,
    estimator: Box<dyn Estimator>,
    feature_map: Option<FeatureMap>,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("features", &self.bundle.contract_features)
            .field("estimator", &self.estimator.kind())
            .field("feature_map", &self.feature_map.is_some())
            .finish()
    }
}

impl Predictor {
    pub fn new(bundle: ModelBundle) -> Result<Self, BoundaryError> {
        let estimator = load_estimator(&bundle.estimator)?;
        if estimator.n_features() != bundle.transformer.n_features_out() {
            return Err(BoundaryError::internal(format!(
                "estimator expects {} features, transformer produces {}",
                estimator.n_features(),
                bundle.transformer.n_features_out()
            )));
        }
        Ok(Self {
            bundle,
            estimator,
            feature_map: None,
        })
    }

    /// Load a bundle from disk. An unreadable bundle means the service is
    /// not ready to answer.
    pub fn load(path: &Path) -> Result<Self, BoundaryError> {
        let bundle = ModelBundle::load(path).map_err(|e| {
            tracing::error!(bundle = %path.display(), error = %e, "model bundle unavailable");
            BoundaryError::service_unavailable(format!("model bundle unavailable: {e}"))
        })?;
        Self::new(bundle)
    }

    /// Route requests through a mapping when the model's features differ
    /// from the boundary fields.
    pub fn with_feature_map(mut self, feature_map: FeatureMap) -> Self {
        self.feature_map = Some(feature_map);
        self
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn predict(&self, request: &PredictRequest) -> Result<PredictResponse, BoundaryError> {
        request.validate()?;
        let record = request.to_record();
        let features = match &self.feature_map {
            Some(map) => map.apply(&record).features,
            None => record,
        };
        let row = self.bundle.transformer.transform_record(&features)?;
        let probability = self.estimator.predict_proba(row.view())?;
        let response = PredictResponse::from_probability(probability)?;
        tracing::debug!(label = response.label.as_str(), probability = response.probability, "prediction");
        Ok(response)
    }
}
