//! Estimators consumed at the inference boundary.
//!
//! Training happens elsewhere. A bundle only carries the estimator kind and
//! its parameters; [`load_estimator`] turns that into something that scores
//! an encoded feature row.

use crate::error::{PipelineError, Result};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Serialized estimator: a kind tag and opaque parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    pub kind: String,
    pub parameters: serde_json::Value,
}

/// Positive-class probability for one encoded row.
pub trait Estimator: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Number of encoded features the estimator expects
    fn n_features(&self) -> usize;

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Result<f64>;
}

/// Logistic model: `sigmoid(intercept + coefficients . x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearScorer {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearScorer {
    pub const KIND: &'static str = "linear_scorer";

    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Result<Self> {
        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(PipelineError::Config(
                "linear scorer parameters must be finite".to_owned(),
            ));
        }
        Ok(Self {
            intercept,
            coefficients,
        })
    }

    pub fn to_spec(&self) -> Result<EstimatorSpec> {
        Ok(EstimatorSpec {
            kind: Self::KIND.to_owned(),
            parameters: serde_json::to_value(self)?,
        })
    }
}

impl Estimator for LinearScorer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> Result<f64> {
        if row.len() != self.coefficients.len() {
            return Err(PipelineError::RepresentationInconsistency(format!(
                "estimator expects {} features, row has {}",
                self.coefficients.len(),
                row.len()
            )));
        }
        let weights = Array1::from_vec(self.coefficients.clone());
        let z = self.intercept + weights.dot(&row);
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// Build the estimator a spec describes.
pub fn load_estimator(spec: &EstimatorSpec) -> Result<Box<dyn Estimator>> {
    match spec.kind.as_str() {
        LinearScorer::KIND => {
            let scorer: LinearScorer = serde_json::from_value(spec.parameters.clone())?;
            Ok(Box::new(LinearScorer::new(scorer.intercept, scorer.coefficients)?))
        }
        other => Err(PipelineError::Config(format!(
            "unknown estimator kind '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_scorer_probability() -> anyhow::Result<()> {
        let scorer = LinearScorer::new(0.0, vec![1.0, -1.0])?;
        let even = scorer.predict_proba(array![2.0, 2.0].view())?;
        assert!((even - 0.5).abs() < 1e-12);

        let high = scorer.predict_proba(array![5.0, 0.0].view())?;
        assert!(high > 0.99);
        Ok(())
    }

    #[test]
    fn test_width_mismatch_is_rejected() -> anyhow::Result<()> {
        let scorer = LinearScorer::new(0.0, vec![1.0])?;
        let err = scorer.predict_proba(array![1.0, 2.0].view()).unwrap_err();
        assert_eq!(err.invariant(), "train-test-feature-parity");
        Ok(())
    }

    #[test]
    fn test_spec_round_trip_and_unknown_kind() -> anyhow::Result<()> {
        let spec = LinearScorer::new(-1.5, vec![0.25, 0.5])?.to_spec()?;
        let loaded = load_estimator(&spec)?;
        assert_eq!(loaded.kind(), "linear_scorer");
        assert_eq!(loaded.n_features(), 2);

        let unknown = EstimatorSpec {
            kind: "forest".to_owned(),
            parameters: serde_json::Value::Null,
        };
        assert!(load_estimator(&unknown).is_err());
        Ok(())
    }
}
