//! Numeric column handling: passthrough or standard scaling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum NumericEncoding {
    Passthrough,
    /// Center on the train mean and divide by the train population std
    StandardScaler,
}

impl NumericEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::StandardScaler => "standard_scaler",
        }
    }

    pub fn fit(&self, column: &str, values: &[Option<f64>]) -> FittedScaler {
        let (mean, scale) = match self {
            Self::Passthrough => (0.0, 1.0),
            Self::StandardScaler => mean_and_std(values),
        };
        FittedScaler {
            column: column.to_owned(),
            strategy: *self,
            mean,
            scale,
        }
    }
}

/// Mean and population standard deviation of the non-null values.
///
/// A zero (or undefined) deviation becomes 1 so constant columns map to 0.
fn mean_and_std(values: &[Option<f64>]) -> (f64, f64) {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return (0.0, 1.0);
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };
    (mean, scale)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    pub column: String,
    pub strategy: NumericEncoding,
    pub mean: f64,
    pub scale: f64,
}

impl FittedScaler {
    pub fn feature_name(&self) -> String {
        format!("num__{}", self.column)
    }

    /// Missing values stay missing (NaN).
    pub fn transform(&self, value: Option<f64>) -> f64 {
        match (value, self.strategy) {
            (None, _) => f64::NAN,
            (Some(v), NumericEncoding::Passthrough) => v,
            (Some(v), NumericEncoding::StandardScaler) => (v - self.mean) / self.scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_scaler_uses_population_std() {
        let fitted = NumericEncoding::StandardScaler.fit("tenure", &[Some(2.0), Some(4.0), None, Some(6.0)]);
        assert!((fitted.mean - 4.0).abs() < 1e-12);
        assert!((fitted.scale - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(fitted.transform(Some(4.0)).abs() < 1e-12);
        assert!(fitted.transform(None).is_nan());
        assert_eq!(fitted.feature_name(), "num__tenure");
    }

    #[test]
    fn test_constant_column_scales_by_one() {
        let fitted = NumericEncoding::StandardScaler.fit("c", &[Some(5.0), Some(5.0)]);
        assert!((fitted.scale - 1.0).abs() < f64::EPSILON);
        assert!((fitted.transform(Some(7.0)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_passthrough_keeps_values() {
        let fitted = NumericEncoding::Passthrough.fit("c", &[Some(10.0), Some(20.0)]);
        assert!((fitted.transform(Some(12.5)) - 12.5).abs() < f64::EPSILON);
    }
}
