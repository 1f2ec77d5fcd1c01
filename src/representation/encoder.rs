//! One-hot encoding of categorical columns.

use crate::dataset::values::NULL_LABEL;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// What to do with a category the encoder never saw during fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleUnknown {
    /// Encode as an all-zero block
    Ignore,
    /// Fail the transform
    Error,
}

impl HandleUnknown {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Error => "error",
        }
    }
}

/// Unfitted one-hot encoder for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneHotEncoder {
    handle_unknown: HandleUnknown,
}

impl OneHotEncoder {
    pub fn new(handle_unknown: HandleUnknown) -> Self {
        Self { handle_unknown }
    }

    /// Learn the sorted distinct non-null categories of `values`.
    pub fn fit(&self, column: &str, values: &[Option<String>]) -> FittedOneHot {
        let mut categories: Vec<String> = values.iter().flatten().cloned().collect();
        categories.sort();
        categories.dedup();
        FittedOneHot {
            column: column.to_owned(),
            categories,
            handle_unknown: self.handle_unknown,
        }
    }
}

/// Categories learned for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittedOneHot {
    pub column: String,
    /// Sorted, distinct
    pub categories: Vec<String>,
    pub handle_unknown: HandleUnknown,
}

impl FittedOneHot {
    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|cat| format!("cat__{}_{cat}", self.column))
            .collect()
    }

    /// Append the encoded block for one value to `row`.
    pub fn encode_into(&self, value: Option<&str>, row: &mut Vec<f64>) -> Result<()> {
        let hit = value.and_then(|v| {
            self.categories
                .binary_search_by(|c| c.as_str().cmp(v))
                .ok()
        });
        if hit.is_none() && self.handle_unknown == HandleUnknown::Error {
            return Err(PipelineError::UnknownCategory {
                column: self.column.clone(),
                value: value.unwrap_or(NULL_LABEL).to_owned(),
            });
        }
        row.extend((0..self.categories.len()).map(|i| if hit == Some(i) { 1.0 } else { 0.0 }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(raw: &[Option<&str>]) -> Vec<Option<String>> {
        raw.iter().map(|v| v.map(str::to_owned)).collect()
    }

    #[test]
    fn test_fit_sorts_and_skips_nulls() {
        let fitted = OneHotEncoder::new(HandleUnknown::Ignore)
            .fit("contract", &values(&[Some("Two year"), None, Some("Month-to-month"), Some("Two year")]));
        assert_eq!(fitted.categories, vec!["Month-to-month", "Two year"]);
        assert_eq!(
            fitted.feature_names(),
            vec!["cat__contract_Month-to-month", "cat__contract_Two year"]
        );
    }

    #[test]
    fn test_unknown_and_null_encode_as_zeros_when_ignored() -> anyhow::Result<()> {
        let fitted = OneHotEncoder::new(HandleUnknown::Ignore).fit("c", &values(&[Some("a"), Some("b")]));
        let mut row = Vec::new();
        fitted.encode_into(Some("b"), &mut row)?;
        fitted.encode_into(Some("zzz"), &mut row)?;
        fitted.encode_into(None, &mut row)?;
        assert_eq!(row, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_unknown_fails_when_strict() {
        let fitted = OneHotEncoder::new(HandleUnknown::Error).fit("c", &values(&[Some("a")]));
        let mut row = Vec::new();
        let err = fitted.encode_into(Some("b"), &mut row).unwrap_err();
        assert_eq!(err.invariant(), "known-categories");
        assert!(err.to_string().contains("'c'"));
        assert!(row.is_empty());
    }
}
