//! Column transformer: numeric block then one-hot blocks.
//!
//! [`ColumnTransformer`] is the unfitted configuration. Fitting it on a train
//! frame yields a [`FittedTransformer`] whose state depends on nothing but
//! that frame. Frames and single records go through the same row encoder.

use super::encoder::{FittedOneHot, HandleUnknown, OneHotEncoder};
use super::scaler::{FittedScaler, NumericEncoding};
use crate::dataset::values::{column_names, is_numeric_dtype, numeric_values, series, text_values};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encoding strategy for categorical columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CategoricalEncoding {
    OneHot { handle_unknown: HandleUnknown },
}

impl CategoricalEncoding {
    pub fn describe(&self) -> String {
        match self {
            Self::OneHot { handle_unknown } => {
                format!("one_hot (handle_unknown={})", handle_unknown.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Numeric,
    Categorical,
}

impl ColumnRole {
    /// Numeric non-boolean dtypes are numeric, everything else categorical.
    pub fn of(dtype: &DataType) -> Self {
        if is_numeric_dtype(dtype) {
            Self::Numeric
        } else {
            Self::Categorical
        }
    }
}

/// A raw cell value as it arrives in a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    fn as_number(&self, column: &str) -> Result<Option<f64>> {
        match self {
            Self::Null => Ok(None),
            Self::Number(n) => Ok(Some(*n)),
            Self::Text(s) => s.trim().parse().map(Some).map_err(|e| {
                PipelineError::DataProcessing(format!(
                    "value '{s}' for numeric column '{column}' is not a number: {e}"
                ))
            }),
            Self::Bool(b) => Err(PipelineError::DataProcessing(format!(
                "boolean {b} given for numeric column '{column}'"
            ))),
        }
    }

    /// Text form matching how a frame column renders the same value.
    fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// One column's values, read according to its fitted role.
enum ColumnInput {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

/// Unfitted transformer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTransformer {
    numeric: NumericEncoding,
    categorical: CategoricalEncoding,
}

impl ColumnTransformer {
    pub fn new(numeric: NumericEncoding, categorical: CategoricalEncoding) -> Self {
        Self {
            numeric,
            categorical,
        }
    }

    /// Fit on the train features. Roles come from the train dtypes.
    pub fn fit(&self, x_train: &DataFrame) -> Result<FittedTransformer> {
        let input_columns = column_names(x_train);
        let mut roles = Vec::with_capacity(input_columns.len());
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();

        for name in &input_columns {
            let column = series(x_train, name)?;
            let role = ColumnRole::of(column.dtype());
            match role {
                ColumnRole::Numeric => {
                    numeric.push(self.numeric.fit(name, &numeric_values(column)?));
                }
                ColumnRole::Categorical => {
                    let CategoricalEncoding::OneHot { handle_unknown } = self.categorical;
                    categorical.push(OneHotEncoder::new(handle_unknown).fit(name, &text_values(column)?));
                }
            }
            roles.push(role);
        }

        let feature_names = numeric
            .iter()
            .map(FittedScaler::feature_name)
            .chain(categorical.iter().flat_map(FittedOneHot::feature_names))
            .collect();

        Ok(FittedTransformer {
            input_columns,
            roles,
            numeric,
            categorical,
            feature_names,
        })
    }
}

/// Frozen transformer state learned from the train partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransformer {
    input_columns: Vec<String>,
    roles: Vec<ColumnRole>,
    numeric: Vec<FittedScaler>,
    categorical: Vec<FittedOneHot>,
    feature_names: Vec<String>,
}

impl FittedTransformer {
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features_in(&self) -> usize {
        self.input_columns.len()
    }

    pub fn n_features_out(&self) -> usize {
        self.feature_names.len()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.numeric.iter().map(|s| s.column.as_str()).collect()
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.categorical.iter().map(|e| e.column.as_str()).collect()
    }

    pub fn role_of(&self, column: &str) -> Option<ColumnRole> {
        self.input_columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.roles.get(i).copied())
    }

    /// Encode a frame that has exactly the fitted input columns.
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let present = column_names(df);
        if present != self.input_columns {
            return Err(PipelineError::RepresentationInconsistency(format!(
                "expected columns [{}], got [{}]",
                self.input_columns.join(", "),
                present.join(", ")
            )));
        }
        let inputs = self
            .input_columns
            .iter()
            .zip(&self.roles)
            .map(|(name, role)| {
                let column = series(df, name)?;
                Ok((
                    name.clone(),
                    match role {
                        ColumnRole::Numeric => ColumnInput::Numeric(numeric_values(column)?),
                        ColumnRole::Categorical => ColumnInput::Text(text_values(column)?),
                    },
                ))
            })
            .collect::<Result<BTreeMap<String, ColumnInput>>>()?;

        let rows = df.height();
        let data = self.encode_rows(&inputs, rows)?;
        Ok(Array2::from_shape_vec((rows, self.n_features_out()), data)?)
    }

    /// Encode one raw record keyed by input column name.
    ///
    /// Every input column must be present; extra keys are ignored.
    pub fn transform_record(&self, record: &BTreeMap<String, RawValue>) -> Result<Array1<f64>> {
        let inputs = self
            .input_columns
            .iter()
            .zip(&self.roles)
            .map(|(name, role)| {
                let value = record.get(name).ok_or_else(|| {
                    PipelineError::RepresentationInconsistency(format!(
                        "record lacks input column '{name}'"
                    ))
                })?;
                Ok((
                    name.clone(),
                    match role {
                        ColumnRole::Numeric => ColumnInput::Numeric(vec![value.as_number(name)?]),
                        ColumnRole::Categorical => ColumnInput::Text(vec![value.as_text()]),
                    },
                ))
            })
            .collect::<Result<BTreeMap<String, ColumnInput>>>()?;

        Ok(Array1::from_vec(self.encode_rows(&inputs, 1)?))
    }

    /// Row-major encoding shared by frames and records.
    fn encode_rows(&self, inputs: &BTreeMap<String, ColumnInput>, rows: usize) -> Result<Vec<f64>> {
        let width = self.n_features_out();
        let mut data = Vec::with_capacity(rows * width);
        for row in 0..rows {
            let mut encoded = Vec::with_capacity(width);
            for scaler in &self.numeric {
                let value = match inputs.get(&scaler.column) {
                    Some(ColumnInput::Numeric(values)) => values.get(row).copied().flatten(),
                    _ => None,
                };
                encoded.push(scaler.transform(value));
            }
            for encoder in &self.categorical {
                let value = match inputs.get(&encoder.column) {
                    Some(ColumnInput::Text(values)) => values.get(row).and_then(Option::as_deref),
                    _ => None,
                };
                encoder.encode_into(value, &mut encoded)?;
            }
            if encoded.len() != width {
                return Err(PipelineError::RepresentationInconsistency(format!(
                    "row {row} encoded to {} values, expected {width}",
                    encoded.len()
                )));
            }
            data.extend(encoded);
        }
        Ok(data)
    }
}
