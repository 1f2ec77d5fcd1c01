//! Target encoding with an explicit, coverage-checked mapping.

use crate::dataset::values::{NULL_LABEL, text_values};
use crate::error::{PipelineError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDtype {
    Int64,
    Int32,
    Float64,
}

impl TargetDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Float64 => "float64",
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, Self::Float64)
    }
}

/// How raw target values become model labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TargetEncoding {
    /// Exact raw value to code lookup
    Map {
        mapping: BTreeMap<String, i64>,
        output_type: TargetDtype,
    },
    /// Target is already numeric; only the dtype changes
    Passthrough { output_type: TargetDtype },
}

impl TargetEncoding {
    pub fn map(mapping: BTreeMap<String, i64>, output_type: TargetDtype) -> Result<Self> {
        let encoding = Self::Map {
            mapping,
            output_type,
        };
        encoding.validate()?;
        Ok(encoding)
    }

    pub fn output_type(&self) -> TargetDtype {
        match self {
            Self::Map { output_type, .. } | Self::Passthrough { output_type } => *output_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let Self::Map {
            mapping,
            output_type,
        } = self
        else {
            return Ok(());
        };
        if mapping.is_empty() {
            return Err(PipelineError::Decision(
                "target mapping must not be empty".to_owned(),
            ));
        }
        if mapping.keys().any(|k| k.trim().is_empty()) {
            return Err(PipelineError::Decision(
                "target mapping keys must not be blank".to_owned(),
            ));
        }
        if *output_type == TargetDtype::Int32
            && let Some((key, code)) = mapping.iter().find(|(_, c)| i32::try_from(**c).is_err())
        {
            return Err(PipelineError::Decision(format!(
                "target code {code} for '{key}' does not fit int32"
            )));
        }
        Ok(())
    }

    /// Code for one raw value, or `None` when the value is not covered.
    fn code_for(&self, raw: Option<&str>) -> Option<f64> {
        let raw = raw?;
        match self {
            Self::Map { mapping, .. } => mapping.get(raw).map(|c| *c as f64),
            Self::Passthrough { output_type } => {
                let v: f64 = raw.trim().parse().ok()?;
                let integral = v.is_finite() && v.fract() == 0.0;
                (v.is_finite() && (integral || !output_type.is_integer())).then_some(v)
            }
        }
    }

    /// Distinct observed values this encoding cannot translate, sorted.
    ///
    /// Nulls are reported as `<null>`.
    pub fn uncovered<'a>(&self, observed: impl IntoIterator<Item = &'a Option<String>>) -> Vec<String> {
        let missing: BTreeSet<String> = observed
            .into_iter()
            .filter(|v| self.code_for(v.as_deref()).is_none())
            .map(|v| v.clone().unwrap_or_else(|| NULL_LABEL.to_owned()))
            .collect();
        missing.into_iter().collect()
    }

    /// Encode `y` into the declared dtype, failing on any uncovered value.
    pub fn encode(&self, y: &Series) -> Result<Series> {
        let raw = text_values(y)?;
        let missing = self.uncovered(&raw);
        if !missing.is_empty() {
            return Err(PipelineError::MappingCoverage { missing });
        }
        let codes: Vec<f64> = raw
            .iter()
            .filter_map(|v| self.code_for(v.as_deref()))
            .collect();
        let name = y.name().clone();
        Ok(match self.output_type() {
            TargetDtype::Float64 => Series::new(name, codes),
            TargetDtype::Int64 => Series::new(name, codes.iter().map(|c| *c as i64).collect::<Vec<i64>>()),
            TargetDtype::Int32 => {
                let narrowed = codes
                    .iter()
                    .map(|c| {
                        i32::try_from(*c as i64).map_err(|e| {
                            PipelineError::Decision(format!("target code {c} does not fit int32: {e}"))
                        })
                    })
                    .collect::<Result<Vec<i32>>>()?;
                Series::new(name, narrowed)
            }
        })
    }
}
