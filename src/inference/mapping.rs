//! Declarative mapping from boundary fields to model features.
//!
//! ```yaml
//! model_features: [tenure, contract, active_member]
//! api_to_model:
//!   tenure: { type: direct, to_feature: tenure }
//!   contract: { type: direct, to_feature: contract }
//!   online_security:
//!     type: yes_no_to_binary
//!     to_feature: active_member
//!     mapping: { "Yes": 1, "No": 0 }
//!   tech_support:
//!     type: yes_no_to_binary
//!     to_feature: active_member
//!     mapping: { "Yes": 1, "No": 0 }
//!   payment_method: { type: default, value_from_defaults: channel }
//! defaults: { channel: web }
//! ```
//!
//! Binary mappings that hit the same feature keep the larger value. Model
//! features nothing maps to are filled with `0`.

use crate::error::{PipelineError, Result, ResultExt as _};
use crate::representation::RawValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum FieldMapping {
    /// Copy the value unchanged
    Direct { to_feature: String },
    /// Look the value up in a text-to-number table
    YesNoToBinary {
        to_feature: String,
        mapping: BTreeMap<String, f64>,
        /// Used for values absent from `mapping`; defaults to the code of "No"
        #[serde(default)]
        fallback: Option<f64>,
    },
    /// Look the value up in a rule table
    Rule {
        to_feature: String,
        rules: BTreeMap<String, RawValue>,
        #[serde(default)]
        fallback: Option<RawValue>,
    },
    /// Resolve from the defaults table; never fed to the model
    Default { value_from_defaults: String },
}

impl FieldMapping {
    pub fn to_feature(&self) -> Option<&str> {
        match self {
            Self::Direct { to_feature }
            | Self::YesNoToBinary { to_feature, .. }
            | Self::Rule { to_feature, .. } => Some(to_feature),
            Self::Default { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureMapDoc")]
pub struct FeatureMap {
    model_features: Vec<String>,
    api_to_model: BTreeMap<String, FieldMapping>,
    defaults: BTreeMap<String, RawValue>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FeatureMapDoc {
    model_features: Vec<String>,
    api_to_model: BTreeMap<String, FieldMapping>,
    #[serde(default)]
    defaults: BTreeMap<String, RawValue>,
}

impl TryFrom<FeatureMapDoc> for FeatureMap {
    type Error = PipelineError;

    fn try_from(doc: FeatureMapDoc) -> Result<Self> {
        Self::new(doc.model_features, doc.api_to_model, doc.defaults)
    }
}

/// Model-side record plus the defaults resolved along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub features: BTreeMap<String, RawValue>,
    /// Boundary field -> resolved default
    pub defaults: BTreeMap<String, RawValue>,
}

impl FeatureMap {
    pub fn new(
        model_features: Vec<String>,
        api_to_model: BTreeMap<String, FieldMapping>,
        defaults: BTreeMap<String, RawValue>,
    ) -> Result<Self> {
        if model_features.is_empty() {
            return Err(PipelineError::Config(
                "feature map must declare at least one model feature".to_owned(),
            ));
        }
        if api_to_model.is_empty() {
            return Err(PipelineError::Config(
                "feature map must declare at least one field mapping".to_owned(),
            ));
        }
        for (field, mapping) in &api_to_model {
            if let Some(feature) = mapping.to_feature()
                && !model_features.iter().any(|f| f == feature)
            {
                return Err(PipelineError::Config(format!(
                    "field '{field}' maps to '{feature}', which is not a model feature"
                )));
            }
            if let FieldMapping::Default { value_from_defaults } = mapping
                && !defaults.contains_key(value_from_defaults)
            {
                return Err(PipelineError::Config(format!(
                    "field '{field}' reads default '{value_from_defaults}', which is not defined"
                )));
            }
        }
        Ok(Self {
            model_features,
            api_to_model,
            defaults,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature map {}", path.display()))?;
        Self::from_yaml(&text)
    }

    pub fn model_features(&self) -> &[String] {
        &self.model_features
    }

    /// Turn a boundary record into the model's feature record.
    pub fn apply(&self, record: &BTreeMap<String, RawValue>) -> MappedRecord {
        let mut features: BTreeMap<String, RawValue> = BTreeMap::new();
        let mut defaults = BTreeMap::new();

        for (field, mapping) in &self.api_to_model {
            let raw = record.get(field).cloned().unwrap_or(RawValue::Null);
            match mapping {
                FieldMapping::Direct { to_feature } => {
                    features.insert(to_feature.clone(), raw);
                }
                FieldMapping::YesNoToBinary {
                    to_feature,
                    mapping,
                    fallback,
                } => {
                    let fallback = fallback.or_else(|| mapping.get("No").copied()).unwrap_or(0.0);
                    let code = lookup_key(&raw)
                        .and_then(|key| mapping.get(&key).copied())
                        .unwrap_or(fallback);
                    let merged = match features.get(to_feature) {
                        Some(RawValue::Number(previous)) => previous.max(code),
                        _ => code,
                    };
                    features.insert(to_feature.clone(), RawValue::Number(merged));
                }
                FieldMapping::Rule {
                    to_feature,
                    rules,
                    fallback,
                } => {
                    let value = lookup_key(&raw)
                        .and_then(|key| rules.get(&key).cloned())
                        .or_else(|| fallback.clone())
                        .unwrap_or(RawValue::Null);
                    features.insert(to_feature.clone(), value);
                }
                FieldMapping::Default { value_from_defaults } => {
                    let value = self
                        .defaults
                        .get(value_from_defaults)
                        .cloned()
                        .unwrap_or(RawValue::Null);
                    defaults.insert(field.clone(), value);
                }
            }
        }

        let features = self
            .model_features
            .iter()
            .map(|name| {
                let value = match features.remove(name) {
                    Some(RawValue::Null) | None => {
                        tracing::debug!(feature = %name, "no mapped value, using 0");
                        RawValue::Number(0.0)
                    }
                    Some(value) => value,
                };
                (name.clone(), value)
            })
            .collect();
        MappedRecord { features, defaults }
    }
}

fn lookup_key(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::Null => None,
        RawValue::Text(s) => Some(s.clone()),
        RawValue::Bool(b) => Some(b.to_string()),
        RawValue::Number(n) => Some(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAP: &str = r#"
model_features: [tenure, active_member, is_senior, products_number]
api_to_model:
  tenure: { type: direct, to_feature: tenure }
  online_security:
    type: yes_no_to_binary
    to_feature: active_member
    mapping: { "Yes": 1, "No": 0 }
  tech_support:
    type: yes_no_to_binary
    to_feature: active_member
    mapping: { "Yes": 1, "No": 0 }
  contract:
    type: rule
    to_feature: is_senior
    rules: { "Two year": 1 }
    fallback: 0
  payment_method: { type: default, value_from_defaults: channel }
defaults: { channel: web }
"#;

    fn record(security: &str, support: &str) -> BTreeMap<String, RawValue> {
        [
            ("tenure", RawValue::from(7_i64)),
            ("online_security", security.into()),
            ("tech_support", support.into()),
            ("contract", "Two year".into()),
            ("payment_method", "Mailed check".into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
    }

    #[test]
    fn test_binary_collision_keeps_max() -> anyhow::Result<()> {
        let map = FeatureMap::from_yaml(MAP)?;

        let mapped = map.apply(&record("No", "Yes"));
        assert_eq!(mapped.features.get("active_member"), Some(&RawValue::Number(1.0)));

        let mapped = map.apply(&record("No", "No internet service"));
        assert_eq!(mapped.features.get("active_member"), Some(&RawValue::Number(0.0)));
        Ok(())
    }

    #[test]
    fn test_rules_defaults_and_zero_fill() -> anyhow::Result<()> {
        let map = FeatureMap::from_yaml(MAP)?;
        let mapped = map.apply(&record("Yes", "Yes"));

        assert_eq!(mapped.features.get("tenure"), Some(&RawValue::Number(7.0)));
        assert_eq!(mapped.features.get("is_senior"), Some(&RawValue::Number(1.0)));
        assert_eq!(mapped.features.get("products_number"), Some(&RawValue::Number(0.0)));
        assert_eq!(mapped.features.len(), 4);
        assert_eq!(
            mapped.defaults.get("payment_method"),
            Some(&RawValue::Text("web".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn test_mapping_to_unknown_feature_is_rejected() {
        let bad = MAP.replace("to_feature: is_senior", "to_feature: age");
        let err = FeatureMap::from_yaml(&bad).unwrap_err();
        assert!(err.to_string().contains("age"));
    }
}
