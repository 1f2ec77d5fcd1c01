//! Schema contract and the scope derived from it.
//!
//! The contract is the single external description of which columns a
//! downstream inference boundary accepts. It is loaded once per run from a
//! YAML or JSON document and never changes afterwards.
//!
//! ```yaml
//! name: churn
//! version: 1
//! schema:
//!   target: Exited
//!   expected_target_domain: ["0", "1"]
//!   features: [tenure, contract, monthly_charges]
//!   optional_features: []
//! id_columns: [customer_id]
//! drop_columns: []
//! ```

use crate::error::{PipelineError, Result, ResultExt as _};
use crate::lifecycle::audit::ExclusionReason;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// On-disk shape of a contract document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContractDocument {
    name: String,
    #[serde(default = "default_version")]
    version: u32,
    schema: SchemaSection,
    #[serde(default)]
    id_columns: Vec<String>,
    #[serde(default)]
    drop_columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaSection {
    features: Vec<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    expected_target_domain: Option<Vec<String>>,
    #[serde(default)]
    optional_features: Vec<String>,
}

fn default_version() -> u32 {
    1
}

/// Validated, immutable schema contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    pub name: String,
    pub version: u32,
    /// Ordered, unique feature names
    pub feature_names: Vec<String>,
    pub target_name: Option<String>,
    pub expected_target_domain: Option<Vec<String>>,
    /// Features allowed to be absent from the dataset
    pub optional_features: Vec<String>,
    pub id_columns: Vec<String>,
    pub drop_columns: Vec<String>,
}

impl SchemaContract {
    /// Builds a contract, trimming names and removing duplicate features.
    pub fn new(
        name: impl Into<String>,
        features: Vec<String>,
        target: Option<String>,
    ) -> Result<Self> {
        Self::build(ContractDocument {
            name: name.into(),
            version: 1,
            schema: SchemaSection {
                features,
                target,
                expected_target_domain: None,
                optional_features: Vec::new(),
            },
            id_columns: Vec::new(),
            drop_columns: Vec::new(),
        })
    }

    pub fn with_expected_domain(mut self, domain: Vec<String>) -> Self {
        self.expected_target_domain = Some(domain);
        self
    }

    pub fn with_optional_features(mut self, optional: Vec<String>) -> Result<Self> {
        for name in &optional {
            if !self.feature_names.contains(name) {
                return Err(PipelineError::Config(format!(
                    "optional feature '{name}' is not a declared feature"
                )));
            }
        }
        self.optional_features = optional;
        Ok(self)
    }

    fn build(doc: ContractDocument) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut feature_names = Vec::new();
        for raw in doc.schema.features {
            let name = raw.trim().to_owned();
            if name.is_empty() {
                return Err(PipelineError::Config(
                    "contract feature names must not be blank".to_owned(),
                ));
            }
            if seen.insert(name.clone()) {
                feature_names.push(name);
            }
        }
        if feature_names.is_empty() {
            return Err(PipelineError::Config(
                "contract must declare at least one feature".to_owned(),
            ));
        }

        let target_name = doc
            .schema
            .target
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        if let Some(target) = &target_name
            && feature_names.contains(target)
        {
            return Err(PipelineError::ScopeIntegrity(format!(
                "contract lists target '{target}' among its features"
            )));
        }

        let optional_features: Vec<String> = doc
            .schema
            .optional_features
            .iter()
            .map(|s| s.trim().to_owned())
            .collect();
        if let Some(unknown) = optional_features
            .iter()
            .find(|name| !feature_names.contains(name))
        {
            return Err(PipelineError::Config(format!(
                "optional feature '{unknown}' is not a declared feature"
            )));
        }

        let trimmed = |names: Vec<String>| -> Vec<String> {
            names.into_iter().map(|s| s.trim().to_owned()).collect()
        };
        let id_columns = trimmed(doc.id_columns);
        let drop_columns = trimmed(doc.drop_columns);
        if let Some(clash) = id_columns.iter().chain(&drop_columns).find(|name| {
            feature_names.contains(name) || target_name.as_ref() == Some(*name)
        }) {
            return Err(PipelineError::ContractViolation(format!(
                "column '{clash}' is both kept by the contract and listed as an id or drop column"
            )));
        }

        Ok(Self {
            name: doc.name,
            version: doc.version,
            feature_names,
            target_name,
            expected_target_domain: doc.schema.expected_target_domain,
            optional_features,
            id_columns,
            drop_columns,
        })
    }

    /// Parse a contract from YAML text (JSON is valid YAML too).
    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc: ContractDocument = serde_yaml::from_str(text)?;
        Self::build(doc)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let doc: ContractDocument = serde_json::from_str(text)?;
        Self::build(doc)
    }

    /// Load a contract from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        }
    }

    /// Columns kept by enforcement: features, then the target.
    pub fn kept_columns(&self) -> Vec<String> {
        let mut kept = self.feature_names.clone();
        if let Some(target) = &self.target_name {
            kept.push(target.clone());
        }
        kept
    }

    /// Why enforcement drops `column`, for a column outside the kept set.
    pub fn drop_reason(&self, column: &str) -> ExclusionReason {
        if self.drop_columns.iter().any(|c| c == column) {
            ExclusionReason::DroppedByContract
        } else if self.id_columns.iter().any(|c| c == column) {
            ExclusionReason::Identifier
        } else {
            ExclusionReason::NotAFeature
        }
    }

    pub fn is_optional(&self, feature: &str) -> bool {
        self.optional_features.iter().any(|f| f == feature)
    }
}

/// Concrete `{features, target}` partition of an actual dataset.
///
/// Created once by contract enforcement and read-only afterwards. The target
/// never appears among the features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    features: Vec<String>,
    target: Option<String>,
}

impl Scope {
    pub fn new(features: Vec<String>, target: Option<String>) -> Result<Self> {
        if let Some(t) = &target
            && features.contains(t)
        {
            return Err(PipelineError::ScopeIntegrity(format!(
                "target '{t}' cannot be part of the feature scope"
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = features.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(PipelineError::ScopeIntegrity(format!(
                "feature '{dup}' appears twice in the scope"
            )));
        }
        Ok(Self { features, target })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_feature(&self, column: &str) -> bool {
        self.features.iter().any(|f| f == column)
    }

    pub fn is_target(&self, column: &str) -> bool {
        self.target.as_deref() == Some(column)
    }

    /// Rejects any column list containing the target or a non-feature column.
    pub fn ensure_within_features(&self, columns: &[String]) -> Result<()> {
        for column in columns {
            if self.is_target(column) {
                return Err(PipelineError::ScopeIntegrity(format!(
                    "target '{column}' cannot be handed to a feature transformation"
                )));
            }
            if !self.is_feature(column) {
                return Err(PipelineError::ScopeIntegrity(format!(
                    "column '{column}' is outside the feature scope"
                )));
            }
        }
        Ok(())
    }

    /// Re-checks target isolation; used by later stages as a guard.
    pub fn verify_target_isolation(&self) -> Result<()> {
        match &self.target {
            Some(t) if self.features.contains(t) => Err(PipelineError::ScopeIntegrity(format!(
                "target '{t}' detected inside the feature set"
            ))),
            _ => Ok(()),
        }
    }
}
