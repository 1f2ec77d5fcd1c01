//! Run plan: every stage decision for one run, in one document.
//!
//! ```yaml
//! version: "1"
//! name: churn-baseline
//! target_gate: block_on_error
//! typing:
//!   conversions:
//!     - { column: total_charges, to: numeric, on_error: coerce }
//! standardization:
//!   columns: [online_security, tech_support]
//!   substitutions: { "no internet service": "no" }
//!   normalization: match_only
//! imputation:
//!   numeric: { strategy: median }
//!   categorical: { strategy: mode }
//!   columns: all_features
//! split: { test_fraction: 0.2, random_seed: 42, shuffle: true, stratify: true, stratify_column: Churn }
//! representation:
//!   numeric: { strategy: standard_scaler }
//!   categorical: { strategy: one_hot, handle_unknown: ignore }
//!   target: { strategy: map, mapping: { "No": 0, "Yes": 1 }, output_type: int64 }
//! ```

use crate::error::{Result, ResultExt as _};
use crate::lifecycle::stages::candidates::CandidateThresholds;
use crate::lifecycle::stages::impute::ImputationDecision;
use crate::lifecycle::stages::represent::RepresentationDecision;
use crate::lifecycle::stages::split::SplitDecision;
use crate::lifecycle::stages::standardize::StandardizationDecision;
use crate::lifecycle::stages::target_audit::TargetStatus;
use crate::lifecycle::stages::typing::TypingDecision;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current run plan version
pub const PLAN_VERSION: &str = "1";

/// What the orchestrator does with the target audit's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetGatePolicy {
    /// Record the status, never block
    Ignore,
    BlockOnError,
    BlockOnWarning,
}

impl TargetGatePolicy {
    pub fn blocks(&self, status: TargetStatus) -> bool {
        match self {
            Self::Ignore => false,
            Self::BlockOnError => status == TargetStatus::Error,
            Self::BlockOnWarning => status >= TargetStatus::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::BlockOnError => "block_on_error",
            Self::BlockOnWarning => "block_on_warning",
        }
    }
}

/// Root run plan structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunPlan {
    /// Plan version for future migrations
    pub version: String,

    /// Human-readable plan name
    pub name: String,

    pub target_gate: TargetGatePolicy,

    /// Heuristic thresholds for candidate discovery (diagnostic only)
    #[serde(default)]
    pub candidates: CandidateThresholds,

    pub typing: TypingDecision,
    pub standardization: StandardizationDecision,
    pub imputation: ImputationDecision,
    pub split: SplitDecision,
    pub representation: RepresentationDecision,
}

impl RunPlan {
    /// Load a plan from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run plan {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize the plan to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the plan as JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write run plan {}", path.as_ref().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PLAN: &str = r#"
version: "1"
name: churn-baseline
target_gate: block_on_error
typing:
  conversions:
    - { column: total_charges, to: numeric, on_error: coerce }
standardization:
  columns: [online_security]
  substitutions: { "no internet service": "no" }
  normalization: match_only
imputation:
  numeric: { strategy: median }
  categorical: { strategy: mode }
  columns: all_features
split: { test_fraction: 0.2, random_seed: 42, shuffle: true, stratify: true, stratify_column: Churn }
representation:
  numeric: { strategy: standard_scaler }
  categorical: { strategy: one_hot, handle_unknown: ignore }
  target: { strategy: map, mapping: { "No": 0, "Yes": 1 }, output_type: int64 }
"#;

    #[test]
    fn test_plan_yaml_and_json_agree() -> anyhow::Result<()> {
        let plan = RunPlan::from_yaml(PLAN)?;
        assert_eq!(plan.target_gate, TargetGatePolicy::BlockOnError);
        assert_eq!(plan.split.stratify_column(), Some("Churn"));
        assert_eq!(plan.candidates, CandidateThresholds::default());

        let again = RunPlan::from_json(&plan.to_json()?)?;
        assert_eq!(again, plan);
        Ok(())
    }

    #[test]
    fn test_missing_decision_is_rejected() {
        let without_split: String = PLAN
            .lines()
            .filter(|l| !l.starts_with("split:"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = RunPlan::from_yaml(&without_split).unwrap_err();
        assert!(err.to_string().contains("split"));
    }

    #[test]
    fn test_gate_policies() {
        assert!(!TargetGatePolicy::Ignore.blocks(TargetStatus::Error));
        assert!(TargetGatePolicy::BlockOnError.blocks(TargetStatus::Error));
        assert!(!TargetGatePolicy::BlockOnError.blocks(TargetStatus::Warning));
        assert!(TargetGatePolicy::BlockOnWarning.blocks(TargetStatus::Warning));
        assert!(!TargetGatePolicy::BlockOnWarning.blocks(TargetStatus::Ok));
    }
}
