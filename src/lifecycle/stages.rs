//! Stage identities and the executor trait implemented by each stage.

pub mod candidates;
pub mod contract;
pub mod impute;
pub mod ingest;
pub mod represent;
pub mod split;
pub mod standardize;
pub mod target_audit;
pub mod typing;

use super::payload::Payload;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Load the raw source and diagnose it (read-only)
    Ingestion,
    /// Declared type conversions, duplicate and conversion-null report
    Typing,
    /// Keep/drop per contract, derive scope, diagnose categorical candidates
    ContractEnforcement,
    /// Declared normalization and substitution rules on feature columns
    Standardization,
    /// Target verification (read-only)
    TargetAudit,
    /// Declared missing-value strategies on feature columns
    Imputation,
    /// Feature/target separation and train/test partitioning
    Split,
    /// Train-only fit, transform of both partitions, target encoding
    Representation,
}

impl Stage {
    pub const ALL: [Self; 8] = [
        Self::Ingestion,
        Self::Typing,
        Self::ContractEnforcement,
        Self::Standardization,
        Self::TargetAudit,
        Self::Imputation,
        Self::Split,
        Self::Representation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Typing => "typing",
            Self::ContractEnforcement => "contract_enforcement",
            Self::Standardization => "standardization",
            Self::TargetAudit => "target_audit",
            Self::Imputation => "imputation",
            Self::Split => "split",
            Self::Representation => "representation",
        }
    }

    pub fn parse_stage(s: &str) -> Option<Self> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|stage| stage.as_str() == wanted)
    }

    /// The stage that must run right after this one.
    pub fn next_stage(&self) -> Option<Self> {
        match self {
            Self::Ingestion => Some(Self::Typing),
            Self::Typing => Some(Self::ContractEnforcement),
            Self::ContractEnforcement => Some(Self::Standardization),
            Self::Standardization => Some(Self::TargetAudit),
            Self::TargetAudit => Some(Self::Imputation),
            Self::Imputation => Some(Self::Split),
            Self::Split => Some(Self::Representation),
            Self::Representation => None,
        }
    }

    /// Stages run strictly in sequence; skipping or going back is not allowed.
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.next_stage() == Some(target)
    }

    /// Diagnostic stages never mutate the dataset.
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Ingestion | Self::TargetAudit)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for executing one stage over a payload.
///
/// Executors never mutate the payload they receive; they return a new one
/// carrying the updated dataset, snapshot and audit trail.
pub trait StageExecutor {
    /// Get the stage this executor handles
    fn stage(&self) -> Stage;

    /// Get a description of what this stage does
    fn description(&self) -> String;

    /// Execute this stage and return the next payload
    fn execute(&self, payload: &Payload) -> Result<Payload>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Ingestion.can_transition_to(Stage::Typing));
        assert!(Stage::Split.can_transition_to(Stage::Representation));

        assert!(!Stage::Ingestion.can_transition_to(Stage::ContractEnforcement));
        assert!(!Stage::Imputation.can_transition_to(Stage::TargetAudit));
        assert!(!Stage::Representation.can_transition_to(Stage::Ingestion));
    }

    #[test]
    fn test_next_stage_walks_all() {
        let mut walked = vec![Stage::Ingestion];
        while let Some(next) = walked.last().and_then(Stage::next_stage) {
            walked.push(next);
        }
        assert_eq!(walked, Stage::ALL.to_vec());
    }

    #[test]
    fn test_stage_string_conversion() {
        assert_eq!(Stage::TargetAudit.as_str(), "target_audit");
        assert_eq!(Stage::parse_stage("Target-Audit"), Some(Stage::TargetAudit));
        assert_eq!(Stage::parse_stage("contract enforcement"), Some(Stage::ContractEnforcement));
        assert_eq!(Stage::parse_stage("invalid"), None);
    }

    #[test]
    fn test_diagnostic_stages() {
        assert!(Stage::Ingestion.is_diagnostic());
        assert!(Stage::TargetAudit.is_diagnostic());
        assert!(!Stage::Imputation.is_diagnostic());
    }
}
