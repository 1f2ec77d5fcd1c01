//! Run plan validation.
//!
//! Checks a plan against the contract (and optionally the raw input schema)
//! before any data is touched, so typos in column names surface with
//! actionable messages. Invariants that belong to a stage, such as the target
//! appearing in a transformation's column list, are left to that stage so the
//! failure names the stage and the invariant.

use super::spec::{PLAN_VERSION, RunPlan};
use crate::contract::SchemaContract;
use crate::lifecycle::stages::impute::ColumnSelection;
use crate::representation::TargetEncoding;
use polars::prelude::*;

/// Validation error with helpful context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Plan section the problem was found in, `None` for the plan itself
    pub section: Option<&'static str>,
    pub message: String,
}

impl ValidationError {
    fn new(section: Option<&'static str>, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
        }
    }

    fn section(section: &'static str, message: impl Into<String>) -> Self {
        Self::new(Some(section), message)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(section) = self.section {
            write!(f, "{section}: {}", self.message)
        } else {
            write!(f, "plan: {}", self.message)
        }
    }
}

/// Validate a run plan against a contract and, when known, the raw input schema
pub fn validate_plan(
    plan: &RunPlan,
    contract: &SchemaContract,
    input_schema: Option<&Schema>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if plan.version != PLAN_VERSION {
        errors.push(ValidationError::new(
            None,
            format!(
                "Unsupported plan version '{}', expected '{PLAN_VERSION}'",
                plan.version
            ),
        ));
    }

    if let Some(schema) = input_schema {
        for conversion in plan.typing.conversions() {
            if schema.get(conversion.column.as_str()).is_none() {
                errors.push(ValidationError::section(
                    "typing",
                    format!("Cannot convert non-existent column '{}'", conversion.column),
                ));
            }
        }
    }

    check_known(contract, "standardization", plan.standardization.columns(), &mut errors);
    if let ColumnSelection::Only(list) = plan.imputation.columns() {
        check_known(contract, "imputation", list, &mut errors);
    }
    check_known(contract, "imputation", plan.imputation.exclude(), &mut errors);
    check_known(contract, "imputation", plan.imputation.overrides().keys(), &mut errors);
    if let Some(column) = plan.split.stratify_column() {
        check_known(contract, "split", [&column.to_owned()], &mut errors);
    }

    validate_target(plan, contract, &mut errors);
    errors
}

/// Decision columns must be contract features or the contract target.
fn check_known<'a>(
    contract: &SchemaContract,
    section: &'static str,
    columns: impl IntoIterator<Item = &'a String>,
    errors: &mut Vec<ValidationError>,
) {
    for column in columns {
        let known = contract.feature_names.contains(column)
            || contract.target_name.as_ref() == Some(column);
        if !known {
            errors.push(ValidationError::section(
                section,
                format!("Column '{column}' is not declared by contract '{}'", contract.name),
            ));
        }
    }
}

fn validate_target(plan: &RunPlan, contract: &SchemaContract, errors: &mut Vec<ValidationError>) {
    if contract.target_name.is_none() {
        errors.push(ValidationError::section(
            "representation",
            format!("Contract '{}' declares no target to encode", contract.name),
        ));
        return;
    }
    if let (TargetEncoding::Map { mapping, .. }, Some(domain)) = (
        plan.representation.target(),
        contract.expected_target_domain.as_ref(),
    ) {
        let unmapped: Vec<&str> = domain
            .iter()
            .filter(|v| !mapping.contains_key(*v))
            .map(String::as_str)
            .collect();
        if !unmapped.is_empty() {
            errors.push(ValidationError::section(
                "representation",
                format!(
                    "Target mapping misses expected domain values: {}",
                    unmapped.join(", ")
                ),
            ));
        }
    }
}
