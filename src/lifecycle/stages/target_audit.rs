//! Target audit stage - diagnostic only, never changes data
//!
//! The status it computes is consumed by the orchestrator's target gate.

use super::{Stage, StageExecutor};
use crate::dataset::values::{distinct_in_order, is_text_dtype, label_series, series, value_counts};
use crate::error::Result;
use crate::lifecycle::audit::StageReport;
use crate::lifecycle::payload::Payload;
use crate::utils::{percent, round_to};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DOMAIN_PREVIEW: usize = 12;
const TOP_VALUES: usize = 10;
const CASING_EXAMPLES: usize = 3;
const UNEXPECTED_LISTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Ok,
    Warning,
    Error,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spellings of one value that differ only by case or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasingVariant {
    pub normalized: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TargetAnomaly {
    Undeclared,
    Absent { column: String },
    Missing { count: usize, pct: f64 },
    NoValues,
    SingleClass { value: String },
    NonBinary { distinct: usize },
    BlankStrings { count: usize },
    CasingVariants { examples: Vec<CasingVariant> },
    UnexpectedValues { values: Vec<String>, total: usize },
}

impl TargetAnomaly {
    /// Anomalies that make the audit itself impossible.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Undeclared | Self::Absent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueShare {
    pub value: String,
    pub count: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAuditReport {
    pub target: Option<String>,
    pub exists: bool,
    pub row_count: usize,
    pub missing_count: usize,
    pub missing_pct: f64,
    pub distinct_count: usize,
    pub domain_preview: Vec<String>,
    pub value_counts: Vec<ValueShare>,
    pub expected_domain: Option<Vec<String>>,
    pub anomalies: Vec<TargetAnomaly>,
    /// Distinct observed values outside the expected domain
    pub invalid_count: usize,
    pub status: TargetStatus,
    pub notes: String,
}

impl TargetAuditReport {
    fn unavailable(target: Option<&str>, rows: usize, anomaly: TargetAnomaly) -> Self {
        Self {
            target: target.map(str::to_owned),
            exists: false,
            row_count: rows,
            missing_count: 0,
            missing_pct: 0.0,
            distinct_count: 0,
            domain_preview: Vec::new(),
            value_counts: Vec::new(),
            expected_domain: None,
            anomalies: vec![anomaly],
            invalid_count: 0,
            status: TargetStatus::Error,
            notes: "audit not executed: target unavailable".to_owned(),
        }
    }
}

fn casing_variants(values: &[String]) -> Vec<CasingVariant> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for value in values {
        let spellings = groups.entry(value.trim().to_lowercase()).or_default();
        if !spellings.contains(value) {
            spellings.push(value.clone());
        }
    }
    groups
        .into_iter()
        .filter(|(_, spellings)| spellings.len() > 1)
        .take(CASING_EXAMPLES)
        .map(|(normalized, mut variants)| {
            variants.sort();
            variants.truncate(4);
            CasingVariant { normalized, variants }
        })
        .collect()
}

/// Audit `target` in `df` against an optional expected domain.
pub fn audit_target(
    df: &DataFrame,
    target: Option<&str>,
    expected_domain: Option<&[String]>,
) -> Result<TargetAuditReport> {
    let rows = df.height();
    let Some(name) = target else {
        return Ok(TargetAuditReport::unavailable(None, rows, TargetAnomaly::Undeclared));
    };
    let Ok(column) = series(df, name) else {
        let anomaly = TargetAnomaly::Absent {
            column: name.to_owned(),
        };
        return Ok(TargetAuditReport::unavailable(Some(name), rows, anomaly));
    };

    let missing_count = column.null_count();
    let missing_pct = round_to(percent(missing_count, rows), 2);
    let distinct = distinct_in_order(column)?;

    let shares = value_counts(&label_series(column)?)?
        .into_iter()
        .take(TOP_VALUES)
        .map(|(value, count)| ValueShare {
            value,
            count,
            pct: round_to(percent(count, rows), 2),
        })
        .collect();

    let mut anomalies = Vec::new();
    if missing_count > 0 {
        anomalies.push(TargetAnomaly::Missing {
            count: missing_count,
            pct: missing_pct,
        });
    }
    match distinct.as_slice() {
        [] => anomalies.push(TargetAnomaly::NoValues),
        [only] => anomalies.push(TargetAnomaly::SingleClass { value: only.clone() }),
        [_, _] => {}
        many => anomalies.push(TargetAnomaly::NonBinary { distinct: many.len() }),
    }
    if is_text_dtype(column.dtype()) {
        let blanks = column
            .str()?
            .into_iter()
            .flatten()
            .filter(|v| v.trim().is_empty())
            .count();
        if blanks > 0 {
            anomalies.push(TargetAnomaly::BlankStrings { count: blanks });
        }
        let examples = casing_variants(&distinct);
        if !examples.is_empty() {
            anomalies.push(TargetAnomaly::CasingVariants { examples });
        }
    }

    let mut invalid_count = 0;
    if let Some(domain) = expected_domain {
        let unexpected: Vec<String> = distinct
            .iter()
            .filter(|v| !domain.contains(v))
            .cloned()
            .collect();
        invalid_count = unexpected.len();
        if !unexpected.is_empty() {
            anomalies.push(TargetAnomaly::UnexpectedValues {
                values: unexpected.into_iter().take(UNEXPECTED_LISTED).collect(),
                total: invalid_count,
            });
        }
    }

    let status = if anomalies.iter().any(TargetAnomaly::is_fatal) {
        TargetStatus::Error
    } else if anomalies.is_empty() {
        TargetStatus::Ok
    } else {
        TargetStatus::Warning
    };
    let notes = match status {
        TargetStatus::Ok => "target consistent for modelling",
        _ => "review the audit findings",
    };

    Ok(TargetAuditReport {
        target: Some(name.to_owned()),
        exists: true,
        row_count: rows,
        missing_count,
        missing_pct,
        distinct_count: distinct.len(),
        domain_preview: distinct.into_iter().take(DOMAIN_PREVIEW).collect(),
        value_counts: shares,
        expected_domain: expected_domain.map(<[String]>::to_vec),
        anomalies,
        invalid_count,
        status,
        notes: notes.to_owned(),
    })
}

/// Runs [`audit_target`] on the scope's target.
///
/// The expected domain comes from the contract unless overridden.
#[derive(Default)]
pub struct TargetAuditStage {
    expected_domain: Option<Vec<String>>,
}

impl TargetAuditStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expected_domain(mut self, domain: Vec<String>) -> Self {
        self.expected_domain = Some(domain);
        self
    }
}

impl StageExecutor for TargetAuditStage {
    fn stage(&self) -> Stage {
        Stage::TargetAudit
    }

    fn description(&self) -> String {
        "Audit the target column (read-only)".to_owned()
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::TargetAudit)?;
        let scope = payload.require_scope()?;
        let expected = self.expected_domain.as_deref().or_else(|| {
            payload
                .contract()
                .and_then(|c| c.expected_target_domain.as_deref())
        });

        let report = audit_target(payload.dataset(), scope.target(), expected)?;
        let status = report.status;
        match status {
            TargetStatus::Ok => tracing::info!(target = ?report.target, "target audit ok"),
            _ => tracing::warn!(
                target = ?report.target,
                %status,
                anomalies = report.anomalies.len(),
                "target audit found anomalies"
            ),
        }

        Ok(payload
            .advance(
                Stage::TargetAudit,
                payload.dataset().clone(),
                StageReport::TargetAudit(report),
            )
            .with_target_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clean_binary_target_is_ok() -> anyhow::Result<()> {
        let df = df! { "Churn" => &["Yes", "No", "No", "Yes"] }?;
        let domain = vec!["Yes".to_owned(), "No".to_owned()];
        let report = audit_target(&df, Some("Churn"), Some(&domain))?;
        assert_eq!(report.status, TargetStatus::Ok);
        assert_eq!(report.distinct_count, 2);
        assert_eq!(report.domain_preview, vec!["Yes", "No"]);
        assert_eq!(
            report.value_counts.first(),
            Some(&ValueShare {
                value: "No".to_owned(),
                count: 2,
                pct: 50.0,
            })
        );
        Ok(())
    }

    #[test]
    fn test_anomalies_downgrade_to_warning() -> anyhow::Result<()> {
        let df = df! {
            "Churn" => &[Some("Yes"), Some("yes "), Some("No"), None, Some(" "), Some("Maybe")],
        }?;
        let domain = vec!["Yes".to_owned(), "No".to_owned()];
        let report = audit_target(&df, Some("Churn"), Some(&domain))?;

        assert_eq!(report.status, TargetStatus::Warning);
        assert_eq!(report.missing_count, 1);
        assert_eq!(report.missing_pct, 16.67);
        assert_eq!(report.invalid_count, 3);
        let kinds: Vec<&TargetAnomaly> = report.anomalies.iter().collect();
        assert!(matches!(kinds.first(), Some(TargetAnomaly::Missing { count: 1, .. })));
        assert!(kinds.contains(&&TargetAnomaly::NonBinary { distinct: 5 }));
        assert!(kinds.contains(&&TargetAnomaly::BlankStrings { count: 1 }));
        assert!(kinds.iter().any(|a| matches!(a, TargetAnomaly::CasingVariants { examples } if examples.len() == 1)));
        Ok(())
    }

    #[test]
    fn test_absent_or_undeclared_target_is_error() -> anyhow::Result<()> {
        let df = df! { "a" => &[1i64, 2] }?;
        assert_eq!(audit_target(&df, None, None)?.status, TargetStatus::Error);
        let absent = audit_target(&df, Some("Churn"), None)?;
        assert_eq!(absent.status, TargetStatus::Error);
        assert!(!absent.exists);
        Ok(())
    }

    #[test]
    fn test_single_class_numeric_target() -> anyhow::Result<()> {
        let df = df! { "y" => &[1i64, 1, 1] }?;
        let report = audit_target(&df, Some("y"), None)?;
        assert_eq!(
            report.anomalies,
            vec![TargetAnomaly::SingleClass { value: "1".to_owned() }]
        );
        assert_eq!(report.status, TargetStatus::Warning);
        Ok(())
    }
}
