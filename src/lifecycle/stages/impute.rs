//! Imputation stage - declared fill strategies on feature columns
//!
//! The target is never imputed. A fill value is resolved only for columns
//! that actually have missing cells.

use super::{Stage, StageExecutor};
use crate::dataset::Snapshot;
use crate::dataset::values::{is_numeric_dtype, series, value_counts};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, ColumnChange, ExcludedColumn, ExclusionReason, StageReport};
use crate::lifecycle::payload::Payload;
use crate::utils::{percent, round_to};
use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum NumericStrategy {
    Mean,
    Median,
    Constant { fill_value: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CategoricalStrategy {
    #[serde(alias = "most_frequent")]
    Mode,
    Constant { fill_value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for FillValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => write!(f, "{t}"),
        }
    }
}

/// Per-column strategy replacing the kind default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum OverrideStrategy {
    Mean,
    Median,
    #[serde(alias = "most_frequent")]
    Mode,
    Constant { fill_value: FillValue },
}

/// Which columns the decision declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelection {
    /// Every feature of the scope
    AllFeatures,
    Only(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ImputationDecisionDoc")]
pub struct ImputationDecision {
    numeric: NumericStrategy,
    categorical: CategoricalStrategy,
    columns: ColumnSelection,
    exclude: Vec<String>,
    overrides: BTreeMap<String, OverrideStrategy>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ImputationDecisionDoc {
    numeric: NumericStrategy,
    categorical: CategoricalStrategy,
    columns: ColumnSelection,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    overrides: BTreeMap<String, OverrideStrategy>,
}

impl TryFrom<ImputationDecisionDoc> for ImputationDecision {
    type Error = PipelineError;

    fn try_from(doc: ImputationDecisionDoc) -> Result<Self> {
        Self::new(doc.numeric, doc.categorical, doc.columns)?
            .with_exclude(doc.exclude)?
            .with_overrides(doc.overrides)
    }
}

fn check_constant(value: f64, owner: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PipelineError::Decision(format!(
            "{owner}: constant fill value must be finite"
        )))
    }
}

impl ImputationDecision {
    pub fn new(
        numeric: NumericStrategy,
        categorical: CategoricalStrategy,
        columns: ColumnSelection,
    ) -> Result<Self> {
        if let NumericStrategy::Constant { fill_value } = numeric {
            check_constant(fill_value, "numeric strategy")?;
        }
        if let ColumnSelection::Only(list) = &columns {
            let mut seen = HashSet::new();
            for column in list {
                if column.trim().is_empty() || !seen.insert(column.as_str()) {
                    return Err(PipelineError::Decision(format!(
                        "imputation column list has a blank or repeated entry '{column}'"
                    )));
                }
            }
        }
        Ok(Self {
            numeric,
            categorical,
            columns,
            exclude: Vec::new(),
            overrides: BTreeMap::new(),
        })
    }

    pub fn with_exclude(mut self, exclude: Vec<String>) -> Result<Self> {
        if let Some(clash) = exclude.iter().find(|c| self.overrides.contains_key(*c)) {
            return Err(PipelineError::Decision(format!(
                "column '{clash}' is both excluded and overridden"
            )));
        }
        self.exclude = exclude;
        Ok(self)
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, OverrideStrategy>) -> Result<Self> {
        for (column, strategy) in &overrides {
            if let ColumnSelection::Only(list) = &self.columns
                && !list.contains(column)
            {
                return Err(PipelineError::Decision(format!(
                    "override for '{column}' falls outside the declared imputation columns"
                )));
            }
            if self.exclude.contains(column) {
                return Err(PipelineError::Decision(format!(
                    "column '{column}' is both excluded and overridden"
                )));
            }
            if let OverrideStrategy::Constant {
                fill_value: FillValue::Number(v),
            } = strategy
            {
                check_constant(*v, column)?;
            }
        }
        self.overrides = overrides;
        Ok(self)
    }

    pub fn columns(&self) -> &ColumnSelection {
        &self.columns
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn overrides(&self) -> &BTreeMap<String, OverrideStrategy> {
        &self.overrides
    }

    fn rules(&self) -> Vec<String> {
        let mut rules = vec![
            format!("numeric: {:?}", self.numeric),
            format!("categorical: {:?}", self.categorical),
        ];
        match &self.columns {
            ColumnSelection::AllFeatures => rules.push("columns: all features".to_owned()),
            ColumnSelection::Only(list) => rules.push(format!("columns: {}", list.join(", "))),
        }
        rules.extend(
            self.overrides
                .iter()
                .map(|(column, s)| format!("override {column}: {s:?}")),
        );
        rules
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationRow {
    pub column: String,
    pub dtype: String,
    pub kind: ColumnKind,
    pub strategy: String,
    /// Value written into missing cells, if any were filled
    pub fill_value: Option<String>,
    pub missing_before: usize,
    pub missing_after: usize,
    pub imputed: usize,
    pub pct_imputed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationReport {
    pub record: AuditRecord,
    pub rows: Vec<ImputationRow>,
    pub total_imputed_cells: usize,
    pub affected_columns: usize,
    pub target_preserved: bool,
}

/// Most frequent value rendered as text; ties go to the smallest.
fn mode(source: &Series) -> Result<Option<String>> {
    Ok(value_counts(source)?.into_iter().next().map(|(value, _)| value))
}

fn no_values(name: &str) -> PipelineError {
    PipelineError::Decision(format!(
        "column '{name}' has no values to derive a fill from; declare a constant"
    ))
}

fn numeric_fill(source: &Series, strategy: &OverrideStrategy) -> Result<f64> {
    let name = source.name().as_str();
    let values = source.cast(&DataType::Float64)?;
    let fill = match strategy {
        OverrideStrategy::Mean => values.mean(),
        OverrideStrategy::Median => values.median(),
        OverrideStrategy::Mode => mode(source)?.and_then(|v| v.parse::<f64>().ok()),
        OverrideStrategy::Constant {
            fill_value: FillValue::Number(v),
        } => Some(*v),
        OverrideStrategy::Constant {
            fill_value: FillValue::Text(t),
        } => {
            return Err(PipelineError::Decision(format!(
                "numeric column '{name}' cannot be filled with text '{t}'"
            )));
        }
    };
    fill.ok_or_else(|| no_values(name))
}

fn categorical_fill(source: &Series, strategy: &OverrideStrategy) -> Result<String> {
    let name = source.name().as_str();
    let fill = match strategy {
        OverrideStrategy::Mode => mode(source)?,
        OverrideStrategy::Constant { fill_value } => Some(fill_value.to_string()),
        OverrideStrategy::Mean | OverrideStrategy::Median => {
            return Err(PipelineError::Decision(format!(
                "categorical column '{name}' cannot use a {strategy:?} fill"
            )));
        }
    };
    fill.ok_or_else(|| no_values(name))
}

/// `fill_null` expression for `source` plus the fill value as text.
///
/// Integer columns keep their dtype when the fill is integral and are
/// promoted to float otherwise.
fn fill_expr(source: &Series, kind: ColumnKind, strategy: &OverrideStrategy) -> Result<(Expr, String)> {
    let name = source.name().as_str();
    match kind {
        ColumnKind::Numeric => {
            let fill = numeric_fill(source, strategy)?;
            let filled = col(name).fill_null(lit(fill));
            let expr = if source.dtype().is_integer() && fill.fract() == 0.0 {
                filled.cast(source.dtype().clone())
            } else {
                filled
            };
            Ok((expr.alias(name), fill.to_string()))
        }
        ColumnKind::Categorical => {
            let fill = categorical_fill(source, strategy)?;
            let expr = col(name)
                .cast(DataType::String)
                .fill_null(lit(fill.clone()))
                .alias(name);
            Ok((expr, fill))
        }
    }
}

/// One effective column with its resolved strategy, before filling.
struct PlannedFill {
    column: String,
    dtype: String,
    kind: ColumnKind,
    strategy: OverrideStrategy,
    missing_before: usize,
    fill_value: Option<String>,
}

pub struct ImputationStage {
    decision: ImputationDecision,
}

impl ImputationStage {
    pub fn new(decision: ImputationDecision) -> Self {
        Self { decision }
    }

    /// Resolve a strategy per effective column and a fill expression for
    /// each column that has missing cells.
    fn plan_fills(&self, df: &DataFrame, effective: &[String]) -> Result<(Vec<PlannedFill>, Vec<Expr>)> {
        let mut planned = Vec::new();
        let mut fills = Vec::new();
        for column in effective {
            let source = series(df, column)?;
            let kind = if is_numeric_dtype(source.dtype()) {
                ColumnKind::Numeric
            } else {
                ColumnKind::Categorical
            };
            let strategy = self.strategy_for(column, kind);
            let missing_before = source.null_count();
            let fill_value = if missing_before > 0 {
                let (expr, fill) = fill_expr(source, kind, &strategy)?;
                fills.push(expr);
                Some(fill)
            } else {
                None
            };
            planned.push(PlannedFill {
                column: column.clone(),
                dtype: source.dtype().to_string(),
                kind,
                strategy,
                missing_before,
                fill_value,
            });
        }
        Ok((planned, fills))
    }

    fn strategy_for(&self, column: &str, kind: ColumnKind) -> OverrideStrategy {
        if let Some(strategy) = self.decision.overrides.get(column) {
            return strategy.clone();
        }
        match kind {
            ColumnKind::Numeric => match self.decision.numeric {
                NumericStrategy::Mean => OverrideStrategy::Mean,
                NumericStrategy::Median => OverrideStrategy::Median,
                NumericStrategy::Constant { fill_value } => OverrideStrategy::Constant {
                    fill_value: FillValue::Number(fill_value),
                },
            },
            ColumnKind::Categorical => match &self.decision.categorical {
                CategoricalStrategy::Mode => OverrideStrategy::Mode,
                CategoricalStrategy::Constant { fill_value } => OverrideStrategy::Constant {
                    fill_value: FillValue::Text(fill_value.clone()),
                },
            },
        }
    }
}

impl StageExecutor for ImputationStage {
    fn stage(&self) -> Stage {
        Stage::Imputation
    }

    fn description(&self) -> String {
        format!(
            "Impute missing values (numeric {:?}, categorical {:?})",
            self.decision.numeric, self.decision.categorical
        )
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Imputation)?;
        let scope = payload.require_scope()?;
        scope.verify_target_isolation()?;

        let declared: Vec<String> = match &self.decision.columns {
            ColumnSelection::AllFeatures => scope.features().to_vec(),
            ColumnSelection::Only(list) => list.clone(),
        };
        let mut named = declared.iter().chain(self.decision.overrides.keys());
        if let Some(target) = named.find(|c| scope.is_target(c)) {
            return Err(PipelineError::ScopeIntegrity(format!(
                "imputation decision names the target '{target}'"
            )));
        }

        let df = payload.dataset();
        let mut effective = Vec::new();
        let mut excluded = Vec::new();
        for column in &declared {
            let reason = if !scope.is_feature(column) {
                Some(ExclusionReason::NotAFeature)
            } else if series(df, column).is_err() {
                Some(ExclusionReason::NotPresent)
            } else if self.decision.exclude.contains(column) {
                Some(ExclusionReason::ExcludedByDecision)
            } else {
                None
            };
            match reason {
                Some(reason) => excluded.push(ExcludedColumn {
                    column: column.clone(),
                    reason,
                }),
                None => effective.push(column.clone()),
            }
        }
        scope.ensure_within_features(&effective)?;

        let rows = df.height();
        let (planned, fills) = self.plan_fills(df, &effective)?;
        let out = if fills.is_empty() {
            df.clone()
        } else {
            df.clone().lazy().with_columns(fills).collect()?
        };

        let mut report_rows = Vec::new();
        let mut column_changes = Vec::new();
        for plan in planned {
            let missing_after = series(&out, &plan.column)?.null_count();
            let imputed = plan.missing_before.saturating_sub(missing_after);
            if let Some(fill) = &plan.fill_value {
                let mut change = ColumnChange::new(plan.column.as_str());
                for _ in 0..imputed {
                    change.record(None, Some(fill));
                }
                column_changes.push(change);
            }
            report_rows.push(ImputationRow {
                column: plan.column,
                dtype: plan.dtype,
                kind: plan.kind,
                strategy: format!("{:?}", plan.strategy),
                fill_value: plan.fill_value,
                missing_before: plan.missing_before,
                missing_after,
                imputed,
                pct_imputed: round_to(percent(imputed, rows), 2),
            });
        }

        if out.shape() != df.shape() {
            return Err(PipelineError::StructuralInvariant(format!(
                "imputation changed the shape from {:?} to {:?}",
                df.shape(),
                out.shape()
            )));
        }
        let target_preserved = match scope.target() {
            Some(t) if series(df, t).is_ok() => series(&out, t)?.equals_missing(series(df, t)?),
            _ => true,
        };
        if !target_preserved {
            return Err(PipelineError::ScopeIntegrity(
                "target values changed during imputation".to_owned(),
            ));
        }

        let record = AuditRecord {
            stage: Stage::Imputation,
            created_utc: Utc::now(),
            snapshot_before: payload.snapshot().clone(),
            snapshot_after: Snapshot::capture(&out),
            rules_applied: self.decision.rules(),
            declared_scope: declared,
            effective_scope: effective,
            excluded,
            column_changes,
        };
        let report = ImputationReport {
            total_imputed_cells: report_rows.iter().map(|r| r.imputed).sum(),
            affected_columns: report_rows.iter().filter(|r| r.imputed > 0).count(),
            rows: report_rows,
            target_preserved,
            record,
        };

        tracing::info!(
            imputed = report.total_imputed_cells,
            columns = report.affected_columns,
            "imputation complete"
        );
        Ok(payload.advance(Stage::Imputation, out, StageReport::Imputation(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SchemaContract;
    use crate::lifecycle::stages::contract::ContractStage;
    use crate::lifecycle::stages::ingest::{IngestSource, IngestionStage};
    use crate::lifecycle::stages::standardize::{NormalizationMode, StandardizationDecision, StandardizationStage};
    use crate::lifecycle::stages::target_audit::TargetAuditStage;
    use crate::dataset::values::{numeric_values, text_values};
    use crate::lifecycle::stages::typing::{TypingDecision, TypingStage};
    use pretty_assertions::assert_eq;

    fn audited(df: DataFrame, features: &[&str]) -> anyhow::Result<Payload> {
        let mut payload = IngestionStage::new(IngestSource::Frame {
            label: "test".to_owned(),
            df,
        })
        .execute(&Payload::start())?;
        payload = TypingStage::new(TypingDecision::new(Vec::new())?).execute(&payload)?;
        let contract = SchemaContract::new(
            "churn",
            features.iter().map(|s| (*s).to_owned()).collect(),
            Some("Churn".to_owned()),
        )?;
        payload = ContractStage::new(contract).execute(&payload)?;
        let standardize =
            StandardizationDecision::new(Vec::new(), BTreeMap::new(), NormalizationMode::MatchOnly)?;
        payload = StandardizationStage::new(standardize).execute(&payload)?;
        Ok(TargetAuditStage::new().execute(&payload)?)
    }

    fn frame() -> PolarsResult<DataFrame> {
        df! {
            "tenure" => &[Some(1i64), None, Some(4), Some(12)],
            "charges" => &[Some(10.0), Some(20.0), None, Some(40.5)],
            "contract" => &[Some("One year"), None, Some("One year"), Some("Two year")],
            "Churn" => &[Some("Yes"), None, Some("No"), Some("No")],
        }
    }

    fn decision() -> anyhow::Result<ImputationDecision> {
        Ok(ImputationDecision::new(
            NumericStrategy::Median,
            CategoricalStrategy::Mode,
            ColumnSelection::AllFeatures,
        )?)
    }

    #[test]
    fn test_strategies_fill_features_only() -> anyhow::Result<()> {
        let payload = audited(frame()?, &["tenure", "charges", "contract"])?;
        let next = ImputationStage::new(decision()?).execute(&payload)?;
        let out = next.dataset();

        // Median of 1, 4, 12 is 4: integral, so the integer dtype is kept.
        assert_eq!(series(out, "tenure")?.dtype(), &DataType::Int64);
        assert_eq!(numeric_values(series(out, "tenure")?)?, vec![Some(1.0), Some(4.0), Some(4.0), Some(12.0)]);
        assert_eq!(numeric_values(series(out, "charges")?)?.get(2), Some(&Some(20.0)));
        assert_eq!(text_values(series(out, "contract")?)?.get(1), Some(&Some("One year".to_owned())));

        // The target keeps its null.
        assert_eq!(series(out, "Churn")?.null_count(), 1);

        let Some(StageReport::Imputation(report)) = next.trail().report_for(Stage::Imputation) else {
            anyhow::bail!("missing imputation report");
        };
        assert_eq!(report.total_imputed_cells, 3);
        assert_eq!(report.affected_columns, 3);
        assert!(report.target_preserved);
        assert_eq!(report.record.snapshot_before.row_count, report.record.snapshot_after.row_count);
        Ok(())
    }

    #[test]
    fn test_mean_promotes_integers_and_overrides_apply() -> anyhow::Result<()> {
        let payload = audited(frame()?, &["tenure", "charges", "contract"])?;
        let decision = ImputationDecision::new(
            NumericStrategy::Mean,
            CategoricalStrategy::Constant {
                fill_value: "unknown".to_owned(),
            },
            ColumnSelection::Only(vec!["tenure".to_owned(), "contract".to_owned(), "gender".to_owned()]),
        )?
        .with_overrides(BTreeMap::from([(
            "contract".to_owned(),
            OverrideStrategy::Mode,
        )]))?;
        let next = ImputationStage::new(decision).execute(&payload)?;
        let out = next.dataset();

        assert_eq!(series(out, "tenure")?.dtype(), &DataType::Float64);
        assert_eq!(numeric_values(series(out, "tenure")?)?.get(1), Some(&Some(17.0 / 3.0)));
        assert_eq!(text_values(series(out, "contract")?)?.get(1), Some(&Some("One year".to_owned())));
        // Not declared, so left alone.
        assert_eq!(series(out, "charges")?.null_count(), 1);

        let Some(StageReport::Imputation(report)) = next.trail().report_for(Stage::Imputation) else {
            anyhow::bail!("missing imputation report");
        };
        assert_eq!(report.record.excluded.len(), 1);
        Ok(())
    }

    #[test]
    fn test_override_outside_selection_is_rejected() -> anyhow::Result<()> {
        let only_tenure = ImputationDecision::new(
            NumericStrategy::Median,
            CategoricalStrategy::Mode,
            ColumnSelection::Only(vec!["tenure".to_owned()]),
        )?;
        let err = only_tenure
            .clone()
            .with_overrides(BTreeMap::from([("charges".to_owned(), OverrideStrategy::Mean)]))
            .unwrap_err();
        assert_eq!(err.invariant(), "explicit-decision");
        assert!(err.to_string().contains("charges"));

        let doc = "numeric: {strategy: median}\ncategorical: {strategy: mode}\ncolumns: {only: [tenure]}\noverrides:\n  charges: {strategy: mean}\n";
        assert!(serde_yaml::from_str::<ImputationDecision>(doc).is_err());

        let accepted = only_tenure.with_overrides(BTreeMap::from([("tenure".to_owned(), OverrideStrategy::Mean)]))?;
        let payload = audited(frame()?, &["tenure", "charges", "contract"])?;
        let next = ImputationStage::new(accepted).execute(&payload)?;
        assert_eq!(numeric_values(series(next.dataset(), "tenure")?)?.get(1), Some(&Some(17.0 / 3.0)));
        Ok(())
    }

    #[test]
    fn test_target_in_decision_is_rejected() -> anyhow::Result<()> {
        let payload = audited(frame()?, &["tenure", "charges", "contract"])?;
        let decision = ImputationDecision::new(
            NumericStrategy::Mean,
            CategoricalStrategy::Mode,
            ColumnSelection::Only(vec!["Churn".to_owned()]),
        )?;
        let err = ImputationStage::new(decision).execute(&payload).unwrap_err();
        assert_eq!(err.invariant(), "target-isolation");
        Ok(())
    }

    #[test]
    fn test_all_null_column_needs_a_constant() -> anyhow::Result<()> {
        let df = df! {
            "empty" => &[None::<f64>, None],
            "Churn" => &["Yes", "No"],
        }?;
        let payload = audited(df, &["empty"])?;
        let err = ImputationStage::new(decision()?).execute(&payload).unwrap_err();
        assert_eq!(err.invariant(), "explicit-decision");
        Ok(())
    }

    #[test]
    fn test_decision_documents() {
        let ok = "numeric: {strategy: constant, fill_value: 0}\ncategorical: {strategy: mode}\ncolumns: all_features\n";
        assert!(serde_yaml::from_str::<ImputationDecision>(ok).is_ok());
        let missing_fill = "numeric: {strategy: constant}\ncategorical: {strategy: mode}\ncolumns: all_features\n";
        assert!(serde_yaml::from_str::<ImputationDecision>(missing_fill).is_err());
        let missing_columns = "numeric: {strategy: mean}\ncategorical: {strategy: mode}\n";
        assert!(serde_yaml::from_str::<ImputationDecision>(missing_columns).is_err());
    }

    #[test]
    fn test_fill_values_from_present_cells() -> anyhow::Result<()> {
        let even = Series::new("n".into(), vec![Some(4.0), None, Some(1.0), Some(3.0), Some(2.0)]);
        assert_eq!(numeric_fill(&even, &OverrideStrategy::Median)?, 2.5);
        assert_eq!(numeric_fill(&even, &OverrideStrategy::Mean)?, 2.5);

        let tied = Series::new("c".into(), vec![Some("b"), Some("a"), None, Some("b"), Some("a")]);
        assert_eq!(categorical_fill(&tied, &OverrideStrategy::Mode)?, "a");

        let empty = Series::new("e".into(), vec![None::<f64>, None]);
        assert_eq!(numeric_fill(&empty, &OverrideStrategy::Mean).unwrap_err().invariant(), "explicit-decision");
        Ok(())
    }
}
