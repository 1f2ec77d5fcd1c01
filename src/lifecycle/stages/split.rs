//! Split stage - separate features from the target and partition rows into
//! train and test sets
//!
//! Partitioning is a pure function of the row count, the class labels and the
//! decision, so the same seed always yields the same rows.

use super::{Stage, StageExecutor};
use crate::contract::Scope;
use crate::dataset::Snapshot;
use crate::dataset::values::{column_names, distinct_in_order, is_text_dtype, label_values, select_columns, series, take_rows};
use crate::error::{PipelineError, Result};
use crate::lifecycle::audit::{AuditRecord, StageReport};
use crate::lifecycle::payload::Payload;
use crate::utils::round_to;
use chrono::Utc;
use polars::prelude::*;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand::seq::SliceRandom as _;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Largest accepted gap, in percentage points, between a class's share of the
/// test partition and its share of the whole dataset when stratifying.
pub const STRATIFY_TOLERANCE_PP: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SplitDecisionDoc")]
pub struct SplitDecision {
    test_fraction: f64,
    random_seed: u64,
    shuffle: bool,
    stratify: bool,
    stratify_column: Option<String>,
    audit_categorical_cardinality: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitDecisionDoc {
    test_fraction: f64,
    random_seed: u64,
    shuffle: bool,
    stratify: bool,
    #[serde(default)]
    stratify_column: Option<String>,
    #[serde(default)]
    audit_categorical_cardinality: bool,
}

impl TryFrom<SplitDecisionDoc> for SplitDecision {
    type Error = PipelineError;

    fn try_from(doc: SplitDecisionDoc) -> Result<Self> {
        let decision = match doc.stratify_column {
            Some(column) => Self::stratified(doc.test_fraction, doc.random_seed, column),
            None => Self::new(doc.test_fraction, doc.random_seed, doc.shuffle),
        }?;
        if decision.stratify != doc.stratify || decision.shuffle != doc.shuffle {
            return Err(PipelineError::Decision(
                "stratify requires shuffle and a stratify_column; stratify_column requires stratify".to_owned(),
            ));
        }
        Ok(decision.with_cardinality_audit(doc.audit_categorical_cardinality))
    }
}

fn check_fraction(test_fraction: f64) -> Result<()> {
    if test_fraction.is_finite() && test_fraction > 0.0 && test_fraction < 1.0 {
        Ok(())
    } else {
        Err(PipelineError::Decision(format!(
            "test_fraction must lie strictly between 0 and 1, got {test_fraction}"
        )))
    }
}

impl SplitDecision {
    /// Unstratified split.
    pub fn new(test_fraction: f64, random_seed: u64, shuffle: bool) -> Result<Self> {
        check_fraction(test_fraction)?;
        Ok(Self {
            test_fraction,
            random_seed,
            shuffle,
            stratify: false,
            stratify_column: None,
            audit_categorical_cardinality: false,
        })
    }

    /// Shuffled split stratified on `column` (the target or a feature).
    pub fn stratified(test_fraction: f64, random_seed: u64, column: impl Into<String>) -> Result<Self> {
        check_fraction(test_fraction)?;
        let column = column.into();
        if column.trim().is_empty() {
            return Err(PipelineError::Decision(
                "stratify_column must not be blank".to_owned(),
            ));
        }
        Ok(Self {
            test_fraction,
            random_seed,
            shuffle: true,
            stratify: true,
            stratify_column: Some(column),
            audit_categorical_cardinality: false,
        })
    }

    pub fn with_cardinality_audit(mut self, enabled: bool) -> Self {
        self.audit_categorical_cardinality = enabled;
        self
    }

    pub fn test_fraction(&self) -> f64 {
        self.test_fraction
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn stratify_column(&self) -> Option<&str> {
        self.stratify_column.as_deref()
    }

    /// Rows in the test partition for a dataset of `rows` rows.
    pub fn test_rows_for(&self, rows: usize) -> usize {
        // Absorb float noise such as 10 * 0.3 = 3.0000000000000004.
        (rows as f64 * self.test_fraction - 1e-9).ceil() as usize
    }
}

/// Train and test row positions for `rows` rows.
///
/// `labels`, when given, drives a stratified allocation and must hold one
/// label per row.
pub fn split_indices(
    rows: usize,
    labels: Option<&[String]>,
    decision: &SplitDecision,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = decision.test_rows_for(rows);
    if n_test == 0 || n_test >= rows {
        return Err(PipelineError::Decision(format!(
            "test_fraction {} on {rows} rows leaves an empty partition",
            decision.test_fraction
        )));
    }
    if !decision.shuffle {
        let cut = rows - n_test;
        return Ok(((0..cut).collect(), (cut..rows).collect()));
    }

    let mut order: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(decision.random_seed);
    order.shuffle(&mut rng);

    let selected: HashSet<usize> = match labels {
        None => order.iter().take(n_test).copied().collect(),
        Some(labels) => {
            if labels.len() != rows {
                return Err(PipelineError::StructuralInvariant(format!(
                    "{} stratification labels for {rows} rows",
                    labels.len()
                )));
            }
            stratified_selection(&order, labels, n_test)
        }
    };

    let (test, train): (Vec<usize>, Vec<usize>) = order.into_iter().partition(|i| selected.contains(i));
    Ok((train, test))
}

/// Largest-remainder allocation of `n_test` rows over the label classes,
/// taking each class's rows in shuffled order.
fn stratified_selection(order: &[usize], labels: &[String], n_test: usize) -> HashSet<usize> {
    let rows = order.len();
    let mut classes: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for &i in order {
        if let Some(label) = labels.get(i) {
            classes.entry(label.as_str()).or_default().push(i);
        }
    }

    let mut quotas: Vec<(&str, usize, usize, usize)> = classes
        .iter()
        .map(|(label, members)| {
            let share = n_test * members.len();
            (*label, share / rows, share % rows, members.len())
        })
        .collect();
    let assigned: usize = quotas.iter().map(|q| q.1).sum();
    let mut by_remainder: Vec<usize> = (0..quotas.len()).collect();
    by_remainder.sort_by(|&a, &b| match (quotas.get(a), quotas.get(b)) {
        (Some(qa), Some(qb)) => qb.2.cmp(&qa.2).then(qb.3.cmp(&qa.3)).then(qa.0.cmp(qb.0)),
        _ => std::cmp::Ordering::Equal,
    });
    for &k in by_remainder.iter().take(n_test.saturating_sub(assigned)) {
        if let Some(q) = quotas.get_mut(k) {
            q.1 += 1;
        }
    }

    quotas
        .iter()
        .filter_map(|(label, quota, _, _)| classes.get(label).map(|m| m.iter().take(*quota)))
        .flatten()
        .copied()
        .collect()
}

/// Terminal partition of one run.
#[derive(Debug, Clone)]
pub struct Partition {
    pub x_train: DataFrame,
    pub x_test: DataFrame,
    pub y_train: Series,
    pub y_test: Series,
    /// Source row positions of each side
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
}

impl Partition {
    fn build(x: &DataFrame, y_frame: &DataFrame, target: &str, train_rows: Vec<usize>, test_rows: Vec<usize>) -> Result<Self> {
        Ok(Self {
            x_train: take_rows(x, &train_rows)?,
            x_test: take_rows(x, &test_rows)?,
            y_train: series(&take_rows(y_frame, &train_rows)?, target)?.clone(),
            y_test: series(&take_rows(y_frame, &test_rows)?, target)?.clone(),
            train_rows,
            test_rows,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShapes {
    pub x_train: (usize, usize),
    pub x_test: (usize, usize),
    pub y_train: usize,
    pub y_test: usize,
    pub feature_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution {
    pub label: String,
    pub count_all: usize,
    pub count_train: usize,
    pub count_test: usize,
    pub rate_all: f64,
    pub rate_train: f64,
    pub rate_test: f64,
    /// Train share minus overall share, in percentage points
    pub delta_train_pp: f64,
    pub delta_test_pp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskChecks {
    pub target_in_x_train: bool,
    pub target_in_x_test: bool,
    pub columns_match_scope_train: bool,
    pub columns_match_scope_test: bool,
    pub min_class_rate_all: f64,
    pub min_class_rate_train: f64,
    pub min_class_rate_test: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityRow {
    pub feature: String,
    pub distinct_train: usize,
    pub distinct_test: usize,
    pub only_in_test: usize,
    pub only_in_train: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    pub record: AuditRecord,
    pub shapes: SplitShapes,
    pub target_distribution: Vec<ClassDistribution>,
    /// Largest absolute per-class test delta within [`STRATIFY_TOLERANCE_PP`]
    pub within_tolerance: bool,
    pub risk_checks: RiskChecks,
    pub cardinality: Option<Vec<CardinalityRow>>,
}

fn class_counts(labels: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(label.clone()).or_insert(0) += 1;
    }
    counts
}

fn rate(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn target_distribution(all: &[String], train: &[String], test: &[String]) -> Vec<ClassDistribution> {
    let (all_c, train_c, test_c) = (class_counts(all), class_counts(train), class_counts(test));
    all_c
        .iter()
        .map(|(label, &count_all)| {
            let count_train = train_c.get(label).copied().unwrap_or(0);
            let count_test = test_c.get(label).copied().unwrap_or(0);
            let rate_all = rate(count_all, all.len());
            let rate_train = rate(count_train, train.len());
            let rate_test = rate(count_test, test.len());
            ClassDistribution {
                label: label.clone(),
                count_all,
                count_train,
                count_test,
                rate_all: round_to(rate_all, 6),
                rate_train: round_to(rate_train, 6),
                rate_test: round_to(rate_test, 6),
                delta_train_pp: round_to((rate_train - rate_all) * 100.0, 4),
                delta_test_pp: round_to((rate_test - rate_all) * 100.0, 4),
            }
        })
        .collect()
}

fn min_class_rate(labels: &[String]) -> f64 {
    class_counts(labels)
        .values()
        .map(|&c| rate(c, labels.len()))
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.min(r))))
        .unwrap_or(0.0)
}

fn cardinality_audit(x_train: &DataFrame, x_test: &DataFrame) -> Result<Vec<CardinalityRow>> {
    let mut rows = Vec::new();
    for column in x_train.get_columns() {
        if !is_text_dtype(column.dtype()) {
            continue;
        }
        let name = column.name().to_string();
        let distinct = |df: &DataFrame| -> Result<BTreeSet<String>> {
            Ok(distinct_in_order(series(df, &name)?)?.into_iter().collect())
        };
        let (train, test) = (distinct(x_train)?, distinct(x_test)?);
        rows.push(CardinalityRow {
            distinct_train: train.len(),
            distinct_test: test.len(),
            only_in_test: test.difference(&train).count(),
            only_in_train: train.difference(&test).count(),
            feature: name,
        });
    }
    rows.sort_by(|a, b| {
        b.only_in_test
            .cmp(&a.only_in_test)
            .then(a.distinct_train.cmp(&b.distinct_train))
    });
    Ok(rows)
}

fn risk_checks(scope: &Scope, target: &str, partition: &Partition, labels: &[String], train: &[String], test: &[String]) -> RiskChecks {
    let train_cols = column_names(&partition.x_train);
    let test_cols = column_names(&partition.x_test);
    RiskChecks {
        target_in_x_train: train_cols.iter().any(|c| c == target),
        target_in_x_test: test_cols.iter().any(|c| c == target),
        columns_match_scope_train: train_cols == scope.features(),
        columns_match_scope_test: test_cols == scope.features(),
        min_class_rate_all: round_to(min_class_rate(labels), 6),
        min_class_rate_train: round_to(min_class_rate(train), 6),
        min_class_rate_test: round_to(min_class_rate(test), 6),
    }
}

pub struct SplitStage {
    decision: SplitDecision,
}

impl SplitStage {
    pub fn new(decision: SplitDecision) -> Self {
        Self { decision }
    }
}

impl SplitStage {
    /// Labels to stratify on, if the decision names a column.
    fn strata(&self, df: &DataFrame, scope: &Scope, target: &str, target_labels: &[String]) -> Result<Option<Vec<String>>> {
        match self.decision.stratify_column() {
            None => Ok(None),
            Some(column) if column == target => Ok(Some(target_labels.to_vec())),
            Some(column) if scope.is_feature(column) => Ok(Some(label_values(series(df, column)?)?)),
            Some(column) => Err(PipelineError::ScopeIntegrity(format!(
                "stratify column '{column}' is neither the target nor a feature"
            ))),
        }
    }
}

impl StageExecutor for SplitStage {
    fn stage(&self) -> Stage {
        Stage::Split
    }

    fn description(&self) -> String {
        format!(
            "Split {:.0}% test (seed {}, shuffle {}, stratify {:?})",
            self.decision.test_fraction * 100.0,
            self.decision.random_seed,
            self.decision.shuffle,
            self.decision.stratify_column
        )
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Split)?;
        let scope = payload.require_scope()?;
        scope.verify_target_isolation()?;
        let Some(target) = scope.target() else {
            return Err(PipelineError::Decision(
                "split needs a declared target to separate".to_owned(),
            ));
        };

        let df = payload.dataset();
        let rows = df.height();
        let features = scope.features().to_vec();
        let x = select_columns(df, &features)?;
        let y = series(df, target)?;
        let target_labels = label_values(y)?;

        let strata = self.strata(df, scope, target, &target_labels)?;
        let (train_rows, test_rows) = split_indices(rows, strata.as_deref(), &self.decision)?;
        if train_rows.len() + test_rows.len() != rows {
            return Err(PipelineError::StructuralInvariant(format!(
                "split produced {} + {} rows from {rows}",
                train_rows.len(),
                test_rows.len()
            )));
        }

        let pick = |positions: &[usize]| -> Vec<String> {
            positions
                .iter()
                .filter_map(|&i| target_labels.get(i).cloned())
                .collect()
        };
        let (train_labels, test_labels) = (pick(&train_rows), pick(&test_rows));

        let y_frame = select_columns(df, &[target.to_owned()])?;
        let partition = Partition::build(&x, &y_frame, target, train_rows, test_rows)?;

        let checks = risk_checks(scope, target, &partition, &target_labels, &train_labels, &test_labels);
        if checks.target_in_x_train || checks.target_in_x_test {
            return Err(PipelineError::ScopeIntegrity(format!(
                "target '{target}' found in the split feature frames"
            )));
        }
        if !checks.columns_match_scope_train || !checks.columns_match_scope_test {
            return Err(PipelineError::StructuralInvariant(
                "split feature columns do not match the scope".to_owned(),
            ));
        }

        let distribution = target_distribution(&target_labels, &train_labels, &test_labels);
        let within_tolerance = distribution
            .iter()
            .all(|d| d.delta_test_pp.abs() <= STRATIFY_TOLERANCE_PP);
        if self.decision.stratify && !within_tolerance {
            tracing::warn!("stratified split exceeds the {STRATIFY_TOLERANCE_PP} pp tolerance");
        }
        let cardinality = if self.decision.audit_categorical_cardinality {
            Some(cardinality_audit(&partition.x_train, &partition.x_test)?)
        } else {
            None
        };

        let record = AuditRecord {
            stage: Stage::Split,
            created_utc: Utc::now(),
            snapshot_before: payload.snapshot().clone(),
            snapshot_after: Snapshot::combined(&[
                &Snapshot::capture(&partition.x_train),
                &Snapshot::capture(&partition.x_test),
            ]),
            rules_applied: vec![self.description()],
            declared_scope: features.clone(),
            effective_scope: features,
            excluded: Vec::new(),
            column_changes: Vec::new(),
        };
        let report = SplitReport {
            record,
            shapes: SplitShapes {
                x_train: partition.x_train.shape(),
                x_test: partition.x_test.shape(),
                y_train: partition.y_train.len(),
                y_test: partition.y_test.len(),
                feature_count: scope.features().len(),
            },
            target_distribution: distribution,
            within_tolerance,
            risk_checks: checks,
            cardinality,
        };

        tracing::info!(
            train = report.shapes.y_train,
            test = report.shapes.y_test,
            within_tolerance,
            "split complete"
        );
        Ok(payload
            .advance(Stage::Split, df.clone(), StageReport::Split(report))
            .with_partition(partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pattern: &[(&str, usize)]) -> Vec<String> {
        pattern
            .iter()
            .flat_map(|(label, n)| std::iter::repeat_n((*label).to_owned(), *n))
            .collect()
    }

    #[test]
    fn test_no_shuffle_takes_the_tail() -> anyhow::Result<()> {
        let decision = SplitDecision::new(0.25, 7, false)?;
        let (train, test) = split_indices(10, None, &decision)?;
        assert_eq!(train, (0..7).collect::<Vec<_>>());
        assert_eq!(test, vec![7, 8, 9]);
        Ok(())
    }

    #[test]
    fn test_stratified_80_20_within_tolerance() -> anyhow::Result<()> {
        let y = labels(&[("No", 735), ("Yes", 265)]);
        let decision = SplitDecision::stratified(0.2, 42, "Churn")?;
        let (train, test) = split_indices(y.len(), Some(&y), &decision)?;
        assert_eq!(test.len(), 200);
        assert_eq!(train.len(), 800);

        let pick = |rows: &[usize]| rows.iter().filter_map(|&i| y.get(i).cloned()).collect::<Vec<_>>();
        let dist = target_distribution(&y, &pick(&train), &pick(&test));
        assert!(dist.iter().all(|d| d.delta_test_pp.abs() <= STRATIFY_TOLERANCE_PP));
        assert!(dist.iter().all(|d| d.delta_train_pp.abs() <= STRATIFY_TOLERANCE_PP));
        let yes = dist.iter().find(|d| d.label == "Yes").ok_or_else(|| anyhow::anyhow!("no Yes"))?;
        assert_eq!(yes.count_test, 53);
        Ok(())
    }

    #[test]
    fn test_empty_side_is_rejected() -> anyhow::Result<()> {
        let decision = SplitDecision::new(0.99, 1, true)?;
        assert!(split_indices(10, None, &decision).is_err());
        assert!(SplitDecision::new(1.0, 1, true).is_err());
        assert!(SplitDecision::new(0.0, 1, true).is_err());
        Ok(())
    }

    #[test]
    fn test_decision_documents() {
        let ok = "test_fraction: 0.2\nrandom_seed: 42\nshuffle: true\nstratify: true\nstratify_column: Churn\n";
        assert!(serde_yaml::from_str::<SplitDecision>(ok).is_ok());
        let no_column = "test_fraction: 0.2\nrandom_seed: 42\nshuffle: true\nstratify: true\n";
        assert!(serde_yaml::from_str::<SplitDecision>(no_column).is_err());
        let no_shuffle = "test_fraction: 0.2\nrandom_seed: 42\nshuffle: false\nstratify: true\nstratify_column: Churn\n";
        assert!(serde_yaml::from_str::<SplitDecision>(no_shuffle).is_err());
        let stray_column = "test_fraction: 0.2\nrandom_seed: 42\nshuffle: true\nstratify: false\nstratify_column: Churn\n";
        assert!(serde_yaml::from_str::<SplitDecision>(stray_column).is_err());
        let missing_seed = "test_fraction: 0.2\nshuffle: true\nstratify: false\n";
        assert!(serde_yaml::from_str::<SplitDecision>(missing_seed).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_is_a_disjoint_cover(rows in 2usize..300, fraction in 0.01f64..0.5, seed in any::<u64>(), shuffle in any::<bool>()) {
            let decision = SplitDecision::new(fraction, seed, shuffle).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let n_test = decision.test_rows_for(rows);
            prop_assume!(n_test < rows);
            let (train, test) = split_indices(rows, None, &decision).map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(test.len(), n_test);
            prop_assert_eq!(train.len() + test.len(), rows);
            let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
            all.sort_unstable();
            prop_assert_eq!(all, (0..rows).collect::<Vec<_>>());
        }

        #[test]
        fn prop_split_is_deterministic(rows in 10usize..200, seed in any::<u64>(), yes in 1usize..9) {
            let y: Vec<String> = (0..rows).map(|i| if i % 10 < yes { "Yes".to_owned() } else { "No".to_owned() }).collect();
            let decision = SplitDecision::stratified(0.2, seed, "Churn").map_err(|e| TestCaseError::fail(e.to_string()))?;
            let first = split_indices(rows, Some(&y), &decision).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let second = split_indices(rows, Some(&y), &decision).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(first, second);
        }
    }
}
