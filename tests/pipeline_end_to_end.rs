//! End-to-end runs over the fixture dataset in `testdata/`.
//!
//! The fixture has 50 customers, 10 of whom churn. Every third customer has
//! no internet service, two monthly charges are blank and two total charges
//! are a single space.

use churnprep::artifact::export_run;
use churnprep::contract::SchemaContract;
use churnprep::dataset::{SourceSpec, load_df};
use churnprep::integrity::{receipt_path_for, verify_receipt};
use churnprep::lifecycle::stages::ingest::IngestSource;
use churnprep::lifecycle::{Stage, StageReport};
use churnprep::pipeline::{Pipeline, PipelineOutcome, RunPlan};
use pretty_assertions::assert_eq;

const CSV: &str = "testdata/churn.csv";
const CONTRACT: &str = "testdata/contract.yaml";
const PLAN: &str = "testdata/plan.yaml";

fn pipeline() -> anyhow::Result<Pipeline> {
    let contract = SchemaContract::from_file(CONTRACT)?;
    let plan = RunPlan::from_file(PLAN)?;
    Ok(Pipeline::new(contract, plan)?)
}

fn run() -> anyhow::Result<PipelineOutcome> {
    let source = IngestSource::Path(SourceSpec::from_path(CSV));
    Ok(pipeline()?.run(source)?)
}

#[test]
fn test_full_run_over_fixture() -> anyhow::Result<()> {
    let outcome = run()?;

    let stages: Vec<Stage> = outcome.trail().entries().iter().map(|e| e.report.stage()).collect();
    assert_eq!(stages, Stage::ALL.to_vec());

    let rep = outcome.representation()?;
    assert_eq!(rep.x_train.nrows(), 40);
    assert_eq!(rep.x_test.nrows(), 10);
    assert_eq!(rep.y_train.len(), 40);
    assert_eq!(rep.y_test.len(), 10);
    assert_eq!(rep.x_train.ncols(), rep.feature_names.len());
    assert_eq!(rep.x_test.ncols(), rep.feature_names.len());
    assert_eq!(rep.transformer.input_columns().len(), 8);
    assert!(rep.x_train.iter().all(|v| v.is_finite()));
    assert!(rep.x_test.iter().all(|v| v.is_finite()));

    let Some(StageReport::ContractEnforcement(contract)) = outcome.trail().report_for(Stage::ContractEnforcement)
    else {
        anyhow::bail!("contract enforcement report missing");
    };
    assert_eq!(contract.dropped, vec!["customer_id", "total_charges"]);
    assert!(!contract.scope.is_feature("Churn"));
    Ok(())
}

#[test]
fn test_directory_source_resolves_single_file() -> anyhow::Result<()> {
    let outcome = pipeline()?.run(IngestSource::Path(SourceSpec::from_path("testdata")))?;
    assert_eq!(outcome.representation()?.x_train.nrows(), 40);
    Ok(())
}

#[test]
fn test_no_internet_service_phrase_is_substituted_only_where_it_occurs() -> anyhow::Result<()> {
    let outcome = run()?;
    let Some(StageReport::Standardization(report)) = outcome.trail().report_for(Stage::Standardization) else {
        anyhow::bail!("standardization report missing");
    };

    let changed = |column: &str| {
        report
            .record
            .change_for(column)
            .map_or(0, |c| c.cells_changed)
    };
    assert_eq!(changed("online_security"), 16);
    assert_eq!(changed("tech_support"), 16);
    assert_eq!(report.total_cells_changed, 32);
    assert_eq!(
        report.record.effective_scope,
        vec!["online_security".to_owned(), "tech_support".to_owned()]
    );
    Ok(())
}

#[test]
fn test_imputation_fills_only_missing_cells() -> anyhow::Result<()> {
    let outcome = run()?;
    let record = outcome
        .trail()
        .report_for(Stage::Imputation)
        .and_then(StageReport::audit_record)
        .ok_or_else(|| anyhow::anyhow!("imputation record missing"))?;

    assert_eq!(record.total_cells_changed(), 2);
    assert_eq!(record.change_for("monthly_charges").map(|c| c.cells_changed), Some(2));
    assert_eq!(record.snapshot_before.row_count, record.snapshot_after.row_count);
    Ok(())
}

#[test]
fn test_stratified_split_keeps_class_ratio() -> anyhow::Result<()> {
    let outcome = run()?;
    let Some(StageReport::Split(report)) = outcome.trail().report_for(Stage::Split) else {
        anyhow::bail!("split report missing");
    };

    assert!(report.within_tolerance);
    for class in &report.target_distribution {
        assert!(class.delta_train_pp.abs() <= 2.0, "{class:?}");
        assert!(class.delta_test_pp.abs() <= 2.0, "{class:?}");
    }
    let churners = report
        .target_distribution
        .iter()
        .find(|d| d.label == "Yes")
        .ok_or_else(|| anyhow::anyhow!("no churn class"))?;
    assert_eq!((churners.count_train, churners.count_test), (8, 2));
    assert!(!report.risk_checks.target_in_x_train);
    assert!(!report.risk_checks.target_in_x_test);
    Ok(())
}

#[test]
fn test_same_seed_same_partition() -> anyhow::Result<()> {
    let first = run()?;
    let second = run()?;

    let rows = |o: &PipelineOutcome| o.payload().partition().map(|p| p.test_rows.clone());
    assert_eq!(rows(&first), rows(&second));
    assert_eq!(first.representation()?.x_train, second.representation()?.x_train);
    assert_eq!(first.representation()?.feature_names, second.representation()?.feature_names);
    assert_ne!(first.trail().run_id(), second.trail().run_id());
    Ok(())
}

#[test]
fn test_uncovered_target_value_aborts_representation() -> anyhow::Result<()> {
    let mut contract = SchemaContract::from_file(CONTRACT)?;
    contract.expected_target_domain = None;
    let yaml = std::fs::read_to_string(PLAN)?.replace(r#"mapping: { "No": 0, "Yes": 1 }"#, r#"mapping: { "No": 0 }"#);
    let plan = RunPlan::from_yaml(&yaml)?;

    let failure = Pipeline::new(contract, plan)?
        .run(IngestSource::Path(SourceSpec::from_path(CSV)))
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Representation);
    assert_eq!(failure.invariant, "mapping-coverage");
    assert_eq!(failure.trail.len(), 7);
    assert_eq!(failure.last_record.as_ref().map(|r| r.stage), Some(Stage::Split));
    assert!(failure.summary().contains("Yes"));
    Ok(())
}

#[test]
fn test_exported_outputs_carry_valid_receipts() -> anyhow::Result<()> {
    let outcome = run()?;
    let dir = tempfile::TempDir::new()?;
    let written = export_run(&outcome, dir.path(), true)?;

    let names: Vec<String> = written
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(
        names,
        vec!["audit_trail.json", "x_train.csv", "x_test.csv", "y_train.csv", "y_test.csv"]
    );
    for path in &written {
        let result = verify_receipt(&receipt_path_for(path))?;
        assert!(result.passed, "{}", result.format_cli());
    }

    let x_train = load_df(&dir.path().join("x_train.csv"))?;
    let rep = outcome.representation()?;
    assert_eq!(x_train.shape(), (40, rep.feature_names.len()));
    assert_eq!(
        x_train.get_column_names_str(),
        rep.feature_names.iter().map(String::as_str).collect::<Vec<_>>()
    );
    assert!(dir.path().join("audit_trail.json").is_file());
    Ok(())
}
