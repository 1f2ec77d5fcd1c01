use anyhow::{Context as _, Result};
use churnprep::artifact::{ModelBundle, export_run, write_trail};
use churnprep::config::Settings;
use churnprep::contract::SchemaContract;
use churnprep::dataset::{SourceSpec, load_df, resolve_source};
use churnprep::inference::{EstimatorSpec, FeatureMap, PredictRequest, Predictor, load_estimator};
use churnprep::integrity::verify_receipt;
use churnprep::lifecycle::stages::candidates::discover_candidates;
use churnprep::lifecycle::stages::ingest::{IngestSource, diagnose};
use churnprep::pipeline::{Pipeline, RunPlan, validate_plan};
use churnprep::utils::format_bytes;
use clap::{Args, Parser, Subcommand};
use polars::prelude::Schema;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "churnprep",
    version,
    about = "Staged, auditable preparation of tabular churn datasets"
)]
pub struct Cli {
    /// Settings file (YAML or JSON). Defaults to the platform config directory.
    #[arg(long, global = true, env = "CHURNPREP_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct SourceArg {
    /// Raw CSV/Parquet file, or a directory holding exactly one. Defaults to the raw data directory.
    #[arg(short, long)]
    pub source: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every stage and write matrices, the audit trail and receipts
    Run {
        #[command(flatten)]
        source: SourceArg,

        /// Schema contract (YAML or JSON)
        #[arg(short, long)]
        contract: PathBuf,

        /// Run plan with every stage decision (YAML or JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Output directory. Defaults to the artifacts directory.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Estimator JSON (`kind` + `parameters`) to bundle with the fitted transformer
        #[arg(long)]
        estimator: Option<PathBuf>,
    },
    /// Check a run plan against a contract, and optionally a source's columns
    Validate {
        #[command(flatten)]
        source: SourceArg,

        #[arg(short, long)]
        contract: PathBuf,

        #[arg(short, long)]
        plan: PathBuf,
    },
    /// Print ingestion diagnostics for a raw source
    Inspect {
        #[command(flatten)]
        source: SourceArg,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rank categorical candidates among a source's non-target columns
    Candidates {
        #[command(flatten)]
        source: SourceArg,

        #[arg(short, long)]
        contract: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Verify an artifact against its integrity receipt
    Verify {
        /// Path to a `.receipt.json` file
        #[arg(short, long)]
        receipt: PathBuf,
    },
    /// Score one request against a saved model bundle
    Predict {
        #[arg(short, long)]
        bundle: PathBuf,

        /// Request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Mapping from request fields to model features (YAML)
        #[arg(long)]
        feature_map: Option<PathBuf>,
    },
}

pub fn run_command(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Run {
            source,
            contract,
            plan,
            out,
            estimator,
        } => {
            let out = out.unwrap_or_else(|| settings.artifacts_dir.clone());
            handle_run(settings, source.source, &contract, &plan, &out, estimator.as_deref())
        }
        Commands::Validate {
            source,
            contract,
            plan,
        } => handle_validate(settings, source.source, &contract, &plan),
        Commands::Inspect { source, json } => handle_inspect(settings, source.source, json),
        Commands::Candidates {
            source,
            contract,
            json,
        } => handle_candidates(settings, source.source, &contract, json),
        Commands::Verify { receipt } => handle_verify(&receipt),
        Commands::Predict {
            bundle,
            request,
            feature_map,
        } => handle_predict(&bundle, &request, feature_map.as_deref()),
    }
}

fn source_spec(settings: &Settings, source: Option<PathBuf>) -> SourceSpec {
    SourceSpec::from_path(source.unwrap_or_else(|| settings.raw_data_dir.clone()))
}

fn load_source(settings: &Settings, source: Option<PathBuf>) -> Result<(PathBuf, polars::prelude::DataFrame)> {
    let path = resolve_source(&source_spec(settings, source))?;
    let df = load_df(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    Ok((path, df))
}

fn handle_run(
    settings: &Settings,
    source: Option<PathBuf>,
    contract_path: &Path,
    plan_path: &Path,
    out_dir: &Path,
    estimator_path: Option<&Path>,
) -> Result<()> {
    let contract = SchemaContract::from_file(contract_path)?;
    let plan = RunPlan::from_file(plan_path)?;
    let target = contract.target_name.clone();
    let pipeline = Pipeline::new(contract, plan)?.with_missing_top_n(settings.missing_top_n);

    println!("Running plan '{}'...", pipeline.plan().name);
    let outcome = match pipeline.run(IngestSource::Path(source_spec(settings, source))) {
        Ok(outcome) => outcome,
        Err(failure) => {
            fs::create_dir_all(out_dir)?;
            let trail_path = out_dir.join("audit_trail.json");
            write_trail(&failure.trail, &trail_path)?;
            println!("Partial audit trail written to {}", trail_path.display());
            anyhow::bail!("{}", failure.summary());
        }
    };

    let written = export_run(&outcome, out_dir, settings.write_receipts)?;
    for path in &written {
        println!("  wrote {}", path.display());
    }

    if let Some(estimator_path) = estimator_path {
        let content = fs::read_to_string(estimator_path)
            .with_context(|| format!("Failed to read estimator {}", estimator_path.display()))?;
        let spec: EstimatorSpec = serde_json::from_str(&content).context("Failed to parse estimator JSON")?;
        let representation = outcome.representation()?;
        let expected = load_estimator(&spec)?.n_features();
        if expected != representation.feature_names.len() {
            anyhow::bail!(
                "Estimator expects {expected} features, the run produced {}",
                representation.feature_names.len()
            );
        }
        let target = target.context("Contract declares no target; cannot bundle an estimator")?;
        let bundle_path = out_dir.join("model_bundle.json");
        let (receipt_path, _) = ModelBundle::new(representation, target, spec).save(&bundle_path)?;
        println!("  wrote {}", bundle_path.display());
        println!("  wrote {}", receipt_path.display());
    }

    println!("{}", outcome.summary());
    Ok(())
}

fn handle_validate(
    settings: &Settings,
    source: Option<PathBuf>,
    contract_path: &Path,
    plan_path: &Path,
) -> Result<()> {
    let contract = SchemaContract::from_file(contract_path)?;
    let plan = RunPlan::from_file(plan_path)?;

    let errors = if source.is_some() {
        let (path, df) = load_source(settings, source)?;
        println!("Checking against columns of {}", path.display());
        let schema: &Schema = &df.schema();
        validate_plan(&plan, &contract, Some(schema))
    } else {
        validate_plan(&plan, &contract, None)
    };

    if errors.is_empty() {
        println!("Plan '{}' is valid for contract '{}'.", plan.name, contract.name);
        return Ok(());
    }
    for error in &errors {
        println!("  - {error}");
    }
    anyhow::bail!("{} problem(s) found in plan '{}'", errors.len(), plan.name)
}

fn handle_inspect(settings: &Settings, source: Option<PathBuf>, json: bool) -> Result<()> {
    let (path, df) = load_source(settings, source)?;
    let report = diagnose(path.display().to_string(), &df, settings.missing_top_n);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Source: {}", report.source);
    println!(
        "Shape: {} rows x {} columns (~{})",
        report.snapshot.row_count,
        report.snapshot.column_count,
        format_bytes(report.snapshot.memory_estimate)
    );
    println!("Types:");
    for dtype in &report.dtypes {
        println!("  {:<12} {}", dtype.dtype, dtype.columns);
    }
    println!(
        "Missing: {} of {} cells ({:.2}%), {} column(s) affected",
        report.missing.missing_cells,
        report.missing.total_cells,
        report.missing.global_missing_pct,
        report.missing.columns_with_missing
    );
    for column in &report.missing.top_columns {
        println!(
            "  {:<24} {:>8} ({:.2}%) {:?}",
            column.column, column.missing_count, column.missing_pct, column.severity
        );
    }
    Ok(())
}

fn handle_candidates(settings: &Settings, source: Option<PathBuf>, contract_path: &Path, json: bool) -> Result<()> {
    let contract = SchemaContract::from_file(contract_path)?;
    let (_, df) = load_source(settings, source)?;

    let mut exclude = contract.id_columns.clone();
    exclude.extend(contract.target_name.iter().cloned());
    let report = discover_candidates(&df, &exclude, &settings.candidates)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} candidate(s) among {} analyzed column(s)",
        report.candidates.len(),
        report.analyzed_columns
    );
    for candidate in &report.candidates {
        let signals = candidate
            .signals
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:<24} {:<8} {:>4} distinct ({:.2}%) [{signals}] e.g. {}",
            candidate.column,
            candidate.dtype,
            candidate.distinct_count,
            candidate.distinct_pct,
            candidate.samples.join(" | ")
        );
    }
    if !report.binary_like.is_empty() {
        println!("Binary-like: {}", report.binary_like.join(", "));
    }
    if !report.service_phrase_like.is_empty() {
        println!("Service phrases: {}", report.service_phrase_like.join(", "));
    }
    Ok(())
}

fn handle_verify(receipt: &Path) -> Result<()> {
    let result = verify_receipt(receipt)?;
    println!("{}", result.format_cli());
    if !result.passed {
        anyhow::bail!("Integrity verification failed for {}", result.file_path);
    }
    Ok(())
}

fn handle_predict(bundle: &Path, request: &Path, feature_map: Option<&Path>) -> Result<()> {
    let mut predictor = Predictor::load(bundle)?;
    if let Some(map_path) = feature_map {
        predictor = predictor.with_feature_map(FeatureMap::from_file(map_path)?);
    }

    let body = fs::read_to_string(request)
        .with_context(|| format!("Failed to read request {}", request.display()))?;
    let outcome = PredictRequest::from_json(&body).and_then(|req| predictor.predict(&req));
    match outcome {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(error) => {
            println!("{}", serde_json::to_string_pretty(&error)?);
            anyhow::bail!("{} ({}): {}", error.kind.as_str(), error.kind.http_status(), error.message)
        }
    }
}
