//! Run plans and the orchestrator that executes them.
//!
//! A [`RunPlan`] captures every stage decision of one run in a single YAML or
//! JSON document. [`Pipeline`] validates the plan against a schema contract
//! and then runs the eight stages in order, stopping at the first violated
//! invariant.
//!
//! # Example
//!
//! ```no_run
//! use churnprep::contract::SchemaContract;
//! use churnprep::dataset::SourceSpec;
//! use churnprep::lifecycle::stages::ingest::IngestSource;
//! use churnprep::pipeline::{Pipeline, RunPlan};
//!
//! let contract = SchemaContract::from_file("contract.yaml")?;
//! let plan = RunPlan::from_file("plan.yaml")?;
//! let pipeline = Pipeline::new(contract, plan)?;
//!
//! let outcome = pipeline.run(IngestSource::Path(SourceSpec::from_path("data/raw")))?;
//! println!("{}", outcome.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Target gate
//!
//! The target audit never blocks on its own. The plan's `target_gate` policy
//! decides whether a `warning` or `error` status stops the run before
//! imputation.

pub mod executor;
pub mod spec;
pub mod validation;

pub use executor::{Pipeline, PipelineFailure, PipelineOutcome};
pub use spec::{PLAN_VERSION, RunPlan, TargetGatePolicy};
pub use validation::{ValidationError, validate_plan};
