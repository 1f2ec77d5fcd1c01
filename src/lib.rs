//! # churnprep
//!
//! Staged, auditable and leakage-safe preparation of tabular churn data.
//!
//! A run takes one raw file, a [`contract::SchemaContract`] naming the
//! features and target an inference boundary accepts, and a
//! [`pipeline::RunPlan`] holding every stage decision. It produces train and
//! test matrices, encoded targets, a fitted transformer and one audit record
//! per stage.
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
//! match pipeline.run(IngestSource::Path(SourceSpec::from_path("data/raw"))) {
//!     Ok(outcome) => println!("{}", outcome.summary()),
//!     Err(failure) => eprintln!("{}", failure.summary()),
//! }
//! # Ok::<(), churnprep::error::PipelineError>(())
//! ```
//!
//! ## Modules
//!
//! - [`dataset`]: source resolution, loading, snapshots and quality profiles
//! - [`contract`]: the schema contract and the scope derived from it
//! - [`lifecycle`]: the payload, audit trail and the eight stage executors
//! - [`representation`]: train-only fitted scalers, encoders and target mapping
//! - [`pipeline`]: run plans, plan validation and the orchestrator
//! - [`artifact`]: model bundles and exported run outputs
//! - [`integrity`]: SHA-256 receipts for every written artifact
//! - [`inference`]: the typed request/response boundary and feature mapping
//! - [`config`], [`logging`], [`error`], [`utils`]: ambient plumbing

#![warn(clippy::all, rust_2018_idioms)]

pub mod artifact;
pub mod config;
pub mod contract;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod integrity;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod representation;
pub mod utils;
