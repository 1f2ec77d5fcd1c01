//! Ingestion stage - load the raw source and diagnose it (read-only)

use super::{Stage, StageExecutor};
use crate::dataset::profile::DEFAULT_MISSING_TOP_N;
use crate::dataset::{
    DtypeCount, MissingSummary, Snapshot, SourceSpec, dtype_summary, load_df, missing_summary,
    resolve_source,
};
use crate::error::Result;
use crate::lifecycle::audit::StageReport;
use crate::lifecycle::payload::Payload;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Where ingestion reads from.
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// Resolve and load a raw file
    Path(SourceSpec),
    /// Use an already loaded frame
    Frame { label: String, df: DataFrame },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Resolved file path, or the label of an in-memory frame
    pub source: String,
    pub snapshot: Snapshot,
    pub missing: MissingSummary,
    pub dtypes: Vec<DtypeCount>,
}

/// Structural and quality diagnostics of a loaded frame.
pub fn diagnose(source: impl Into<String>, df: &DataFrame, missing_top_n: usize) -> IngestionReport {
    IngestionReport {
        source: source.into(),
        snapshot: Snapshot::capture(df),
        missing: missing_summary(df, missing_top_n),
        dtypes: dtype_summary(df),
    }
}

pub struct IngestionStage {
    source: IngestSource,
    missing_top_n: usize,
}

impl IngestionStage {
    pub fn new(source: IngestSource) -> Self {
        Self {
            source,
            missing_top_n: DEFAULT_MISSING_TOP_N,
        }
    }

    pub fn with_missing_top_n(mut self, top_n: usize) -> Self {
        self.missing_top_n = top_n;
        self
    }
}

impl StageExecutor for IngestionStage {
    fn stage(&self) -> Stage {
        Stage::Ingestion
    }

    fn description(&self) -> String {
        match &self.source {
            IngestSource::Path(spec) => format!("Load and diagnose raw source {spec:?}"),
            IngestSource::Frame { label, .. } => format!("Diagnose in-memory frame '{label}'"),
        }
    }

    fn execute(&self, payload: &Payload) -> Result<Payload> {
        payload.ensure_ready_for(Stage::Ingestion)?;

        let (label, df) = match &self.source {
            IngestSource::Path(spec) => {
                let path = resolve_source(spec)?;
                let df = load_df(&path)?;
                (path.display().to_string(), df)
            }
            IngestSource::Frame { label, df } => (label.clone(), df.clone()),
        };

        let report = diagnose(label, &df, self.missing_top_n);
        tracing::info!(
            source = %report.source,
            shape = %report.snapshot.describe(),
            missing_pct = report.missing.global_missing_pct,
            "ingested raw dataset"
        );

        Ok(payload.advance(Stage::Ingestion, df, StageReport::Ingestion(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_frame() -> anyhow::Result<()> {
        let df = df! {
            "tenure" => &[Some(1i64), None, Some(3)],
            "contract" => &["Month-to-month", "One year", "Two year"],
        }?;
        let stage = IngestionStage::new(IngestSource::Frame {
            label: "inline".to_owned(),
            df: df.clone(),
        });
        let payload = stage.execute(&Payload::start())?;

        assert_eq!(payload.last_stage(), Some(Stage::Ingestion));
        assert!(payload.dataset().equals_missing(&df));
        let Some(StageReport::Ingestion(report)) = payload.trail().report_for(Stage::Ingestion)
        else {
            anyhow::bail!("missing ingestion report");
        };
        assert_eq!(report.snapshot.row_count, 3);
        assert_eq!(report.missing.missing_cells, 1);
        assert!(payload.trail().last_record().is_none());
        Ok(())
    }

    #[test]
    fn test_ingest_twice_is_rejected() -> anyhow::Result<()> {
        let stage = IngestionStage::new(IngestSource::Frame {
            label: "inline".to_owned(),
            df: df! { "a" => &[1i64] }?,
        });
        let payload = stage.execute(&Payload::start())?;
        assert!(stage.execute(&payload).is_err());
        Ok(())
    }
}
