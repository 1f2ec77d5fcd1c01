//! Raw dataset access: source resolution, loading, snapshots and
//! read-only quality diagnostics.
//!
//! - [`io`]: resolve a raw source to exactly one file and load it
//! - [`snapshot`]: structural fingerprints captured around every stage
//! - [`profile`]: missing-value and dtype summaries
//! - [`values`]: column extraction helpers used by the stages

pub mod io;
pub mod profile;
pub mod snapshot;
pub mod values;

pub use io::{SourceSpec, load_df, resolve_source, save_df};
pub use profile::{DtypeCount, MissingSummary, Severity, dtype_summary, missing_summary};
pub use snapshot::{SchemaColumn, Snapshot, SnapshotDelta, TypeChange};
