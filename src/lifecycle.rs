//! Stage lifecycle: the payload, the audit trail and the stage executors.
//!
//! Stages run in a fixed order (see [`Stage`]). Each one receives the
//! previous [`Payload`], diagnoses the data, applies only its declared
//! decision within the scope it is allowed to touch, and returns a new payload
//! with one more entry in the [`AuditTrail`].
//!
//! ```text
//! Ingestion → Typing → ContractEnforcement → Standardization
//!   → TargetAudit → Imputation → Split → Representation
//! ```

pub mod audit;
pub mod payload;
pub mod stages;

pub use audit::{
    AuditRecord, AuditTrail, ColumnChange, ExcludedColumn, ExclusionReason, StageReport,
    TrailEntry, ValueChange,
};
pub use payload::Payload;
pub use stages::{Stage, StageExecutor};
