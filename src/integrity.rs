//! Integrity receipts for persisted run artifacts.
//!
//! Every file written by a run (model bundle, encoded matrices, audit trail)
//! can carry a `<file>.<ext>.receipt.json` next to it. The receipt records
//! who produced the file, what it holds, and a SHA-256 hash computed by
//! streaming the file. [`verify_receipt`] recomputes the hash later.
//!
//! ```no_run
//! use churnprep::integrity::{self, ArtifactKind, ArtifactShape};
//! use std::path::Path;
//!
//! # fn example() -> churnprep::error::Result<()> {
//! let bundle = Path::new("artifacts/model_bundle.json");
//! let shape = ArtifactShape { rows: None, columns: Some(12) };
//! let receipt = integrity::create_receipt(bundle, ArtifactKind::ModelBundle, Some(shape))?;
//! let receipt_path = integrity::save_receipt(&receipt, bundle)?;
//!
//! let result = integrity::verify_receipt(&receipt_path)?;
//! assert!(result.passed);
//! # Ok(())
//! # }
//! ```
//!
//! Receipt layout:
//!
//! ```json
//! {
//!   "receipt_version": 1,
//!   "created_utc": "2026-01-24T12:34:56.789Z",
//!   "producer": { "app_name": "churnprep", "app_version": "0.1.0", "platform": "linux" },
//!   "artifact": {
//!     "filename": "model_bundle.json",
//!     "kind": "model_bundle",
//!     "format": "json",
//!     "file_size_bytes": 5120,
//!     "shape": { "rows": null, "columns": 12 }
//!   },
//!   "integrity": { "hash_algorithm": "SHA-256", "hash": "a3b2c1d4..." }
//! }
//! ```
//!
//! The hash is byte-sensitive: converting line endings or re-serializing a
//! bundle fails verification. The data file is looked up next to the receipt.

pub mod hasher;
pub mod receipt;
pub mod verifier;

pub use hasher::{HASH_ALGORITHM, compute_file_hash, hash_reader};
pub use receipt::{
    ArtifactInfo, ArtifactKind, ArtifactShape, IntegrityInfo, IntegrityReceipt, ProducerInfo,
    create_receipt, receipt_path_for, save_receipt,
};
pub use verifier::{VerificationResult, verify_receipt};
