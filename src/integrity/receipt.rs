//! Integrity receipt data structures and creation.

use super::hasher::{HASH_ALGORITHM, compute_file_hash};
use crate::error::{Result, ResultExt as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current receipt schema version.
pub const RECEIPT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReceipt {
    pub receipt_version: u32,
    pub created_utc: DateTime<Utc>,
    pub producer: ProducerInfo,
    pub artifact: ArtifactInfo,
    pub integrity: IntegrityInfo,
}

/// Application that wrote a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub app_name: String,
    pub app_version: String,
    /// `std::env::consts::OS` of the producing machine
    pub platform: String,
}

impl ProducerInfo {
    /// This build of the crate.
    pub fn current() -> Self {
        Self {
            app_name: env!("CARGO_PKG_NAME").to_owned(),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            platform: std::env::consts::OS.to_owned(),
        }
    }
}

/// What a run wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ModelBundle,
    FeatureMatrix,
    TargetVector,
    AuditTrail,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelBundle => "model_bundle",
            Self::FeatureMatrix => "feature_matrix",
            Self::TargetVector => "target_vector",
            Self::AuditTrail => "audit_trail",
        }
    }
}

/// Row and column counts, where the artifact has them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactShape {
    pub rows: Option<usize>,
    pub columns: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// File name, resolved relative to the receipt on verification
    pub filename: String,
    pub kind: ArtifactKind,
    /// Lowercase file extension
    pub format: String,
    pub file_size_bytes: u64,
    pub shape: ArtifactShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityInfo {
    pub hash_algorithm: String,
    /// Lowercase hex digest
    pub hash: String,
}

/// Build a receipt for a file that has already been written.
pub fn create_receipt(
    file_path: &Path,
    kind: ArtifactKind,
    shape: Option<ArtifactShape>,
) -> Result<IntegrityReceipt> {
    let hash = compute_file_hash(file_path)?;
    let file_size_bytes = fs::metadata(file_path)
        .with_context(|| format!("Failed to read file metadata: {}", file_path.display()))?
        .len();

    let filename = file_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_owned();
    let format = file_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_lowercase();

    tracing::debug!(file = %file_path.display(), kind = kind.as_str(), %hash, "receipt created");
    Ok(IntegrityReceipt {
        receipt_version: RECEIPT_VERSION,
        created_utc: Utc::now(),
        producer: ProducerInfo::current(),
        artifact: ArtifactInfo {
            filename,
            kind,
            format,
            file_size_bytes,
            shape: shape.unwrap_or_default(),
        },
        integrity: IntegrityInfo {
            hash_algorithm: HASH_ALGORITHM.to_owned(),
            hash,
        },
    })
}

/// `<file>.<ext>.receipt.json` next to the artifact.
pub fn receipt_path_for(artifact_path: &Path) -> PathBuf {
    artifact_path.with_extension(format!(
        "{}.receipt.json",
        artifact_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
    ))
}

/// Write the receipt beside the artifact and return its path.
pub fn save_receipt(receipt: &IntegrityReceipt, artifact_path: &Path) -> Result<PathBuf> {
    let receipt_path = receipt_path_for(artifact_path);
    let json = serde_json::to_string_pretty(receipt).context("Failed to serialize receipt")?;
    fs::write(&receipt_path, json)
        .with_context(|| format!("Failed to write receipt to {}", receipt_path.display()))?;
    Ok(receipt_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_create_receipt_records_file_and_shape() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("x_train.csv");
        fs::write(&path, b"num__tenure\n0.5\n")?;

        let shape = ArtifactShape {
            rows: Some(1),
            columns: Some(1),
        };
        let receipt = create_receipt(&path, ArtifactKind::FeatureMatrix, Some(shape))?;

        assert_eq!(receipt.receipt_version, RECEIPT_VERSION);
        assert_eq!(receipt.producer.app_name, "churnprep");
        assert_eq!(receipt.artifact.filename, "x_train.csv");
        assert_eq!(receipt.artifact.format, "csv");
        assert_eq!(receipt.artifact.file_size_bytes, 16);
        assert_eq!(receipt.artifact.shape, shape);
        assert_eq!(receipt.integrity.hash_algorithm, "SHA-256");
        assert_eq!(receipt.integrity.hash.len(), 64);
        Ok(())
    }

    #[test]
    fn test_save_receipt_beside_artifact() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("model_bundle.json");
        fs::write(&path, b"{}")?;

        let receipt = create_receipt(&path, ArtifactKind::ModelBundle, None)?;
        let receipt_path = save_receipt(&receipt, &path)?;

        assert_eq!(receipt_path, dir.path().join("model_bundle.json.receipt.json"));
        let loaded: IntegrityReceipt = serde_json::from_str(&fs::read_to_string(&receipt_path)?)?;
        assert_eq!(loaded, receipt);
        Ok(())
    }
}
