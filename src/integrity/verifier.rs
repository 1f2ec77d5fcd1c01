//! Receipt verification: recompute the artifact hash and compare.

use super::hasher::compute_file_hash;
use super::receipt::IntegrityReceipt;
use crate::error::{PipelineError, Result, ResultExt as _};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Outcome of one verification, for display and auditing.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub message: String,
    /// Artifact path that was checked
    pub file_path: String,
    pub expected_hash: String,
    /// `None` when the artifact could not be read
    pub actual_hash: Option<String>,
    pub receipt: IntegrityReceipt,
}

impl VerificationResult {
    fn pass(file_path: String, hash: String, receipt: IntegrityReceipt) -> Self {
        Self {
            passed: true,
            message: "Artifact integrity verified".to_owned(),
            file_path,
            expected_hash: hash.clone(),
            actual_hash: Some(hash),
            receipt,
        }
    }

    fn fail(file_path: String, actual: Option<String>, reason: String, receipt: IntegrityReceipt) -> Self {
        Self {
            passed: false,
            message: reason,
            file_path,
            expected_hash: receipt.integrity.hash.clone(),
            actual_hash: actual,
            receipt,
        }
    }

    /// Multi-line report for the terminal.
    pub fn format_cli(&self) -> String {
        if self.passed {
            let short: String = self.expected_hash.chars().take(16).collect();
            format!(
                "PASS: {}\n  File: {}\n  Kind: {}\n  Hash: {short}... ({})\n  Created: {}",
                self.message,
                self.file_path,
                self.receipt.artifact.kind.as_str(),
                self.receipt.integrity.hash_algorithm,
                self.receipt.created_utc.format("%Y-%m-%d %H:%M:%S UTC")
            )
        } else {
            let mut output = format!(
                "FAIL: {}\n  File: {}\n  Expected: {}\n",
                self.message, self.file_path, self.expected_hash
            );
            if let Some(actual) = &self.actual_hash {
                output.push_str(&format!("  Actual:   {actual}\n"));
            }
            output.push_str("  The artifact may have been modified or corrupted");
            output
        }
    }
}

/// Verify the artifact a `.receipt.json` file describes.
///
/// A missing artifact or a hash mismatch is a failed result, not an error.
/// Errors are reserved for an unreadable or malformed receipt.
pub fn verify_receipt(receipt_path: &Path) -> Result<VerificationResult> {
    let receipt_json = fs::read_to_string(receipt_path)
        .with_context(|| format!("Failed to read receipt file: {}", receipt_path.display()))?;
    let receipt: IntegrityReceipt = serde_json::from_str(&receipt_json)
        .context("Failed to parse receipt JSON (file may be corrupted)")?;

    let receipt_dir = receipt_path.parent().ok_or_else(|| {
        PipelineError::Config(format!(
            "receipt path has no parent directory: {}",
            receipt_path.display()
        ))
    })?;
    let data_path = receipt_dir.join(&receipt.artifact.filename);
    let shown = data_path.display().to_string();

    if !data_path.exists() {
        let reason = format!(
            "Artifact not found: {}. It may have been moved or deleted.",
            receipt.artifact.filename
        );
        tracing::warn!(file = %shown, "{reason}");
        return Ok(VerificationResult::fail(shown, None, reason, receipt));
    }

    let actual_hash = match compute_file_hash(&data_path) {
        Ok(hash) => hash,
        Err(e) => {
            return Ok(VerificationResult::fail(
                shown,
                None,
                format!("Failed to compute hash: {e}"),
                receipt,
            ));
        }
    };

    if actual_hash == receipt.integrity.hash {
        tracing::info!(file = %shown, "artifact integrity verified");
        Ok(VerificationResult::pass(shown, actual_hash, receipt))
    } else {
        tracing::warn!(file = %shown, expected = %receipt.integrity.hash, actual = %actual_hash, "hash mismatch");
        Ok(VerificationResult::fail(
            shown,
            Some(actual_hash),
            "Hash mismatch detected".to_owned(),
            receipt,
        ))
    }
}
