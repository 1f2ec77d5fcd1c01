//! Application settings.
//!
//! Settings describe the environment a run happens in: where raw data and
//! artifacts live, candidate discovery thresholds, and where logs go. They
//! never hold stage decisions, which live in the run plan and have no
//! defaults.

use crate::error::{Result, ResultExt as _};
use crate::lifecycle::stages::candidates::CandidateThresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory searched when a run names no explicit source file
    pub raw_data_dir: PathBuf,
    /// Where `run` writes matrices, the audit trail and bundles
    pub artifacts_dir: PathBuf,
    pub candidates: CandidateThresholds,
    /// Overrides the platform log directory
    pub log_dir: Option<PathBuf>,
    /// Columns listed in the ingestion missing-value summary
    pub missing_top_n: usize,
    /// Write a `.receipt.json` beside every artifact
    pub write_receipts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from("data/raw"),
            artifacts_dir: PathBuf::from("artifacts"),
            candidates: CandidateThresholds::default(),
            log_dir: None,
            missing_top_n: crate::dataset::profile::DEFAULT_MISSING_TOP_N,
            write_receipts: true,
        }
    }
}

/// `<config dir>/churnprep/settings.yaml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("churnprep").join("settings.yaml"))
}

impl Settings {
    /// Parse settings, choosing JSON or YAML by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }

    /// Load from `path`, or from the default location when it exists.
    /// A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_settings_path() {
            Some(default) if default.exists() => Self::from_file(&default),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let content = if is_json {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings {}", path.display()))
    }
}
