use crate::error::{PipelineError, Result, ResultExt as _};
use polars::prelude::*;
use std::fs;
use std::io::{BufRead as _, BufReader};
use std::path::{Path, PathBuf};

/// Extensions accepted as raw tabular sources.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["csv", "parquet"];

/// Where the raw dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// An explicit file
    File(PathBuf),
    /// A directory, optionally with the file name to pick inside it
    Directory { dir: PathBuf, name: Option<String> },
}

impl SourceSpec {
    /// A path pointing at a directory becomes a directory source, anything else a file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::Directory {
                dir: path,
                name: None,
            }
        } else {
            Self::File(path)
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Lists `.csv`/`.parquet` files in `dir`, sorted by name.
pub fn list_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::SourceNotFound(format!(
            "data directory does not exist: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && SUPPORTED_EXTENSIONS.contains(&extension_of(&path).as_str()) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Resolves a source to exactly one readable file.
pub fn resolve_source(source: &SourceSpec) -> Result<PathBuf> {
    let path = match source {
        SourceSpec::File(path) => path.clone(),
        SourceSpec::Directory {
            dir,
            name: Some(name),
        } => dir.join(name),
        SourceSpec::Directory { dir, name: None } => {
            let candidates = list_candidates(dir)?;
            match candidates.as_slice() {
                [] => {
                    return Err(PipelineError::SourceNotFound(format!(
                        "no .csv or .parquet file found in {}",
                        dir.display()
                    )));
                }
                [only] => only.clone(),
                many => {
                    let names: Vec<String> = many
                        .iter()
                        .filter_map(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                        .collect();
                    return Err(PipelineError::SourceNotFound(format!(
                        "{} candidate files in {}, name one explicitly: {}",
                        many.len(),
                        dir.display(),
                        names.join(", ")
                    )));
                }
            }
        }
    };

    if !path.is_file() {
        return Err(PipelineError::SourceNotFound(format!(
            "file not found: {}",
            path.display()
        )));
    }
    if !SUPPORTED_EXTENSIONS.contains(&extension_of(&path).as_str()) {
        return Err(PipelineError::SourceNotFound(format!(
            "unsupported file format: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Picks `;` when the header line has more semicolons than commas.
pub fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header)?;
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    Ok(if semicolons > commas { b';' } else { b',' })
}

/// Loads a resolved source file into memory.
pub fn load_df(path: &Path) -> Result<DataFrame> {
    let df = match extension_of(path).as_str() {
        "csv" => {
            let separator = detect_delimiter(path)?;
            LazyCsvReader::new(path)
                .with_infer_schema_length(Some(10000))
                .with_has_header(true)
                .with_separator(separator)
                .finish()?
                .collect()
                .context("Failed to read CSV")?
        }
        "parquet" => ParquetReader::new(fs::File::open(path)?)
            .finish()
            .context("Failed to read Parquet")?,
        ext => {
            return Err(PipelineError::SourceNotFound(format!(
                "unsupported file extension: {ext}"
            )));
        }
    };
    tracing::debug!(path = %path.display(), rows = df.height(), cols = df.width(), "loaded source");
    Ok(df)
}

/// Writes `df` as Parquet or CSV (with header), chosen by extension.
pub fn save_df(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if extension_of(path) == "parquet" {
        ParquetWriter::new(file)
            .finish(df)
            .context("Failed to write Parquet file")?;
    } else {
        CsvWriter::new(file)
            .include_header(true)
            .finish(df)
            .context("Failed to write CSV file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_candidate_is_inferred() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("churn.csv"), "a,b\n1,2\n")?;
        fs::write(dir.path().join("notes.txt"), "ignore me")?;

        let source = SourceSpec::Directory {
            dir: dir.path().to_path_buf(),
            name: None,
        };
        let path = resolve_source(&source)?;
        assert!(path.ends_with("churn.csv"));
        Ok(())
    }

    #[test]
    fn test_multiple_candidates_are_ambiguous() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.csv"), "x\n1\n")?;
        fs::write(dir.path().join("b.CSV"), "x\n1\n")?;

        let err = resolve_source(&SourceSpec::from_path(dir.path())).unwrap_err();
        assert_eq!(err.invariant(), "source-resolution");
        assert!(err.to_string().contains("a.csv"));
        Ok(())
    }

    #[test]
    fn test_named_candidate_in_ambiguous_directory() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.csv"), "x\n1\n")?;
        fs::write(dir.path().join("b.csv"), "x\n2\n")?;

        let source = SourceSpec::Directory {
            dir: dir.path().to_path_buf(),
            name: Some("b.csv".to_owned()),
        };
        assert!(resolve_source(&source)?.ends_with("b.csv"));
        Ok(())
    }

    #[test]
    fn test_empty_and_missing_directories() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(matches!(
            resolve_source(&SourceSpec::from_path(dir.path())),
            Err(PipelineError::SourceNotFound(_))
        ));
        assert!(matches!(
            resolve_source(&SourceSpec::File(dir.path().join("nope.csv"))),
            Err(PipelineError::SourceNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_semicolon_csv_loads() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("semi.csv");
        fs::write(&path, "id;amount\n1;2.5\n2;3.5\n")?;

        assert_eq!(detect_delimiter(&path)?, b';');
        let df = load_df(&path)?;
        assert_eq!(df.shape(), (2, 2));
        Ok(())
    }
}
