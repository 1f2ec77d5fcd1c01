//! Streaming SHA-256 over files and readers.

use crate::error::{Result, ResultExt as _};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read buffer for hashing (8 KB).
const BUFFER_SIZE: usize = 8192;

/// Hash algorithm identifier used in receipts.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// SHA-256 of everything `reader` yields, as lowercase hex.
///
/// Memory use is one fixed buffer regardless of input size.
pub fn hash_reader(mut reader: impl Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a file (64 hex characters).
///
/// ```no_run
/// use churnprep::integrity::compute_file_hash;
/// use std::path::Path;
///
/// let hash = compute_file_hash(Path::new("artifacts/model_bundle.json"))?;
/// assert_eq!(hash.len(), 64);
/// # Ok::<(), churnprep::error::PipelineError>(())
/// ```
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    hash_reader(BufReader::with_capacity(BUFFER_SIZE, file))
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_digests() -> anyhow::Result<()> {
        assert_eq!(
            hash_reader(&b""[..])?,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_reader(&b"hello world"[..])?,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        Ok(())
    }

    #[test]
    fn test_file_hash_streams_past_buffer() -> anyhow::Result<()> {
        let data = vec![7u8; BUFFER_SIZE * 3 + 100];
        let mut file = NamedTempFile::new()?;
        file.write_all(&data)?;
        file.flush()?;

        assert_eq!(compute_file_hash(file.path())?, hash_reader(data.as_slice())?);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(compute_file_hash(Path::new("/nonexistent/bundle.json")).is_err());
    }

    #[test]
    fn test_content_changes_hash() -> anyhow::Result<()> {
        assert_ne!(hash_reader(&b"content A"[..])?, hash_reader(&b"content B"[..])?);
        Ok(())
    }
}
