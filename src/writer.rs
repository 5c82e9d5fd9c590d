//! Atomic file replacement.
//!
//! Content goes to `<name>.tmp` next to the target, is synced to disk, and is
//! then renamed over the target, so readers never observe a half-written file.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::trace;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| OsString::from("output"), ToOwned::to_owned);
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `content` to `path`, replacing any existing file.
///
/// # Errors
///
/// Returns an IO error naming the path that failed.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = temp_path(path);
    let mut temp_file = fs::File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;

    temp_file
        .write_all(content)
        .map_err(|e| Error::io(&temp_path, e))?;

    // Ensure data is flushed to disk
    temp_file
        .sync_all()
        .map_err(|e| Error::io(&temp_path, e))?;

    drop(temp_file);

    fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;

    trace!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Async counterpart of [`write_atomic`], used while a run is in progress.
///
/// # Errors
///
/// Returns the underlying IO error.
pub(crate) async fn write_atomic_async(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path(path);
    let mut temp_file = tokio::fs::File::create(&temp_path).await?;
    temp_file.write_all(content).await?;
    temp_file.sync_all().await?;
    drop(temp_file);

    tokio::fs::rename(&temp_path, path).await?;

    trace!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_write_replaces_existing_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("store.json");
        target.write_str("old").unwrap();

        write_atomic(target.path(), b"new").unwrap();

        target.assert("new");
        assert!(!temp.child("store.json.tmp").exists());
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        assert_eq!(temp_path(Path::new("/o/a.md")), PathBuf::from("/o/a.md.tmp"));
    }

    #[tokio::test]
    async fn test_async_write() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("out.md");

        write_atomic_async(target.path(), b"# Title").await.unwrap();

        target.assert("# Title");
    }

    #[test]
    fn test_missing_parent_is_reported() {
        let temp = assert_fs::TempDir::new().unwrap();
        let err = write_atomic(&temp.path().join("missing/file.json"), b"x").unwrap_err();
        assert!(err.is_io());
    }
}
