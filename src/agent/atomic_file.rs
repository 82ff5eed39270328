//! Write-then-rename file persistence shared by the checkpoint and settings-copy paths
//! (§6 "Persisted files"): write to a randomly-named temp file in the same directory,
//! rename it over the real path, then sweep any stragglers a crash mid-write left behind.
//! Never write a persisted file in place.

use crate::error::Result;
use std::path::Path;

/// Atomically replace the contents of `path` with `contents`.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let stem = path.file_name().and_then(|n| n.to_str()).unwrap_or("data");
    let tmp_path = dir.join(format!(".{stem}.tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    sweep_stragglers(dir, stem).await
}

/// Delete any leftover `.{stem}.tmp-*` files in `dir` left by a crash between a previous
/// write and its rename.
async fn sweep_stragglers(dir: &Path, stem: &str) -> Result<()> {
    let prefix = format!(".{stem}.tmp-");
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_str().is_some_and(|name| name.starts_with(&prefix)) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}

/// Read `path`'s contents, returning `Ok(None)` if it does not exist.
pub async fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_read_back_and_leave_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        write_atomic(&path, "hello").await.unwrap();
        assert_eq!(read_if_exists(&path).await.unwrap(), Some("hello".to_string()));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().unwrap().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn sweeps_straggler_temp_files_on_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        tokio::fs::write(dir.path().join(".data.txt.tmp-leftover"), "stale").await.unwrap();
        write_atomic(&path, "fresh").await.unwrap();
        assert!(!dir.path().join(".data.txt.tmp-leftover").exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_if_exists(&dir.path().join("absent.txt")).await.unwrap(), None);
    }
}
