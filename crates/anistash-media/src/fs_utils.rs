//! Filesystem helpers for download destinations.

use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Free bytes available to unprivileged users on the filesystem holding `path`.
pub fn available_space(path: impl AsRef<Path>) -> MediaResult<u64> {
    let stat = nix::sys::statvfs::statvfs(path.as_ref())
        .map_err(|e| MediaError::Io(std::io::Error::from(e)))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Remove a partially written output. Missing files are fine.
pub async fn remove_partial(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

/// Size of `path`, or an error when it is missing or empty.
pub async fn ensure_non_empty(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        _ => Err(MediaError::EmptyOutput(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_available_space_of_tempdir() {
        let dir = TempDir::new().unwrap();
        assert!(available_space(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_available_space_missing_path() {
        tokio_test::assert_err!(available_space("/definitely/not/here"));
    }

    #[tokio::test]
    async fn test_remove_partial() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("partial.mp4");
        fs::write(&file, b"half").await.unwrap();

        remove_partial(&file).await;
        assert!(!file.exists());

        // Second call is a no-op
        remove_partial(&file).await;
    }

    #[tokio::test]
    async fn test_ensure_non_empty() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("out.mp4");

        assert!(matches!(
            ensure_non_empty(&file).await,
            Err(MediaError::EmptyOutput(_))
        ));

        fs::write(&file, b"").await.unwrap();
        tokio_test::assert_err!(ensure_non_empty(&file).await);

        fs::write(&file, b"data").await.unwrap();
        assert_eq!(ensure_non_empty(&file).await.unwrap(), 4);
    }
}
