//! Safe file replacement (spec.md §4.6), grounded on `transcode.py`'s
//! replace-in-place dance: stage the new encode as a sibling `.part` file,
//! rename the original aside to `.bak`, rename `.part` into the original's
//! name, then drop the `.bak` — so a crash at any point leaves either the
//! original or the finished encode in place under the real filename, never
//! a half-written file.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{Error, Result};

/// Suffix for the marker file dropped next to a file while its replacement
/// is in flight, so a crashed master/worker pair can tell on restart that a
/// transfer never finished (spec.md §6.3 "Filesystem layout").
const IN_PROGRESS_SUFFIX: &str = ".av1.inprogress";

pub struct Transfer {
    /// Whether to copy the original file's mode bits onto the replacement
    /// (spec.md §6.4 `preserve_mode`); skipped on platforms/filesystems
    /// where `chmod` is meaningless.
    pub preserve_mode: bool,
}

impl Transfer {
    pub fn new(preserve_mode: bool) -> Self {
        Self { preserve_mode }
    }

    fn marker_path(original: &Path) -> PathBuf {
        let mut name = original.as_os_str().to_owned();
        name.push(IN_PROGRESS_SUFFIX);
        PathBuf::from(name)
    }

    fn part_path(original: &Path) -> PathBuf {
        let mut name = original.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }

    fn bak_path(original: &Path) -> PathBuf {
        let mut name = original.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Drops the `.inprogress` marker next to `original` while a file sits
    /// in `processing`, so an external tool walking the library knows to
    /// leave it alone (spec.md §6.2 "Filesystem layout": "may exist...for
    /// external observers to skip the file").
    pub async fn mark_in_progress(&self, original: &Path) -> Result<()> {
        fs::write(Self::marker_path(original), b"").await?;
        Ok(())
    }

    /// Best-effort removal of the `.inprogress` marker on completion,
    /// failure, skip, or reset — whatever path a file leaves `processing`
    /// by. A no-op if the marker was never created or already cleared.
    pub async fn clear_in_progress(&self, original: &Path) {
        fs::remove_file(Self::marker_path(original)).await.ok();
    }

    /// Writes `bytes` to a `.part` sibling of `original`, then performs the
    /// `.bak`-swap replacement, and finally clears the in-progress marker.
    /// On any failure before the swap completes, `original` is left
    /// untouched; `rollback` restores it if the swap itself partially ran.
    pub async fn commit_replacement(&self, original: &Path, bytes: &[u8]) -> Result<()> {
        let part = Self::part_path(original);
        let bak = Self::bak_path(original);

        fs::write(&part, bytes).await?;

        if self.preserve_mode {
            if let Ok(metadata) = fs::metadata(original).await {
                let _ = fs::set_permissions(&part, metadata.permissions()).await;
            }
        }

        let original_existed = fs::metadata(original).await.is_ok();
        if original_existed {
            fs::rename(original, &bak).await?;
        }

        if let Err(err) = fs::rename(&part, original).await {
            // Swap failed after the original moved aside: put it back so the
            // library never ends up missing a file.
            if original_existed {
                let _ = fs::rename(&bak, original).await;
            }
            return Err(Error::Io(err));
        }

        if original_existed {
            fs::remove_file(&bak).await.ok();
        }
        fs::remove_file(Self::marker_path(original)).await.ok();
        Ok(())
    }

    /// True if a marker file is present, meaning a previous transfer for
    /// this path never completed and should be retried or investigated
    /// before the file is handed out again.
    pub async fn has_stale_marker(&self, original: &Path) -> bool {
        fs::metadata(Self::marker_path(original)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn commit_replacement_swaps_contents_and_clears_marker() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        fs::write(&original, b"old bytes").await.unwrap();

        let transfer = Transfer::new(false);
        fs::write(Transfer::marker_path(&original), b"").await.unwrap();
        transfer.commit_replacement(&original, b"new bytes").await.unwrap();

        let contents = fs::read(&original).await.unwrap();
        assert_eq!(contents, b"new bytes");
        assert!(!transfer.has_stale_marker(&original).await);
        assert!(fs::metadata(Transfer::bak_path(&original)).await.is_err());
    }

    #[tokio::test]
    async fn commit_replacement_works_when_original_is_missing() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("new-file.mkv");
        let transfer = Transfer::new(false);
        transfer.commit_replacement(&original, b"content").await.unwrap();
        assert_eq!(fs::read(&original).await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn mark_and_clear_in_progress_round_trips() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let transfer = Transfer::new(false);

        assert!(!transfer.has_stale_marker(&original).await);
        transfer.mark_in_progress(&original).await.unwrap();
        assert!(transfer.has_stale_marker(&original).await);
        transfer.clear_in_progress(&original).await;
        assert!(!transfer.has_stale_marker(&original).await);
    }

    #[tokio::test]
    async fn clearing_a_never_set_marker_is_a_no_op() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let transfer = Transfer::new(false);
        transfer.clear_in_progress(&original).await;
    }
}
