//! Trash: deleted photos move here by default instead of being
//! unlinked. Moves fall back to copy+delete across filesystems.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TrashConfig;
use crate::error::Result;

pub struct TrashManager {
    config: TrashConfig,
}

impl TrashManager {
    pub fn new(config: TrashConfig) -> Self {
        Self { config }
    }

    fn ensure_trash_dir(&self) -> Result<()> {
        if !self.config.path.exists() {
            fs::create_dir_all(&self.config.path)
                .context("Failed to create trash directory")?;
        }
        Ok(())
    }

    /// Unique trash filename: original stem + timestamp + a process-wide
    /// counter, so concurrent deletes within one second cannot collide.
    fn generate_trash_name(&self, original: &Path) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let timestamp = chrono::Utc::now().timestamp();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let original_name = original
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let extension = original
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();

        let trash_name = format!("{original_name}_{timestamp}_{seq}{extension}");
        self.config.path.join(trash_name)
    }

    /// Move a file to trash, returning its new path.
    pub fn move_to_trash(&self, path: &Path) -> Result<PathBuf> {
        self.ensure_trash_dir()?;

        let trash_path = self.generate_trash_name(path);

        // Rename first (fastest, same filesystem), then copy+delete.
        match fs::rename(path, &trash_path) {
            Ok(_) => Ok(trash_path),
            Err(_) => {
                fs::copy(path, &trash_path).context("Failed to copy file to trash")?;
                fs::remove_file(path)
                    .context("Failed to remove original file after copying to trash")?;
                Ok(trash_path)
            }
        }
    }

    /// Restore a trashed file to its original location.
    pub fn restore(&self, trash_path: &Path, original_path: &Path) -> Result<()> {
        if let Some(parent) = original_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context("Failed to create parent directory for restore")?;
            }
        }

        if original_path.exists() {
            return Err(crate::error::Error::Conflict(format!(
                "cannot restore: file already exists at {}",
                original_path.display()
            )));
        }

        match fs::rename(trash_path, original_path) {
            Ok(_) => Ok(()),
            Err(_) => {
                fs::copy(trash_path, original_path)
                    .context("Failed to copy file from trash")?;
                fs::remove_file(trash_path)
                    .context("Failed to remove file from trash after copying")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(trash_dir: &Path) -> TrashManager {
        TrashManager::new(TrashConfig {
            path: trash_dir.to_path_buf(),
        })
    }

    #[test]
    fn test_move_and_restore() {
        let files = tempdir().unwrap();
        let trash = tempdir().unwrap();
        let manager = manager(&trash.path().join("t"));

        let original = files.path().join("photo.jpg");
        std::fs::write(&original, b"bytes").unwrap();

        let trashed = manager.move_to_trash(&original).unwrap();
        assert!(!original.exists());
        assert!(trashed.exists());

        manager.restore(&trashed, &original).unwrap();
        assert!(original.exists());
        assert_eq!(std::fs::read(&original).unwrap(), b"bytes");
    }

    #[test]
    fn test_restore_refuses_overwrite() {
        let files = tempdir().unwrap();
        let trash = tempdir().unwrap();
        let manager = manager(&trash.path().join("t"));

        let original = files.path().join("photo.jpg");
        std::fs::write(&original, b"one").unwrap();
        let trashed = manager.move_to_trash(&original).unwrap();

        std::fs::write(&original, b"two").unwrap();
        assert!(manager.restore(&trashed, &original).is_err());
        assert_eq!(std::fs::read(&original).unwrap(), b"two");
    }

    #[test]
    fn test_same_name_twice_gets_unique_slots() {
        let files = tempdir().unwrap();
        let trash = tempdir().unwrap();
        let manager = manager(&trash.path().join("t"));

        let original = files.path().join("photo.jpg");
        std::fs::write(&original, b"one").unwrap();
        let first = manager.move_to_trash(&original).unwrap();
        std::fs::write(&original, b"two").unwrap();
        let second = manager.move_to_trash(&original).unwrap();

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }
}
