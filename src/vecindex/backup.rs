//! Rotated snapshots of the vector index files.
//!
//! A backup is a directory under `index/backups/{name}/` holding copies
//! of index.bin, metadata.json, and stats.json. At most `max_backups`
//! dated snapshots are kept; restore first snapshots the current state
//! as `pre_restore`.

use std::path::{Path, PathBuf};

use super::VectorIndexConfig;
use crate::error::{Error, Result};

const INDEX_FILES: &[&str] = &["index.bin", "metadata.json", "stats.json"];
const PRE_RESTORE: &str = "pre_restore";

pub struct BackupManager {
    index_dir: PathBuf,
    max_backups: usize,
}

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub name: String,
    pub created_at: Option<std::time::SystemTime>,
}

impl BackupManager {
    pub fn new(config: &VectorIndexConfig) -> Self {
        Self {
            index_dir: config.dir.clone(),
            max_backups: config.max_backups,
        }
    }

    fn backups_dir(&self) -> PathBuf {
        self.index_dir.join("backups")
    }

    /// Snapshot the current index files. `name` defaults to a dated
    /// `backup_YYYYMMDD_HHMMSS` label. Rotates old snapshots beyond
    /// `max_backups`.
    pub fn create_backup(&self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(n) => sanitize_name(n)?,
            None => chrono::Utc::now().format("backup_%Y%m%d_%H%M%S").to_string(),
        };

        self.copy_index_files(&self.index_dir, &self.backups_dir().join(&name))?;
        self.rotate()?;
        tracing::info!(backup = %name, "Vector index backup created");
        Ok(name)
    }

    /// Restore a named snapshot over the live index files. The current
    /// state is snapshotted as `pre_restore` first. The caller must
    /// reload the in-memory index afterwards.
    pub fn restore_backup(&self, name: &str) -> Result<()> {
        let name = sanitize_name(name)?;
        let source = self.backups_dir().join(&name);
        if !source.is_dir() {
            return Err(Error::NotFound(format!("backup '{name}'")));
        }

        self.copy_index_files(&self.index_dir, &self.backups_dir().join(PRE_RESTORE))?;
        self.copy_index_files(&source, &self.index_dir)?;
        tracing::info!(backup = %name, "Vector index restored from backup");
        Ok(())
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let dir = self.backups_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            backups.push(BackupInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                created_at: entry.metadata()?.created().ok(),
            });
        }
        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    fn copy_index_files(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::create_dir_all(to)?;
        for file in INDEX_FILES {
            let src = from.join(file);
            if src.exists() {
                std::fs::copy(&src, to.join(file))?;
            }
        }
        Ok(())
    }

    /// Drop the oldest dated snapshots beyond `max_backups`.
    /// `pre_restore` does not count against the limit.
    fn rotate(&self) -> Result<()> {
        let mut dated: Vec<BackupInfo> = self
            .list_backups()?
            .into_iter()
            .filter(|b| b.name != PRE_RESTORE)
            .collect();
        if dated.len() <= self.max_backups {
            return Ok(());
        }

        dated.sort_by_key(|b| b.created_at);
        let excess = dated.len() - self.max_backups;
        for backup in dated.into_iter().take(excess) {
            let path = self.backups_dir().join(&backup.name);
            std::fs::remove_dir_all(&path)?;
            tracing::debug!(backup = %backup.name, "Rotated out old index backup");
        }
        Ok(())
    }
}

fn sanitize_name(name: &str) -> Result<String> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Invalid(format!(
            "backup name '{name}' must be non-empty alphanumeric/underscore/dash"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vecindex::{VectorIndex, VectorIndexConfig};
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (VectorIndexConfig, BackupManager) {
        let mut config = VectorIndexConfig::new(dir.to_path_buf());
        config.dimension = 4;
        config.max_backups = 2;
        let manager = BackupManager::new(&config);
        (config, manager)
    }

    fn write_vectors(config: &VectorIndexConfig, ids: &[i64]) {
        let index = VectorIndex::open(config.clone()).unwrap();
        for &id in ids {
            let mut v = vec![0.0f32; 4];
            v[(id as usize) % 4] = 1.0;
            index.add(id, &v).unwrap();
        }
        index.save().unwrap();
    }

    #[test]
    fn test_create_and_restore() {
        let dir = tempdir().unwrap();
        let (config, manager) = setup(dir.path());

        write_vectors(&config, &[1]);
        manager.create_backup(Some("first")).unwrap();

        write_vectors(&config, &[1, 2, 3]);
        manager.restore_backup("first").unwrap();

        let index = VectorIndex::open(config).unwrap();
        assert_eq!(index.live_count(), 1);

        // Restore snapshotted the replaced state first.
        let names: Vec<String> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert!(names.contains(&"pre_restore".to_string()));
    }

    #[test]
    fn test_restore_unknown_name() {
        let dir = tempdir().unwrap();
        let (_, manager) = setup(dir.path());
        assert!(matches!(
            manager.restore_backup("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rotation_keeps_max_backups() {
        let dir = tempdir().unwrap();
        let (config, manager) = setup(dir.path());
        write_vectors(&config, &[1]);

        for name in ["a", "b", "c", "d"] {
            manager.create_backup(Some(name)).unwrap();
        }
        let dated: Vec<_> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .filter(|b| b.name != "pre_restore")
            .collect();
        assert_eq!(dated.len(), 2);
    }

    #[test]
    fn test_bad_names_rejected() {
        let dir = tempdir().unwrap();
        let (_, manager) = setup(dir.path());
        assert!(manager.create_backup(Some("../escape")).is_err());
        assert!(manager.create_backup(Some("")).is_err());
    }
}
