//! Crawler: walks configured roots, classifies files against the store,
//! and detects deletions in a second pass.

pub mod discovery;
pub mod hashing;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::db::Database;
use crate::error::{Error, Result};

pub use discovery::{discover_images, DiscoveryResult};
pub use hashing::{calculate_hashes, sha1_of_file, HashResult};

/// Filesystem timestamps are compared with tolerance because some
/// filesystems only keep 1-2 second precision.
const TIMESTAMP_TOLERANCE_SECS: i64 = 2;

/// What the crawler learned about one candidate file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

/// Full crawl outcome over all roots.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub new_files: Vec<FileMeta>,
    pub modified_files: Vec<FileMeta>,
    pub unchanged: usize,
    /// Store rows whose paths no longer exist on disk: (photo id, path).
    pub deleted: Vec<(i64, String)>,
    pub errors: Vec<String>,
}

impl CrawlReport {
    pub fn total_candidates(&self) -> usize {
        self.new_files.len() + self.modified_files.len()
    }
}

pub struct Crawler {
    extensions: Vec<String>,
}

impl Crawler {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    /// Walk every root, classify each candidate as new / modified /
    /// unchanged against the store, and collect store paths that have
    /// disappeared. Read errors accumulate; they never abort the crawl.
    pub fn crawl(
        &self,
        roots: &[String],
        db: &Database,
        cancel: &AtomicBool,
    ) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();

        // Snapshot of what the store believes exists.
        let known: HashMap<String, (i64, i64, Option<String>)> = db
            .all_photo_paths()?
            .into_iter()
            .map(|(id, path, size, mtime)| (path, (id, size, mtime)))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();

        // Roots walk in parallel; classification runs over the merged
        // listing so nested roots cannot double-count a file.
        let walked: Vec<DiscoveryResult> = roots
            .par_iter()
            .map(|root| discover_images(Path::new(root), &self.extensions))
            .collect();

        for discovered in walked {
            report.errors.extend(discovered.errors);

            for path in discovered.files {
                if cancel.load(Ordering::SeqCst) {
                    return Err(Error::Cancelled);
                }

                let path_str = path.to_string_lossy().to_string();
                if !seen.insert(path_str.clone()) {
                    continue;
                }

                let meta = match stat_file(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        report.errors.push(format!("{}: {e}", path.display()));
                        continue;
                    }
                };

                match known.get(&path_str) {
                    None => report.new_files.push(meta),
                    Some((_, size, mtime)) => {
                        if is_modified(&meta, *size, mtime.as_deref()) {
                            report.modified_files.push(meta);
                        } else {
                            report.unchanged += 1;
                        }
                    }
                }
            }
        }

        // Second pass: anything the store knows that the crawl did not see.
        for (path, (id, _, _)) in known {
            if !seen.contains(&path) {
                report.deleted.push((id, path));
            }
        }
        report.deleted.sort();

        Ok(report)
    }
}

fn stat_file(path: &Path) -> std::io::Result<FileMeta> {
    let metadata = std::fs::metadata(path)?;
    Ok(FileMeta {
        path: path.to_path_buf(),
        size_bytes: metadata.len() as i64,
        created_at: metadata.created().ok().map(format_timestamp),
        modified_at: metadata.modified().ok().map(format_timestamp),
    })
}

fn format_timestamp(time: std::time::SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn is_modified(meta: &FileMeta, known_size: i64, known_mtime: Option<&str>) -> bool {
    if meta.size_bytes != known_size {
        return true;
    }
    match (&meta.modified_at, known_mtime) {
        (Some(fs_mtime), Some(db_mtime)) => {
            match (parse_timestamp(fs_mtime), parse_timestamp(db_mtime)) {
                (Some(fs_dt), Some(db_dt)) => {
                    (fs_dt.timestamp() - db_dt.timestamp()).abs() > TIMESTAMP_TOLERANCE_SECS
                }
                // Unparseable stored value: treat as modified.
                _ => true,
            }
        }
        (None, None) => false,
        _ => true,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PhotoUpsert;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn crawler() -> Crawler {
        Crawler::new(vec!["jpg".to_string(), "png".to_string()])
    }

    fn write_file(path: &Path, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    fn upsert_from_meta(db: &Database, meta: &FileMeta) -> i64 {
        let path = meta.path.to_string_lossy().to_string();
        db.upsert_photo(&PhotoUpsert {
            folder: meta.path.parent().unwrap().to_string_lossy().to_string(),
            filename: meta.path.file_name().unwrap().to_string_lossy().to_string(),
            ext: "jpg".to_string(),
            size_bytes: meta.size_bytes,
            created_at: meta.created_at.clone(),
            modified_at: meta.modified_at.clone(),
            sha1: None,
            perceptual_hash: None,
            path,
        })
        .unwrap()
    }

    #[test]
    fn test_new_files_classified() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("a.jpg"), b"aaa");
        write_file(&dir.path().join("b.png"), b"bbb");
        write_file(&dir.path().join("notes.txt"), b"nope");

        let db = Database::open_in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let report = crawler()
            .crawl(&[dir.path().to_string_lossy().to_string()], &db, &cancel)
            .unwrap();

        assert_eq!(report.new_files.len(), 2);
        assert_eq!(report.modified_files.len(), 0);
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_unchanged_and_modified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        write_file(&path, b"aaa");

        let db = Database::open_in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let roots = vec![dir.path().to_string_lossy().to_string()];

        let report = crawler().crawl(&roots, &db, &cancel).unwrap();
        upsert_from_meta(&db, &report.new_files[0]);

        // Same size and mtime: unchanged.
        let report = crawler().crawl(&roots, &db, &cancel).unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(report.new_files.is_empty());

        // Size change: modified.
        write_file(&path, b"aaaa-longer");
        let report = crawler().crawl(&roots, &db, &cancel).unwrap();
        assert_eq!(report.modified_files.len(), 1);
    }

    #[test]
    fn test_deletion_detected_in_second_pass() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.jpg");
        write_file(&path, b"aaa");

        let db = Database::open_in_memory().unwrap();
        let cancel = AtomicBool::new(false);
        let roots = vec![dir.path().to_string_lossy().to_string()];

        let report = crawler().crawl(&roots, &db, &cancel).unwrap();
        let id = upsert_from_meta(&db, &report.new_files[0]);

        std::fs::remove_file(&path).unwrap();
        let report = crawler().crawl(&roots, &db, &cancel).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.deleted[0].0, id);
    }

    #[test]
    fn test_cancel_observed() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("a.jpg"), b"aaa");

        let db = Database::open_in_memory().unwrap();
        let cancel = AtomicBool::new(true);
        let err = crawler()
            .crawl(&[dir.path().to_string_lossy().to_string()], &db, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
