//! Batch operations: export, delete, and tag as tracked long-running
//! jobs with progress counters and per-item-boundary cancellation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::trash::TrashManager;
use crate::vecindex::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Export,
    Delete,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub total_items: usize,
    pub processed_items: usize,
    pub failed_items: usize,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub photo_ids: Vec<i64>,
    pub destination: PathBuf,
    /// Downscale to this max edge, re-encoding as JPEG.
    pub resize_max_edge: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub photo_ids: Vec<i64>,
    /// Default is trash; permanent unlinks the file outright.
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    pub photo_ids: Vec<i64>,
    pub tags: Vec<String>,
    pub mode: TagMode,
}

struct JobInner {
    job_type: JobType,
    status: JobStatus,
    total_items: usize,
    processed_items: usize,
    failed_items: usize,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct JobHandle {
    inner: Arc<Mutex<JobInner>>,
    cancel: Arc<AtomicBool>,
}

pub struct BatchManager {
    db: Arc<Database>,
    index: Arc<VectorIndex>,
    trash: Arc<TrashManager>,
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl BatchManager {
    pub fn new(db: Arc<Database>, index: Arc<VectorIndex>, trash: Arc<TrashManager>) -> Arc<Self> {
        Arc::new(Self {
            db,
            index,
            trash,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn submit_export(self: &Arc<Self>, request: ExportRequest) -> Result<String> {
        if request.photo_ids.is_empty() {
            return Err(Error::BadRequest(
                "export needs at least one photo id".to_string(),
            ));
        }
        let manager = Arc::clone(self);
        self.spawn_job(JobType::Export, request.photo_ids.len(), move |ctx| {
            manager.run_export(&request, ctx)
        })
    }

    pub fn submit_delete(self: &Arc<Self>, request: DeleteRequest) -> Result<String> {
        if request.photo_ids.is_empty() {
            return Err(Error::BadRequest(
                "delete needs at least one photo id".to_string(),
            ));
        }
        let manager = Arc::clone(self);
        self.spawn_job(JobType::Delete, request.photo_ids.len(), move |ctx| {
            manager.run_delete(&request, ctx)
        })
    }

    pub fn submit_tag(self: &Arc<Self>, request: TagRequest) -> Result<String> {
        if request.photo_ids.is_empty() {
            return Err(Error::BadRequest(
                "tag needs at least one photo id".to_string(),
            ));
        }
        let manager = Arc::clone(self);
        self.spawn_job(JobType::Tag, request.photo_ids.len(), move |ctx| {
            manager.run_tag(&request, ctx)
        })
    }

    pub fn job_status(&self, id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).map(|handle| snapshot(id, handle))
    }

    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<JobSnapshot> = jobs
            .iter()
            .map(|(id, handle)| snapshot(id, handle))
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Request cancellation; the job stops at its next item boundary.
    pub fn cancel_job(&self, id: &str) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(id) {
            Some(handle) => {
                let inner = handle.inner.lock().unwrap_or_else(|e| e.into_inner());
                if matches!(inner.status, JobStatus::Pending | JobStatus::Processing) {
                    handle.cancel.store(true, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn spawn_job<F>(&self, job_type: JobType, total_items: usize, work: F) -> Result<String>
    where
        F: FnOnce(&JobContext) -> Result<()> + Send + 'static,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let inner = Arc::new(Mutex::new(JobInner {
            job_type,
            status: JobStatus::Pending,
            total_items,
            processed_items: 0,
            failed_items: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }));
        let cancel = Arc::new(AtomicBool::new(false));

        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id.clone(),
                JobHandle {
                    inner: Arc::clone(&inner),
                    cancel: Arc::clone(&cancel),
                },
            );

        let job_id = id.clone();
        tokio::task::spawn_blocking(move || {
            let ctx = JobContext {
                inner: Arc::clone(&inner),
                cancel,
            };
            ctx.set_status(JobStatus::Processing);

            let outcome = work(&ctx);

            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.completed_at = Some(Utc::now());
            guard.status = match outcome {
                Err(Error::Cancelled) => JobStatus::Cancelled,
                Err(e) => {
                    guard.error = Some(e.to_string());
                    JobStatus::Failed
                }
                Ok(()) if guard.failed_items > 0 => JobStatus::CompletedWithErrors,
                Ok(()) => JobStatus::Completed,
            };
            tracing::info!(job = %job_id, status = ?guard.status, "Batch job finished");
        });

        Ok(id)
    }

    fn run_export(&self, request: &ExportRequest, ctx: &JobContext) -> Result<()> {
        std::fs::create_dir_all(&request.destination)?;

        for &photo_id in &request.photo_ids {
            ctx.check_cancel()?;

            let result = self.export_one(photo_id, request);
            ctx.finish_item(result, photo_id);
        }
        Ok(())
    }

    fn export_one(&self, photo_id: i64, request: &ExportRequest) -> Result<()> {
        let photo = self
            .db
            .get_photo(photo_id)?
            .ok_or_else(|| Error::NotFound(format!("photo {photo_id}")))?;
        let source = Path::new(&photo.path);
        let target = unique_target(&request.destination, &photo.filename);

        match request.resize_max_edge {
            // Re-encode path decodes one image at a time.
            Some(max_edge) => {
                let img = image::open(source)
                    .map_err(|e| Error::Invalid(format!("cannot decode {}: {e}", photo.path)))?;
                let resized = img.thumbnail(max_edge, max_edge);
                let target = target.with_extension("jpg");
                let file = std::fs::File::create(&target)?;
                let encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(BufWriter::new(file), 90);
                resized
                    .to_rgb8()
                    .write_with_encoder(encoder)
                    .map_err(|e| Error::Invalid(format!("jpeg encode failed: {e}")))?;
            }
            // Plain copy streams through a fixed buffer.
            None => {
                let mut reader = BufReader::new(std::fs::File::open(source)?);
                let mut writer = BufWriter::new(std::fs::File::create(&target)?);
                std::io::copy(&mut reader, &mut writer)?;
            }
        }
        Ok(())
    }

    fn run_delete(&self, request: &DeleteRequest, ctx: &JobContext) -> Result<()> {
        for &photo_id in &request.photo_ids {
            ctx.check_cancel()?;

            let result = self.delete_one(photo_id, request.permanent);
            ctx.finish_item(result, photo_id);
        }
        Ok(())
    }

    /// Atomic per item: the file move/unlink happens first; only then
    /// do the row (with its cascades) and the vector slot go away.
    fn delete_one(&self, photo_id: i64, permanent: bool) -> Result<()> {
        let photo = self
            .db
            .get_photo(photo_id)?
            .ok_or_else(|| Error::NotFound(format!("photo {photo_id}")))?;
        let path = Path::new(&photo.path);

        if path.exists() {
            if permanent {
                std::fs::remove_file(path)?;
            } else {
                self.trash.move_to_trash(path)?;
            }
        }

        self.db.delete_photo(photo_id)?;
        self.index.remove(photo_id);
        Ok(())
    }

    fn run_tag(&self, request: &TagRequest, ctx: &JobContext) -> Result<()> {
        for &photo_id in &request.photo_ids {
            ctx.check_cancel()?;

            let result = self.tag_one(photo_id, request);
            ctx.finish_item(result, photo_id);
        }
        Ok(())
    }

    fn tag_one(&self, photo_id: i64, request: &TagRequest) -> Result<()> {
        if self.db.get_photo(photo_id)?.is_none() {
            return Err(Error::NotFound(format!("photo {photo_id}")));
        }

        let tags = match request.mode {
            TagMode::Replace => request.tags.clone(),
            TagMode::Add => {
                let mut tags = self.db.get_photo_tags(photo_id)?;
                for tag in &request.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                tags
            }
            TagMode::Remove => self
                .db
                .get_photo_tags(photo_id)?
                .into_iter()
                .filter(|t| !request.tags.contains(t))
                .collect(),
        };

        self.db.set_photo_tags(photo_id, Some(&tags))
    }
}

struct JobContext {
    inner: Arc<Mutex<JobInner>>,
    cancel: Arc<AtomicBool>,
}

impl JobContext {
    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_status(&self, status: JobStatus) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).status = status;
    }

    fn finish_item(&self, result: Result<()>, photo_id: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.processed_items += 1;
        if let Err(e) = result {
            inner.failed_items += 1;
            tracing::warn!(photo_id, error = %e, "Batch item failed");
        }
    }
}

fn snapshot(id: &str, handle: &JobHandle) -> JobSnapshot {
    let inner = handle.inner.lock().unwrap_or_else(|e| e.into_inner());
    JobSnapshot {
        id: id.to_string(),
        job_type: inner.job_type,
        status: inner.status,
        total_items: inner.total_items,
        processed_items: inner.processed_items,
        failed_items: inner.failed_items,
        created_at: inner.created_at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        completed_at: inner
            .completed_at
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        error: inner.error.clone(),
    }
}

/// Avoid clobbering same-named exports: photo.jpg, photo_1.jpg, ...
fn unique_target(destination: &Path, filename: &str) -> PathBuf {
    let candidate = destination.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    let ext = Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for i in 1.. {
        let candidate = destination.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrashConfig;
    use crate::db::photos::sample_photo;
    use crate::db::PhotoUpsert;
    use crate::vecindex::VectorIndexConfig;
    use tempfile::tempdir;

    fn setup(work: &Path) -> (Arc<BatchManager>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut index_config = VectorIndexConfig::new(work.join("index"));
        index_config.dimension = 4;
        let index = Arc::new(VectorIndex::open(index_config).unwrap());
        let trash = Arc::new(TrashManager::new(TrashConfig {
            path: work.join("trash"),
        }));
        (BatchManager::new(Arc::clone(&db), index, trash), db)
    }

    fn add_photo_file(db: &Database, dir: &Path, name: &str) -> (i64, PathBuf) {
        let path = dir.join(name);
        std::fs::write(&path, format!("contents of {name}")).unwrap();
        let mut upsert: PhotoUpsert = sample_photo(&path.to_string_lossy());
        upsert.size_bytes = std::fs::metadata(&path).unwrap().len() as i64;
        let id = db.upsert_photo(&upsert).unwrap();
        (id, path)
    }

    async fn wait_done(manager: &BatchManager, id: &str) -> JobSnapshot {
        for _ in 0..200 {
            let snapshot = manager.job_status(id).unwrap();
            if !matches!(snapshot.status, JobStatus::Pending | JobStatus::Processing) {
                return snapshot;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_export_copies_files() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());
        let (a, _) = add_photo_file(&db, photos.path(), "a.jpg");
        let (b, _) = add_photo_file(&db, photos.path(), "b.jpg");

        let dest = work.path().join("out");
        let id = manager
            .submit_export(ExportRequest {
                photo_ids: vec![a, b],
                destination: dest.clone(),
                resize_max_edge: None,
            })
            .unwrap();

        let snapshot = wait_done(&manager, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.processed_items, 2);
        assert!(dest.join("a.jpg").exists());
        assert!(dest.join("b.jpg").exists());
    }

    #[tokio::test]
    async fn test_export_with_missing_photo_completes_with_errors() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());
        let (a, _) = add_photo_file(&db, photos.path(), "a.jpg");

        let id = manager
            .submit_export(ExportRequest {
                photo_ids: vec![a, 9999],
                destination: work.path().join("out"),
                resize_max_edge: None,
            })
            .unwrap();

        let snapshot = wait_done(&manager, &id).await;
        assert_eq!(snapshot.status, JobStatus::CompletedWithErrors);
        assert_eq!(snapshot.failed_items, 1);
    }

    #[tokio::test]
    async fn test_delete_to_trash_removes_row() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());
        let (a, path) = add_photo_file(&db, photos.path(), "doomed.jpg");

        let id = manager
            .submit_delete(DeleteRequest {
                photo_ids: vec![a],
                permanent: false,
            })
            .unwrap();

        let snapshot = wait_done(&manager, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(!path.exists());
        assert!(db.get_photo(a).unwrap().is_none());
        // Trash holds the moved file.
        let trashed: Vec<_> = std::fs::read_dir(work.path().join("trash"))
            .unwrap()
            .collect();
        assert_eq!(trashed.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_delete_unlinks() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());
        let (a, path) = add_photo_file(&db, photos.path(), "gone.jpg");

        let id = manager
            .submit_delete(DeleteRequest {
                photo_ids: vec![a],
                permanent: true,
            })
            .unwrap();

        let snapshot = wait_done(&manager, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(!path.exists());
        assert!(!work.path().join("trash").exists());
        assert!(db.get_photo(a).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_modes() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());
        let (a, _) = add_photo_file(&db, photos.path(), "a.jpg");

        let id = manager
            .submit_tag(TagRequest {
                photo_ids: vec![a],
                tags: vec!["beach".into(), "family".into()],
                mode: TagMode::Add,
            })
            .unwrap();
        wait_done(&manager, &id).await;
        assert_eq!(db.get_photo_tags(a).unwrap(), vec!["beach", "family"]);

        let id = manager
            .submit_tag(TagRequest {
                photo_ids: vec![a],
                tags: vec!["beach".into()],
                mode: TagMode::Remove,
            })
            .unwrap();
        wait_done(&manager, &id).await;
        assert_eq!(db.get_photo_tags(a).unwrap(), vec!["family"]);

        let id = manager
            .submit_tag(TagRequest {
                photo_ids: vec![a],
                tags: vec!["archive".into()],
                mode: TagMode::Replace,
            })
            .unwrap();
        wait_done(&manager, &id).await;
        assert_eq!(db.get_photo_tags(a).unwrap(), vec!["archive"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_item_boundary() {
        let work = tempdir().unwrap();
        let photos = tempdir().unwrap();
        let (manager, db) = setup(work.path());

        let mut ids = Vec::new();
        for i in 0..50 {
            let (id, _) = add_photo_file(&db, photos.path(), &format!("p{i}.jpg"));
            ids.push(id);
        }

        let job_id = manager
            .submit_tag(TagRequest {
                photo_ids: ids,
                tags: vec!["x".into()],
                mode: TagMode::Add,
            })
            .unwrap();
        manager.cancel_job(&job_id);

        let snapshot = wait_done(&manager, &job_id).await;
        // Either the cancel landed mid-run or the job won the race;
        // a cancelled job must report partial progress.
        if snapshot.status == JobStatus::Cancelled {
            assert!(snapshot.processed_items < snapshot.total_items);
        }
    }

    #[tokio::test]
    async fn test_empty_request_rejected() {
        let work = tempdir().unwrap();
        let (manager, _db) = setup(work.path());
        assert!(manager
            .submit_delete(DeleteRequest {
                photo_ids: vec![],
                permanent: false,
            })
            .is_err());
    }
}
