//! Indexing pipeline orchestrator: discovery, then the EXIF, embedding,
//! thumbnail, and face phases run sequentially over the photos that
//! still need work, with bounded parallelism inside each phase and a
//! cancel check at every per-photo step.

pub mod state;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::db::{Database, Descriptor, PhotoRecord, PhotoUpsert, INDEX_VERSION};
use crate::error::{Error, Result};
use crate::events::{EventQueue, EventType, Priority};
use crate::scanner::{self, Crawler, FileMeta};
use crate::vecindex::VectorIndex;
use crate::workers::{
    ClipEmbeddingWorker, DescriptorWorker, ExifWorker, FaceWorker, ThumbnailWorker,
};

pub use state::{Phase, PipelineState, Progress, RunState, StatusSnapshot};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_workers: usize,
    pub image_extensions: Vec<String>,
    pub models_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
}

pub struct Pipeline {
    db: Arc<Database>,
    index: Arc<VectorIndex>,
    state: Arc<PipelineState>,
    events: Option<Arc<EventQueue>>,
    config: PipelineConfig,
    exif_worker: Arc<ExifWorker>,
    thumbnail_worker: Arc<ThumbnailWorker>,
    embedding_worker: Arc<ClipEmbeddingWorker>,
}

impl Pipeline {
    pub fn new(
        db: Arc<Database>,
        index: Arc<VectorIndex>,
        events: Option<Arc<EventQueue>>,
        config: PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            exif_worker: Arc::new(ExifWorker::new()),
            thumbnail_worker: Arc::new(ThumbnailWorker::new(config.thumbnails_dir.clone())),
            embedding_worker: Arc::new(ClipEmbeddingWorker::new(config.models_dir.clone())),
            state: Arc::new(PipelineState::new()),
            db,
            index,
            events,
            config,
        })
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn embedding_worker(&self) -> &Arc<ClipEmbeddingWorker> {
        &self.embedding_worker
    }

    /// Begin a run. Rejected with `Conflict` while one is active.
    /// `full` clears every `indexed_at` mark first, forcing all phases
    /// over all photos.
    pub async fn start(self: &Arc<Self>, full: bool) -> Result<()> {
        self.state.begin_run().await?;

        if full {
            let db = Arc::clone(&self.db);
            let cleared = tokio::task::spawn_blocking(move || db.clear_indexed_marks())
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))
                .and_then(|r| r);
            match cleared {
                Ok(count) => tracing::info!(photos = count, "Cleared index marks for full reindex"),
                Err(e) => {
                    self.state.record_error(e.to_string()).await;
                    self.state.finish(RunState::Error).await;
                    return Err(e);
                }
            }
        }

        self.publish_event(EventType::IndexStarted, serde_json::json!({ "full": full }));

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = pipeline.run().await;
            match outcome {
                Ok(()) => {
                    pipeline.state.finish(RunState::Completed).await;
                    pipeline.publish_event(EventType::IndexCompleted, serde_json::json!({}));
                    tracing::info!("Indexing run completed");
                }
                Err(Error::Cancelled) => {
                    pipeline.state.finish(RunState::Stopped).await;
                    tracing::info!("Indexing run stopped by request");
                }
                Err(e) => {
                    pipeline.state.record_error(e.to_string()).await;
                    pipeline.state.finish(RunState::Error).await;
                    pipeline.publish_event(
                        EventType::IndexFailed,
                        serde_json::json!({ "error": e.to_string() }),
                    );
                    tracing::error!(error = %e, "Indexing run failed");
                }
            }

            if let Err(e) = pipeline.index.save() {
                tracing::error!(error = %e, "Failed to save vector index after run");
            }
        });

        Ok(())
    }

    /// Request cooperative cancellation.
    pub async fn stop(&self) -> Result<()> {
        self.state.request_stop().await
    }

    async fn run(self: &Arc<Self>) -> Result<()> {
        let failed: Arc<Mutex<HashSet<i64>>> = Arc::new(Mutex::new(HashSet::new()));

        self.run_discovery().await?;
        self.check_cancel()?;

        self.run_exif_phase(&failed).await?;
        self.check_cancel()?;

        self.run_embedding_phase(&failed).await?;
        self.check_cancel()?;

        self.run_thumbnail_phase(&failed).await?;
        self.check_cancel()?;

        self.run_face_phase(&failed).await?;
        self.check_cancel()?;

        self.mark_completed_photos(&failed).await?;

        // Deletions this run may have pushed the tombstone ratio over
        // the rebuild threshold even when no embeddings were added.
        self.index.maybe_spawn_optimize();
        Ok(())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.state.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn publish_event(&self, event_type: EventType, data: serde_json::Value) {
        if let Some(events) = &self.events {
            events.publish(event_type, data, Priority::High, None, None);
        }
    }

    /// Phase 1: enumerate roots, classify, hash new/modified files
    /// (SHA-1 streamed while reading), upsert rows, and delete rows for
    /// vanished paths.
    async fn run_discovery(self: &Arc<Self>) -> Result<()> {
        self.state.enter_phase(Phase::Discovery).await;

        let roots = {
            let db = Arc::clone(&self.db);
            tokio::task::spawn_blocking(move || db.get_roots())
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))??
        };
        if roots.is_empty() {
            self.state
                .record_error("no roots configured; discovery found nothing")
                .await;
            return Ok(());
        }

        let report = {
            let db = Arc::clone(&self.db);
            let cancel = self.state.cancel_flag();
            let crawler = Crawler::new(self.config.image_extensions.clone());
            tokio::task::spawn_blocking(move || crawler.crawl(&roots, &db, &cancel))
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))??
        };

        for error in &report.errors {
            self.state.record_error(format!("crawl: {error}")).await;
        }
        tracing::info!(
            new = report.new_files.len(),
            modified = report.modified_files.len(),
            unchanged = report.unchanged,
            deleted = report.deleted.len(),
            "Discovery classified files"
        );

        // Deletions first so their vector slots tombstone before any
        // additions this run.
        for (photo_id, path) in &report.deleted {
            self.check_cancel()?;
            let db = Arc::clone(&self.db);
            let id = *photo_id;
            tokio::task::spawn_blocking(move || db.delete_photo(id))
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))??;
            self.index.remove(id);
            self.publish_event(
                EventType::FileDeleted,
                serde_json::json!({ "photo_id": id, "path": path }),
            );
        }

        let candidates: Vec<(FileMeta, bool)> = report
            .new_files
            .into_iter()
            .map(|m| (m, true))
            .chain(report.modified_files.into_iter().map(|m| (m, false)))
            .collect();
        self.state.add_work(candidates.len()).await;

        let reporter = ProgressReporter::new(Arc::clone(&self.state), candidates.len());
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = tokio::task::JoinSet::new();

        for (meta, is_new) in candidates {
            self.check_cancel()?;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))?;
            let db = Arc::clone(&self.db);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = upsert_discovered(&db, &meta);
                (meta.path, is_new, result)
            });

            while let Some(joined) = tasks.try_join_next() {
                self.finish_discovery_item(joined, &reporter).await?;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.finish_discovery_item(joined, &reporter).await?;
        }
        reporter.flush().await;

        Ok(())
    }

    async fn finish_discovery_item(
        &self,
        joined: std::result::Result<(PathBuf, bool, Result<i64>), tokio::task::JoinError>,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let (path, is_new, result) = joined.map_err(|e| Error::storage(anyhow::anyhow!(e)))?;
        match result {
            Ok(photo_id) => {
                let event_type = if is_new {
                    EventType::FileDiscovered
                } else {
                    EventType::FileModified
                };
                self.publish_event(
                    event_type,
                    serde_json::json!({ "photo_id": photo_id, "path": path.to_string_lossy() }),
                );
            }
            Err(e) => {
                self.state
                    .record_error(format!("{}: {e}", path.display()))
                    .await;
            }
        }
        reporter.tick().await;
        Ok(())
    }

    /// Phase 2: EXIF for every photo still missing it.
    async fn run_exif_phase(self: &Arc<Self>, failed: &Arc<Mutex<HashSet<i64>>>) -> Result<()> {
        let worker = Arc::clone(&self.exif_worker);
        let db = Arc::clone(&self.db);
        self.run_descriptor_phase(Phase::Exif, Descriptor::Exif, failed, move |photo| {
            let record = worker.process(photo)?;
            db.put_exif(photo.id, &record)
        })
        .await
    }

    /// Phase 3: semantic embeddings, persisted to the store and the
    /// vector index. An unavailable model skips the phase with one
    /// recorded error.
    async fn run_embedding_phase(self: &Arc<Self>, failed: &Arc<Mutex<HashSet<i64>>>) -> Result<()> {
        if !self.embedding_worker.is_available() {
            self.state
                .record_error("embedding model unavailable; embedding phase skipped")
                .await;
            return Ok(());
        }

        let worker = Arc::clone(&self.embedding_worker);
        let db = Arc::clone(&self.db);
        let index = Arc::clone(&self.index);
        self.run_descriptor_phase(Phase::Embedding, Descriptor::Embedding, failed, move |photo| {
            let vector = worker.process(photo)?;
            db.put_embedding(photo.id, &vector, crate::workers::embedding::MODEL_NAME)?;
            index.add(photo.id, &vector)
        })
        .await?;

        self.index.save()?;
        self.index.maybe_spawn_optimize();
        Ok(())
    }

    /// Phase 4: thumbnails.
    async fn run_thumbnail_phase(self: &Arc<Self>, failed: &Arc<Mutex<HashSet<i64>>>) -> Result<()> {
        let worker = Arc::clone(&self.thumbnail_worker);
        let db = Arc::clone(&self.db);
        self.run_descriptor_phase(Phase::Thumbnail, Descriptor::Thumbnail, failed, move |photo| {
            let thumb = worker.process(photo)?;
            db.put_thumbnail(photo.id, &thumb)
        })
        .await
    }

    /// Phase 5: face detection, only when the feature is enabled. The
    /// worker is not even constructed otherwise.
    async fn run_face_phase(self: &Arc<Self>, failed: &Arc<Mutex<HashSet<i64>>>) -> Result<()> {
        let enabled = {
            let db = Arc::clone(&self.db);
            tokio::task::spawn_blocking(move || db.get_bool_setting("face_search_enabled", false))
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))??
        };
        if !enabled {
            return Ok(());
        }

        let worker = Arc::new(FaceWorker::new(self.config.models_dir.clone()));
        if !worker.is_available() {
            self.state
                .record_error("face models unavailable; face phase skipped")
                .await;
            return Ok(());
        }

        let db = Arc::clone(&self.db);
        self.run_descriptor_phase(Phase::Face, Descriptor::Face, failed, move |photo| {
            let faces = worker.process(photo)?;
            db.clear_faces_for_photo(photo.id)?;
            for face in &faces {
                let vector = if face.embedding.is_empty() {
                    None
                } else {
                    Some(face.embedding.as_slice())
                };
                db.put_face(photo.id, &face.bbox, vector, Some(face.confidence))?;
            }
            Ok(())
        })
        .await
    }

    /// Shared phase driver: fetch the work set, process photos with
    /// bounded parallelism, record per-photo errors, and observe cancel
    /// at every step.
    async fn run_descriptor_phase<F>(
        self: &Arc<Self>,
        phase: Phase,
        descriptor: Descriptor,
        failed: &Arc<Mutex<HashSet<i64>>>,
        process: F,
    ) -> Result<()>
    where
        F: Fn(&PhotoRecord) -> Result<()> + Send + Sync + 'static,
    {
        self.state.enter_phase(phase).await;

        let photos = {
            let db = Arc::clone(&self.db);
            tokio::task::spawn_blocking(move || db.list_photos_missing(descriptor, INDEX_VERSION))
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))??
        };
        if photos.is_empty() {
            return Ok(());
        }

        tracing::info!(phase = ?phase, photos = photos.len(), "Running descriptor phase");
        self.state.add_work(photos.len()).await;

        let reporter = ProgressReporter::new(Arc::clone(&self.state), photos.len());
        let process = Arc::new(process);
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = tokio::task::JoinSet::new();

        for photo in photos {
            self.check_cancel()?;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::storage(anyhow::anyhow!(e)))?;
            let process = Arc::clone(&process);

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let outcome = process(&photo);
                (photo.id, photo.path.clone(), outcome)
            });

            while let Some(joined) = tasks.try_join_next() {
                self.finish_phase_item(joined, failed, &reporter).await?;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.finish_phase_item(joined, failed, &reporter).await?;
        }
        reporter.flush().await;

        Ok(())
    }

    async fn finish_phase_item(
        &self,
        joined: std::result::Result<(i64, String, Result<()>), tokio::task::JoinError>,
        failed: &Arc<Mutex<HashSet<i64>>>,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        let (photo_id, path, outcome) = joined.map_err(|e| Error::storage(anyhow::anyhow!(e)))?;
        if let Err(e) = outcome {
            if matches!(e, Error::Cancelled) {
                return Err(Error::Cancelled);
            }
            failed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(photo_id);
            self.state.record_error(format!("{path}: {e}")).await;
        }
        reporter.tick().await;
        Ok(())
    }

    /// Stamp `indexed_at`/`index_version` on every photo that went
    /// through the run without a per-photo failure. A photo's mark is
    /// only set after all of its descriptors were written.
    async fn mark_completed_photos(&self, failed: &Arc<Mutex<HashSet<i64>>>) -> Result<()> {
        let failed: HashSet<i64> = failed.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> Result<()> {
            for photo in db.list_unmarked_photos(INDEX_VERSION)? {
                if failed.contains(&photo.id) {
                    continue;
                }
                db.mark_photo_indexed(photo.id, INDEX_VERSION)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::storage(anyhow::anyhow!(e)))??;
        Ok(())
    }
}

fn upsert_discovered(db: &Database, meta: &FileMeta) -> Result<i64> {
    let path = &meta.path;
    let hashes = scanner::calculate_hashes(path)?;

    let upsert = PhotoUpsert {
        path: path.to_string_lossy().to_string(),
        folder: path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        ext: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
        size_bytes: meta.size_bytes,
        created_at: meta.created_at.clone(),
        modified_at: meta.modified_at.clone(),
        sha1: Some(hashes.sha1),
        perceptual_hash: hashes.perceptual,
    };
    db.upsert_photo(&upsert)
}

/// Progress cadence: every item for small phases, roughly every 1%
/// beyond a thousand items.
struct ProgressReporter {
    state: Arc<PipelineState>,
    stride: usize,
    pending: std::sync::atomic::AtomicUsize,
}

impl ProgressReporter {
    fn new(state: Arc<PipelineState>, total: usize) -> Self {
        let stride = if total <= 1000 { 1 } else { total / 100 };
        Self {
            state,
            stride: stride.max(1),
            pending: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    async fn tick(&self) {
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if pending >= self.stride {
            self.pending.fetch_sub(pending, Ordering::SeqCst);
            self.state.record_processed(pending).await;
        }
    }

    async fn flush(&self) {
        let pending = self.pending.swap(0, Ordering::SeqCst);
        if pending > 0 {
            self.state.record_processed(pending).await;
        }
    }
}
