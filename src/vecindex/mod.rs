//! Persistent approximate-nearest-neighbor index over photo embeddings.
//!
//! Representation scales with population: exact flat scan up to 50k
//! vectors, IVF-Flat to 200k, IVF-PQ beyond. Deletion is lazy (the id
//! mapping is dropped, the vector stays until the next rebuild), and
//! retraining happens adaptively in the background once the population
//! and cooldown thresholds are met.

pub mod backup;
pub(crate) mod flat;
pub(crate) mod ivf;
pub(crate) mod kmeans;
mod persist;
pub(crate) mod pq;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::db::embeddings::normalize;
use crate::error::{Error, Result};

pub use backup::BackupManager;
pub use persist::{IndexMetadata, IndexStats};

/// Index representation classes, chosen by live population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Flat,
    IvfFlat,
    IvfPq,
}

impl IndexKind {
    pub fn for_population(n: usize) -> Self {
        if n <= 50_000 {
            IndexKind::Flat
        } else if n <= 200_000 {
            IndexKind::IvfFlat
        } else {
            IndexKind::IvfPq
        }
    }
}

/// `nlist = clamp(sqrt(N), 100, 4096)`.
pub fn nlist_for(n: usize) -> usize {
    ((n as f64).sqrt() as usize).clamp(100, 4096)
}

/// `nprobe = nlist / 4`, capped at 100.
pub fn nprobe_for(nlist: usize) -> usize {
    (nlist / 4).clamp(1, 100)
}

/// Concrete representation behind the manager.
#[derive(Debug, Clone)]
pub(crate) enum Repr {
    Flat(flat::FlatIndex),
    IvfFlat(ivf::IvfFlatIndex),
    IvfPq(pq::IvfPqIndex),
}

impl Repr {
    fn kind(&self) -> IndexKind {
        match self {
            Repr::Flat(_) => IndexKind::Flat,
            Repr::IvfFlat(_) => IndexKind::IvfFlat,
            Repr::IvfPq(_) => IndexKind::IvfPq,
        }
    }

    fn dim(&self) -> usize {
        match self {
            Repr::Flat(i) => i.dim(),
            Repr::IvfFlat(i) => i.dim(),
            Repr::IvfPq(i) => i.dim(),
        }
    }

    fn ntotal(&self) -> usize {
        match self {
            Repr::Flat(i) => i.ntotal(),
            Repr::IvfFlat(i) => i.ntotal(),
            Repr::IvfPq(i) => i.ntotal(),
        }
    }

    fn add(&mut self, vector: &[f32]) -> usize {
        match self {
            Repr::Flat(i) => i.add(vector),
            Repr::IvfFlat(i) => i.add(vector),
            Repr::IvfPq(i) => i.add(vector),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        match self {
            Repr::Flat(i) => i.search(query, k),
            Repr::IvfFlat(i) => i.search(query, k),
            Repr::IvfPq(i) => i.search(query, k),
        }
    }

    fn entries(&self) -> Vec<(usize, Vec<f32>)> {
        match self {
            Repr::Flat(i) => i.entries().map(|(p, v)| (p, v.to_vec())).collect(),
            Repr::IvfFlat(i) => i.entries().map(|(p, v)| (p, v.to_vec())).collect(),
            Repr::IvfPq(i) => i.entries().collect(),
        }
    }

    fn nlist(&self) -> Option<usize> {
        match self {
            Repr::Flat(_) => None,
            Repr::IvfFlat(i) => Some(i.nlist()),
            Repr::IvfPq(i) => Some(i.nlist()),
        }
    }

    fn nprobe(&self) -> Option<usize> {
        match self {
            Repr::Flat(_) => None,
            Repr::IvfFlat(i) => Some(i.nprobe()),
            Repr::IvfPq(i) => Some(i.nprobe()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimension: usize,
    pub dir: PathBuf,
    /// Auto-save after this many unsaved additions.
    pub auto_save_threshold: usize,
    /// Adaptive retraining only above this population.
    pub auto_optimize_threshold: usize,
    /// Minimum seconds between adaptive retrainings.
    pub optimize_cooldown_secs: i64,
    pub max_backups: usize,
}

impl VectorIndexConfig {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dimension: 512,
            dir,
            auto_save_threshold: 1000,
            auto_optimize_threshold: 50_000,
            optimize_cooldown_secs: 3600,
            max_backups: 7,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join("index.bin")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join("stats.json")
    }
}

struct Inner {
    repr: Repr,
    id_to_pos: HashMap<i64, usize>,
    pos_to_id: HashMap<usize, i64>,
    dirty: bool,
    unsaved_additions: usize,
    last_optimization: Option<chrono::DateTime<chrono::Utc>>,
    /// Set when a persisted index could not be loaded (e.g. dimension
    /// mismatch) and a rebuild from the store is required.
    needs_rebuild: bool,
}

/// Thread-safe index manager. Reads share the lock; writes serialize;
/// rebuilds do their heavy work on a copy and only take the write lock
/// for the final swap.
pub struct VectorIndex {
    config: VectorIndexConfig,
    inner: RwLock<Inner>,
    optimizing: AtomicBool,
}

impl VectorIndex {
    /// Open the index directory, loading a persisted index when present.
    /// A persisted index with the wrong dimension is refused and the
    /// index starts empty, marked for rebuild from the store.
    pub fn open(config: VectorIndexConfig) -> Result<Self> {
        let mut inner = Inner {
            repr: Repr::Flat(flat::FlatIndex::new(config.dimension)),
            id_to_pos: HashMap::new(),
            pos_to_id: HashMap::new(),
            dirty: false,
            unsaved_additions: 0,
            last_optimization: None,
            needs_rebuild: false,
        };

        let index_path = config.index_path();
        let metadata_path = config.metadata_path();
        if index_path.exists() && metadata_path.exists() {
            match Self::load_from_disk(&config) {
                Ok((repr, metadata)) => {
                    tracing::info!(
                        vectors = repr.ntotal(),
                        kind = ?repr.kind(),
                        "Loaded vector index"
                    );
                    inner.pos_to_id = metadata
                        .id_to_pos
                        .iter()
                        .map(|(id, pos)| (*pos, *id))
                        .collect();
                    inner.id_to_pos = metadata.id_to_pos;
                    inner.repr = repr;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Vector index refused to load; marked for rebuild");
                    inner.needs_rebuild = true;
                }
            }
        }

        Ok(Self {
            config,
            inner: RwLock::new(inner),
            optimizing: AtomicBool::new(false),
        })
    }

    fn load_from_disk(config: &VectorIndexConfig) -> Result<(Repr, IndexMetadata)> {
        let repr = persist::read_index(&config.index_path())?;
        let metadata = persist::read_metadata(&config.metadata_path())?;
        if repr.dim() != config.dimension || metadata.dimension != config.dimension {
            return Err(Error::Invalid(format!(
                "index dimension {} does not match configured dimension {}",
                repr.dim(),
                config.dimension
            )));
        }
        Ok((repr, metadata))
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &VectorIndexConfig {
        &self.config
    }

    /// True when a persisted index was refused at load time.
    pub fn needs_rebuild(&self) -> bool {
        self.read().needs_rebuild
    }

    /// Add (or replace) the vector for a photo. The vector is
    /// normalized first; zero-norm and non-finite input is an error.
    pub fn add(&self, photo_id: i64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::Invalid(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.config.dimension
            )));
        }
        let vector = normalize(vector)?;

        let mut inner = self.write();
        if let Some(old_pos) = inner.id_to_pos.remove(&photo_id) {
            inner.pos_to_id.remove(&old_pos);
        }
        let position = inner.repr.add(&vector);
        inner.id_to_pos.insert(photo_id, position);
        inner.pos_to_id.insert(position, photo_id);
        inner.dirty = true;
        inner.unsaved_additions += 1;

        let should_save = inner.unsaved_additions >= self.config.auto_save_threshold;
        drop(inner);

        if should_save {
            self.save()?;
        }
        Ok(())
    }

    /// Lazy removal: only the id mapping is dropped; the vector stays
    /// as a tombstone until the next rebuild.
    pub fn remove(&self, photo_id: i64) -> bool {
        let mut inner = self.write();
        if let Some(position) = inner.id_to_pos.remove(&photo_id) {
            inner.pos_to_id.remove(&position);
            inner.dirty = true;
            true
        } else {
            false
        }
    }

    pub fn contains(&self, photo_id: i64) -> bool {
        self.read().id_to_pos.contains_key(&photo_id)
    }

    /// Search for the `k` nearest live vectors with score >= min_score.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.config.dimension {
            return Err(Error::Invalid(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.config.dimension
            )));
        }
        let query = normalize(query)?;

        let inner = self.read();
        if inner.repr.ntotal() == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch to compensate for tombstoned positions.
        let search_k = (k * 2).min(inner.repr.ntotal()).max(k.min(inner.repr.ntotal()));
        let mut results = Vec::with_capacity(k);
        for (position, score) in inner.repr.search(&query, search_k) {
            let Some(&photo_id) = inner.pos_to_id.get(&position) else {
                continue;
            };
            if score < min_score {
                continue;
            }
            results.push((photo_id, score));
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<Vec<(i64, f32)>>> {
        queries.iter().map(|q| self.search(q, k, min_score)).collect()
    }

    /// Persist index, metadata, and stats.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.write();
        if !inner.dirty {
            return Ok(());
        }

        persist::write_index(&self.config.index_path(), &inner.repr)?;
        persist::write_metadata(
            &self.config.metadata_path(),
            &IndexMetadata {
                dimension: self.config.dimension,
                saved_at: crate::db::now_timestamp(),
                id_to_pos: inner.id_to_pos.clone(),
            },
        )?;
        let stats = stats_of(&inner, &self.config);
        persist::write_stats(&self.config.stats_path(), &stats)?;

        inner.dirty = false;
        inner.unsaved_additions = 0;
        tracing::debug!(path = %self.config.index_path().display(), "Vector index saved");
        Ok(())
    }

    /// Rebuild from authoritative store data, dropping all tombstones
    /// and re-choosing the representation for the new population.
    pub fn rebuild_from(&self, records: &[(i64, Vec<f32>)]) -> Result<()> {
        let (repr, id_to_pos, pos_to_id) = build_repr(self.config.dimension, records)?;

        let mut inner = self.write();
        inner.repr = repr;
        inner.id_to_pos = id_to_pos;
        inner.pos_to_id = pos_to_id;
        inner.dirty = true;
        inner.needs_rebuild = false;
        inner.last_optimization = Some(chrono::Utc::now());
        drop(inner);

        self.save()?;
        tracing::info!(vectors = records.len(), "Vector index rebuilt from store");
        Ok(())
    }

    /// Fraction of index slots that are tombstones.
    pub fn tombstone_ratio(&self) -> f32 {
        let inner = self.read();
        let total = inner.repr.ntotal();
        if total == 0 {
            return 0.0;
        }
        (total - inner.id_to_pos.len()) as f32 / total as f32
    }

    /// Whether an adaptive retraining pass should be scheduled now.
    pub fn should_auto_optimize(&self) -> bool {
        if self.optimizing.load(Ordering::SeqCst) {
            return false;
        }
        let inner = self.read();
        if inner.id_to_pos.len() <= self.config.auto_optimize_threshold
            && self.tombstone_ratio_of(&inner) <= 0.2
        {
            return false;
        }
        match inner.last_optimization {
            Some(last) => {
                let elapsed = chrono::Utc::now() - last;
                elapsed.num_seconds() > self.config.optimize_cooldown_secs
            }
            None => true,
        }
    }

    fn tombstone_ratio_of(&self, inner: &Inner) -> f32 {
        let total = inner.repr.ntotal();
        if total == 0 {
            return 0.0;
        }
        (total - inner.id_to_pos.len()) as f32 / total as f32
    }

    /// Retrain in place: reconstruct live vectors, rebuild with the
    /// representation for the live population, atomically replace the
    /// on-disk file, then swap the in-memory index. Heavy work happens
    /// outside the write lock. Returns false when another optimization
    /// is already in flight (unless forced there is also a population
    /// and cooldown gate in `should_auto_optimize`).
    pub fn optimize(&self, force: bool) -> Result<bool> {
        if !force && !self.should_auto_optimize() {
            return Ok(false);
        }
        if self
            .optimizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        let result = self.optimize_inner();
        self.optimizing.store(false, Ordering::SeqCst);
        result.map(|_| true)
    }

    fn optimize_inner(&self) -> Result<()> {
        // Snapshot live vectors under the read lock.
        let live: Vec<(i64, Vec<f32>)> = {
            let inner = self.read();
            let pos_to_id = &inner.pos_to_id;
            inner
                .repr
                .entries()
                .into_iter()
                .filter_map(|(pos, vector)| pos_to_id.get(&pos).map(|id| (*id, vector)))
                .collect()
        };

        // Build the replacement off-lock.
        let (repr, id_to_pos, pos_to_id) = build_repr(self.config.dimension, &live)?;

        // Stage the new index to a side file, then rename over the
        // live one before swapping in memory.
        persist::write_index(&self.config.index_path(), &repr)?;
        persist::write_metadata(
            &self.config.metadata_path(),
            &IndexMetadata {
                dimension: self.config.dimension,
                saved_at: crate::db::now_timestamp(),
                id_to_pos: id_to_pos.clone(),
            },
        )?;

        let mut inner = self.write();
        inner.repr = repr;
        inner.id_to_pos = id_to_pos;
        inner.pos_to_id = pos_to_id;
        inner.last_optimization = Some(chrono::Utc::now());
        inner.dirty = false;
        inner.unsaved_additions = 0;
        let stats = stats_of(&inner, &self.config);
        drop(inner);

        persist::write_stats(&self.config.stats_path(), &stats)?;
        tracing::info!(vectors = live_count(&stats), kind = ?stats.kind, "Vector index optimized");
        Ok(())
    }

    /// Schedule an asynchronous optimization if thresholds allow.
    pub fn maybe_spawn_optimize(self: &Arc<Self>) {
        if !self.should_auto_optimize() {
            return;
        }
        let index = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = index.optimize(false) {
                tracing::error!(error = %e, "Background index optimization failed");
            }
        });
    }

    pub fn stats(&self) -> IndexStats {
        stats_of(&self.read(), &self.config)
    }

    pub fn live_count(&self) -> usize {
        self.read().id_to_pos.len()
    }
}

fn live_count(stats: &IndexStats) -> usize {
    stats.live_vectors
}

fn stats_of(inner: &Inner, config: &VectorIndexConfig) -> IndexStats {
    IndexStats {
        total_vectors: inner.repr.ntotal(),
        live_vectors: inner.id_to_pos.len(),
        deleted_vectors: inner.repr.ntotal() - inner.id_to_pos.len(),
        dimension: config.dimension,
        kind: inner.repr.kind(),
        nlist: inner.repr.nlist(),
        nprobe: inner.repr.nprobe(),
        unsaved_additions: inner.unsaved_additions,
        last_optimization: inner
            .last_optimization
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
    }
}

/// Build a representation (and id maps) for the given records, choosing
/// the class by population.
fn build_repr(
    dimension: usize,
    records: &[(i64, Vec<f32>)],
) -> Result<(Repr, HashMap<i64, usize>, HashMap<usize, i64>)> {
    let n = records.len();
    let kind = IndexKind::for_population(n);

    let mut repr = match kind {
        IndexKind::Flat => Repr::Flat(flat::FlatIndex::new(dimension)),
        IndexKind::IvfFlat | IndexKind::IvfPq => {
            let nlist = nlist_for(n);
            let nprobe = nprobe_for(nlist);
            let training = training_matrix(dimension, records)?;
            if kind == IndexKind::IvfFlat {
                Repr::IvfFlat(ivf::IvfFlatIndex::train(training.view(), nlist, nprobe))
            } else {
                Repr::IvfPq(pq::IvfPqIndex::train(
                    training.view(),
                    nlist,
                    nprobe,
                    pq::DEFAULT_SUBQUANTIZERS,
                ))
            }
        }
    };

    let mut id_to_pos = HashMap::with_capacity(n);
    let mut pos_to_id = HashMap::with_capacity(n);
    for (photo_id, vector) in records {
        if vector.len() != dimension {
            return Err(Error::Invalid(format!(
                "stored embedding for photo {photo_id} has dimension {}, expected {dimension}",
                vector.len()
            )));
        }
        let vector = normalize(vector)?;
        let position = repr.add(&vector);
        id_to_pos.insert(*photo_id, position);
        pos_to_id.insert(position, *photo_id);
    }

    Ok((repr, id_to_pos, pos_to_id))
}

/// Evenly spaced training sample, capped so retraining stays bounded.
fn training_matrix(dimension: usize, records: &[(i64, Vec<f32>)]) -> Result<Array2<f32>> {
    const TRAINING_CAP: usize = 20_000;

    let n = records.len().min(TRAINING_CAP);
    let mut flat = Vec::with_capacity(n * dimension);
    for i in 0..n {
        let src = (i * records.len()) / n;
        let vector = normalize(&records[src].1)?;
        flat.extend(vector);
    }
    Array2::from_shape_vec((n, dimension), flat)
        .map_err(|e| Error::Invalid(format!("bad training data shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path, dimension: usize) -> VectorIndexConfig {
        let mut config = VectorIndexConfig::new(dir.to_path_buf());
        config.dimension = dimension;
        config
    }

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis % dimension] = 1.0;
        v
    }

    #[test]
    fn test_representation_classes() {
        assert_eq!(IndexKind::for_population(10), IndexKind::Flat);
        assert_eq!(IndexKind::for_population(50_000), IndexKind::Flat);
        assert_eq!(IndexKind::for_population(50_001), IndexKind::IvfFlat);
        assert_eq!(IndexKind::for_population(200_000), IndexKind::IvfFlat);
        assert_eq!(IndexKind::for_population(250_000), IndexKind::IvfPq);
    }

    #[test]
    fn test_nlist_nprobe_rules() {
        // clamp(sqrt(250000), 100, 4096) = 500, nprobe = min(100, 125)
        assert_eq!(nlist_for(250_000), 500);
        assert_eq!(nprobe_for(500), 100);
        assert_eq!(nlist_for(5_000), 100);
        assert_eq!(nprobe_for(100), 25);
        assert_eq!(nlist_for(100_000_000), 4096);
    }

    #[test]
    fn test_add_search_remove() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();

        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();

        let hits = index.search(&unit(4, 0), 5, 0.0).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);

        // Lazy delete: id disappears from results, slot stays.
        assert!(index.remove(1));
        let hits = index.search(&unit(4, 0), 5, -1.0).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 1));
        assert_eq!(index.stats().total_vectors, 2);
        assert_eq!(index.stats().deleted_vectors, 1);
    }

    #[test]
    fn test_min_score_filters() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();

        let hits = index.search(&unit(4, 0), 5, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_unnormalized_input_accepted_zero_rejected() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 2)).unwrap();

        index.add(1, &[3.0, 4.0]).unwrap();
        let hits = index.search(&[30.0, 40.0], 1, 0.0).unwrap();
        assert!((hits[0].1 - 1.0).abs() < 1e-5);

        assert!(index.add(2, &[0.0, 0.0]).is_err());
        assert!(index.search(&[f32::NAN, 1.0], 1, 0.0).is_err());
    }

    #[test]
    fn test_replace_existing_id() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        index.add(1, &unit(4, 0)).unwrap();
        index.add(1, &unit(4, 1)).unwrap();

        assert_eq!(index.live_count(), 1);
        let hits = index.search(&unit(4, 1), 1, 0.0).unwrap();
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_batch_search() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        index.add(1, &unit(4, 0)).unwrap();
        index.add(2, &unit(4, 1)).unwrap();

        let results = index
            .batch_search(&[unit(4, 0), unit(4, 1)], 1, 0.0)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].0, 1);
        assert_eq!(results[1][0].0, 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        {
            let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
            index.add(7, &unit(4, 2)).unwrap();
            index.save().unwrap();
        }
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        assert_eq!(index.live_count(), 1);
        let hits = index.search(&unit(4, 2), 1, 0.0).unwrap();
        assert_eq!(hits[0].0, 7);
    }

    #[test]
    fn test_dimension_mismatch_marks_rebuild() {
        let dir = tempdir().unwrap();
        {
            let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
            index.add(7, &unit(4, 2)).unwrap();
            index.save().unwrap();
        }
        let index = VectorIndex::open(test_config(dir.path(), 8)).unwrap();
        assert!(index.needs_rebuild());
        assert_eq!(index.live_count(), 0);
    }

    #[test]
    fn test_optimize_drops_tombstones() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        for i in 0..10 {
            index.add(i, &unit(4, i as usize)).unwrap();
        }
        for i in 0..5 {
            index.remove(i);
        }
        assert_eq!(index.stats().deleted_vectors, 5);

        assert!(index.optimize(true).unwrap());
        let stats = index.stats();
        assert_eq!(stats.deleted_vectors, 0);
        assert_eq!(stats.live_vectors, 5);
        assert!(stats.last_optimization.is_some());

        let hits = index.search(&unit(4, 1), 10, -1.0).unwrap();
        assert!(hits.iter().all(|(id, _)| *id >= 5));
    }

    #[test]
    fn test_rebuild_from_store_records() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::open(test_config(dir.path(), 4)).unwrap();
        index.add(99, &unit(4, 0)).unwrap();

        let records = vec![(1i64, unit(4, 0)), (2, unit(4, 1))];
        index.rebuild_from(&records).unwrap();

        assert_eq!(index.live_count(), 2);
        assert!(!index.contains(99));
        let hits = index.search(&unit(4, 1), 1, 0.0).unwrap();
        assert_eq!(hits[0].0, 2);
    }
}
