//! Single global indexing state machine behind a typed async guard.
//!
//! ```text
//! idle --start--> indexing --(all phases ok)--> completed --> idle
//!   ^                |                                         |
//!   |                +--cancel---> stopped ----------> idle    |
//!   |                +--fatal----> error ------------> idle    |
//!   +---------------------------------------------------------+
//! ```
//!
//! `start` is only rejected while a run is active; completed / stopped /
//! error are terminal snapshots that the next start resets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Indexing,
    Completed,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Exif,
    Embedding,
    Thumbnail,
    Face,
}

/// Progress in work units: one unit is one photo passing through one
/// descriptor phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub total_files: usize,
    pub processed_files: usize,
    pub current_phase: Option<Phase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: RunState,
    pub progress: Progress,
    pub errors: Vec<String>,
    pub started_at: Option<String>,
    pub estimated_completion: Option<String>,
}

const MAX_RECORDED_ERRORS: usize = 100;

#[derive(Debug)]
struct Inner {
    state: RunState,
    progress: Progress,
    errors: Vec<String>,
    dropped_errors: usize,
    started_at: Option<DateTime<Utc>>,
}

/// Typed guard over the pipeline state. All mutation goes through
/// these async operations; the cancel flag is shared with workers for
/// per-photo polling.
pub struct PipelineState {
    inner: RwLock<Inner>,
    cancel: Arc<AtomicBool>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: RunState::Idle,
                progress: Progress::default(),
                errors: Vec::new(),
                dropped_errors: 0,
                started_at: None,
            }),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Transition into `indexing`. Any active run is a conflict and
    /// leaves the state untouched.
    pub async fn begin_run(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == RunState::Indexing {
            return Err(Error::Conflict("indexing is already running".to_string()));
        }
        inner.state = RunState::Indexing;
        inner.progress = Progress::default();
        inner.errors.clear();
        inner.dropped_errors = 0;
        inner.started_at = Some(Utc::now());
        self.cancel.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Request cooperative cancellation of the active run.
    pub async fn request_stop(&self) -> Result<()> {
        let inner = self.inner.read().await;
        if inner.state != RunState::Indexing {
            return Err(Error::BadRequest("indexing is not running".to_string()));
        }
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn enter_phase(&self, phase: Phase) {
        let mut inner = self.inner.write().await;
        inner.progress.current_phase = Some(phase);
    }

    pub async fn add_work(&self, units: usize) {
        let mut inner = self.inner.write().await;
        inner.progress.total_files += units;
    }

    pub async fn record_processed(&self, units: usize) {
        let mut inner = self.inner.write().await;
        inner.progress.processed_files += units;
    }

    /// Per-item and phase-global errors accumulate here; the run keeps
    /// going. Only the first hundred are kept verbatim.
    pub async fn record_error(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if inner.errors.len() < MAX_RECORDED_ERRORS {
            inner.errors.push(error.into());
        } else {
            inner.dropped_errors += 1;
        }
    }

    /// Transition to a terminal state.
    pub async fn finish(&self, state: RunState) {
        debug_assert!(matches!(
            state,
            RunState::Completed | RunState::Stopped | RunState::Error
        ));
        let mut inner = self.inner.write().await;
        inner.state = state;
        inner.progress.current_phase = None;
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;

        let mut errors = inner.errors.clone();
        if inner.dropped_errors > 0 {
            errors.push(format!("... and {} more errors", inner.dropped_errors));
        }

        StatusSnapshot {
            status: inner.state,
            progress: inner.progress.clone(),
            errors,
            started_at: inner
                .started_at
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            estimated_completion: estimate_completion(&inner),
        }
    }

    pub async fn current_state(&self) -> RunState {
        self.inner.read().await.state
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// `started_at + elapsed * total / processed`, defined once any work
/// has been processed.
fn estimate_completion(inner: &Inner) -> Option<String> {
    if inner.state != RunState::Indexing {
        return None;
    }
    let started = inner.started_at?;
    let processed = inner.progress.processed_files;
    let total = inner.progress.total_files;
    if processed == 0 || total == 0 {
        return None;
    }

    let elapsed = Utc::now() - started;
    let scale = total as f64 / processed as f64;
    let projected_secs = elapsed.num_milliseconds() as f64 / 1000.0 * scale;
    let completion = started + chrono::Duration::milliseconds((projected_secs * 1000.0) as i64);
    Some(completion.format("%Y-%m-%dT%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_conflict_while_indexing() {
        let state = PipelineState::new();
        state.begin_run().await.unwrap();

        let err = state.begin_run().await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        // State unchanged by the rejected start.
        assert_eq!(state.current_state().await, RunState::Indexing);
    }

    #[tokio::test]
    async fn test_restart_after_terminal_states() {
        let state = PipelineState::new();
        for terminal in [RunState::Completed, RunState::Stopped, RunState::Error] {
            state.begin_run().await.unwrap();
            state.finish(terminal).await;
            assert_eq!(state.current_state().await, terminal);
        }
        state.begin_run().await.unwrap();
        assert_eq!(state.current_state().await, RunState::Indexing);
    }

    #[tokio::test]
    async fn test_stop_requires_active_run() {
        let state = PipelineState::new();
        assert!(state.request_stop().await.is_err());

        state.begin_run().await.unwrap();
        state.request_stop().await.unwrap();
        assert!(state.is_cancelled());

        // A fresh run clears the flag.
        state.finish(RunState::Stopped).await;
        state.begin_run().await.unwrap();
        assert!(!state.is_cancelled());
    }

    #[tokio::test]
    async fn test_progress_and_snapshot() {
        let state = PipelineState::new();
        state.begin_run().await.unwrap();
        state.enter_phase(Phase::Exif).await;
        state.add_work(10).await;
        state.record_processed(3).await;
        state.record_error("boom").await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.progress.total_files, 10);
        assert_eq!(snapshot.progress.processed_files, 3);
        assert_eq!(snapshot.progress.current_phase, Some(Phase::Exif));
        assert_eq!(snapshot.errors, vec!["boom"]);
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.estimated_completion.is_some());
    }

    #[tokio::test]
    async fn test_error_cap() {
        let state = PipelineState::new();
        state.begin_run().await.unwrap();
        for i in 0..150 {
            state.record_error(format!("err {i}")).await;
        }
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.errors.len(), MAX_RECORDED_ERRORS + 1);
        assert!(snapshot.errors.last().unwrap().contains("50 more"));
    }
}
