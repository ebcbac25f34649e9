use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use photex::api::{self, AppContext};
use photex::batch::BatchManager;
use photex::config::Config;
use photex::db::Database;
use photex::error::Error;
use photex::events::{Event, EventHandler, EventQueue, EventType};
use photex::pipeline::{Pipeline, PipelineConfig};
use photex::query::QueryEngine;
use photex::trash::TrashManager;
use photex::vecindex::{BackupManager, VectorIndex, VectorIndexConfig};

fn main() {
    // Configuration problems are exit code 1, before anything else
    // starts.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = photex::logging::init(&config.log_dir(), &config.log_level) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start async runtime");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(serve(config));
    std::process::exit(exit_code);
}

async fn serve(config: Config) -> i32 {
    // The store refuses to open over corruption (exit 3) or a schema
    // written by a newer binary (exit 2).
    let db_path = config.db_path();
    let opened = tokio::task::spawn_blocking(move || Database::open(&db_path)).await;
    let db = match opened {
        Ok(Ok(db)) => Arc::new(db),
        Ok(Err(Error::Fatal { message, exit_code })) => {
            error!(error = %message, "Cannot open database");
            return exit_code;
        }
        Ok(Err(e)) => {
            error!(error = %e, "Cannot open database");
            return 3;
        }
        Err(e) => {
            error!(error = %e, "Cannot open database");
            return 3;
        }
    };

    let index = match VectorIndex::open(VectorIndexConfig::new(config.index_dir())) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!(error = %e, "Cannot open vector index");
            return 1;
        }
    };

    // Store is authoritative: a refused on-disk index is rebuilt from
    // stored embeddings before serving.
    if index.needs_rebuild() {
        info!("Rebuilding vector index from store");
        let records: Vec<(i64, Vec<f32>)> = match db.all_embeddings() {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.photo_id, r.vector))
                .collect(),
            Err(e) => {
                error!(error = %e, "Cannot read embeddings for rebuild");
                return 3;
            }
        };
        if let Err(e) = index.rebuild_from(&records) {
            error!(error = %e, "Vector index rebuild failed");
            return 1;
        }
    }

    if config.face_search_enabled {
        let _ = db.set_setting("face_search_enabled", "true");
    }

    let events = EventQueue::new(10);
    events.add_handler(
        EventType::BackupRequested,
        Arc::new(BackupHandler {
            manager: BackupManager::new(index.config()),
        }),
    );
    events.add_handler(
        EventType::OptimizationRequested,
        Arc::new(OptimizeHandler {
            index: Arc::clone(&index),
        }),
    );
    events.start();

    let models_dir = config.data_dir.join("models");
    let pipeline = Pipeline::new(
        Arc::clone(&db),
        Arc::clone(&index),
        Some(Arc::clone(&events)),
        PipelineConfig {
            max_workers: config.max_workers,
            image_extensions: config.scanner.image_extensions.clone(),
            models_dir,
            thumbnails_dir: config.thumbnails_dir(),
        },
    );

    let query = Arc::new(QueryEngine::new(
        Arc::clone(&db),
        Arc::clone(&index),
        Arc::clone(pipeline.embedding_worker()),
    ));

    let trash = Arc::new(TrashManager::new(config.trash.clone()));
    let batch = BatchManager::new(Arc::clone(&db), Arc::clone(&index), trash);

    let ctx = AppContext {
        config: Arc::new(config.clone()),
        db,
        index: Arc::clone(&index),
        pipeline,
        query,
        batch,
        events: Arc::clone(&events),
        started_at: Instant::now(),
    };

    let app = api::router(ctx);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Cannot bind");
            return 1;
        }
    };
    info!(addr = %addr, "photex listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Flush state on the way out.
    events.stop();
    if let Err(e) = index.save() {
        error!(error = %e, "Failed to save vector index on shutdown");
    }

    match serve_result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Server error");
            1
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
}

struct BackupHandler {
    manager: BackupManager,
}

impl EventHandler for BackupHandler {
    fn name(&self) -> &str {
        "index-backup"
    }

    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let name = event.data.get("name").and_then(|v| v.as_str());
            self.manager.create_backup(name)?;
            Ok(())
        })
    }
}

struct OptimizeHandler {
    index: Arc<VectorIndex>,
}

impl EventHandler for OptimizeHandler {
    fn name(&self) -> &str {
        "index-optimize"
    }

    fn handle<'a>(
        &'a self,
        _event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let index = Arc::clone(&self.index);
            tokio::task::spawn_blocking(move || index.optimize(true)).await??;
            Ok(())
        })
    }
}
