use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration assembled from environment variables with
/// documented defaults. User-mutable settings (roots, face toggle,
/// batch size) live in the settings table, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of all persisted state: photos.db, index/, logs/.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Cache root; thumbnails default to a subdirectory of this.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Thumbnail cache root, content-addressed by SHA-1.
    #[serde(default)]
    pub thumbnails_dir: Option<PathBuf>,

    /// Bounded parallelism for CPU-heavy pipeline work.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Batch size for descriptor phases.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub debug: bool,

    /// Face detection and search are opt-in.
    #[serde(default)]
    pub face_search_enabled: bool,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub trash: TrashConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashConfig {
    #[serde(default = "default_trash_path")]
    pub path: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5550
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photex")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("photex")
}

fn default_max_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "tiff", "heic", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_trash_path() -> PathBuf {
    default_data_dir().join(".trash")
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

impl Default for TrashConfig {
    fn default() -> Self {
        Self {
            path: default_trash_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            thumbnails_dir: None,
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            log_level: default_log_level(),
            debug: false,
            face_search_enabled: false,
            scanner: ScannerConfig::default(),
            trash: TrashConfig::default(),
        }
    }
}

impl Config {
    /// Build config from an optional TOML file (`PHOTEX_CONFIG`), with
    /// environment variables overriding file values. Unparseable
    /// numeric keys are a config error (exit code 1), not a silent
    /// default.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("PHOTEX_CONFIG") {
            Ok(path) => Self::load_from(Path::new(&path))?,
            Err(_) => Config::default(),
        };

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("invalid PORT value: {port}"))?;
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("THUMBNAILS_DIR") {
            config.thumbnails_dir = Some(PathBuf::from(dir));
        }
        if let Ok(workers) = std::env::var("MAX_WORKERS") {
            config.max_workers = workers
                .parse()
                .with_context(|| format!("invalid MAX_WORKERS value: {workers}"))?;
        }
        if let Ok(batch) = std::env::var("BATCH_SIZE") {
            config.batch_size = batch
                .parse()
                .with_context(|| format!("invalid BATCH_SIZE value: {batch}"))?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(debug) = std::env::var("DEBUG") {
            config.debug = matches!(debug.as_str(), "1" | "true" | "yes");
        }
        if let Ok(faces) = std::env::var("FACE_SEARCH_ENABLED") {
            config.face_search_enabled = matches!(faces.as_str(), "1" | "true" | "yes");
        }

        if config.max_workers == 0 {
            anyhow::bail!("MAX_WORKERS must be at least 1");
        }

        config.trash.path = config.data_dir.join(".trash");

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("photos.db")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.thumbnails_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("thumbs"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
