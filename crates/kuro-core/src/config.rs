//! Configuration types for kuro components.
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`<config_dir>/kuro/config.toml`), then CLI flags / environment variables
//! applied by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Image extensions recognised by the scanner when none are configured.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Web-visible prefix used for recorded page paths.
pub const DEFAULT_PAGE_URL_PREFIX: &str = "/storage/manga";

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// Indexer configuration: where content lives and how often it is rescanned.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Root of the content tree (`{root}/{slug}/{chapter}/{image}`).
    pub content_root: PathBuf,
    /// Directory for run records, created on demand.
    pub run_logs_path: PathBuf,
    /// Prefix of the path stored on each page row.
    pub page_url_prefix: String,
    /// Lowercase extensions, without the dot.
    pub image_extensions: Vec<String>,
    /// Minimum time between two reconciliation passes without `force`.
    pub index_window: Duration,
    /// Minimum time between two consistency checks without `force`.
    pub health_window: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("storage/manga"),
            run_logs_path: PathBuf::from("storage/run_logs"),
            page_url_prefix: DEFAULT_PAGE_URL_PREFIX.to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            index_window: Duration::from_secs(60),
            health_window: Duration::from_secs(30),
        }
    }
}

impl IndexerConfig {
    /// Builds a config for the given roots, keeping every other default.
    pub fn new(content_root: impl Into<PathBuf>, run_logs_path: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            run_logs_path: run_logs_path.into(),
            ..Self::default()
        }
    }

    /// Applies values present in a config file on top of `self`.
    pub fn merge(mut self, file: FileConfig) -> Self {
        if let Some(root) = file.content_root {
            self.content_root = root;
        }
        if let Some(logs) = file.run_logs_path {
            self.run_logs_path = logs;
        }
        if let Some(prefix) = file.page_url_prefix {
            self.page_url_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Some(exts) = file.image_extensions {
            self.image_extensions = exts
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }
        if let Some(secs) = file.index_window_secs {
            self.index_window = Duration::from_secs(secs);
        }
        if let Some(secs) = file.health_window_secs {
            self.health_window = Duration::from_secs(secs);
        }
        self
    }
}

/// On-disk shape of `config.toml`. Every key is optional.
///
/// ```toml
/// content_root = "/srv/manga"
/// run_logs_path = "/srv/run_logs"
/// image_extensions = ["jpg", "png", "webp", "avif"]
/// index_window_secs = 120
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub content_root: Option<PathBuf>,
    pub run_logs_path: Option<PathBuf>,
    pub page_url_prefix: Option<String>,
    pub image_extensions: Option<Vec<String>>,
    pub index_window_secs: Option<u64>,
    pub health_window_secs: Option<u64>,
    pub db_max_connections: Option<u32>,
}

/// Default location of the config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kuro").join("config.toml"))
}

/// Loads a config file. A missing file yields the empty config.
pub fn load_file_config(path: &Path) -> Result<FileConfig, AppError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
}
