use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub cache: Option<CacheConfig>,
    pub query: Option<QueryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    pub requests_per_second: Option<u32>,
    /// Report `(done, total)` progress while batches are searched.
    pub progress: Option<bool>,
}

/// Platform config directory path: `<config_dir>/bibstack/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibstack").join("config.toml"))
}

/// Where the cache lives when nothing else says: `<data_dir>/bibstack/cache.sqlite`,
/// or `bibstack-cache.sqlite` in the working directory on platforms without one.
pub fn default_cache_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("bibstack").join("cache.sqlite"))
        .unwrap_or_else(|| PathBuf::from("bibstack-cache.sqlite"))
}

/// Load config by cascading CWD `.bibstack.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".bibstack.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        cache: Some(CacheConfig {
            path: overlay
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .or_else(|| base.cache.as_ref().and_then(|c| c.path.clone())),
        }),
        query: Some(QueryConfig {
            requests_per_second: overlay
                .query
                .as_ref()
                .and_then(|q| q.requests_per_second)
                .or_else(|| base.query.as_ref().and_then(|q| q.requests_per_second)),
            progress: overlay
                .query
                .as_ref()
                .and_then(|q| q.progress)
                .or_else(|| base.query.as_ref().and_then(|q| q.progress)),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_to_path(config, &path)?;
    Ok(path)
}

/// Write `config` to `path`, creating parent directories as needed.
pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
}
