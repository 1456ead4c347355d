//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\music-dedupe\config.toml
//! - macOS: ~/Library/Application Support/music-dedupe/config.toml
//! - Linux: ~/.config/music-dedupe/config.toml
//!
//! The config file is human-readable and editable. CLI flags override
//! whatever is loaded here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_DIR: &str = "music-dedupe";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Duplicate detection settings
    pub duplicates: DuplicatesConfig,

    /// Tag cache settings
    pub cache: CacheConfig,

    /// Library settings
    pub library: LibraryConfig,
}

/// Duplicate detection and deletion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicatesConfig {
    /// Group by title and artist instead of title alone
    pub match_artist: bool,

    /// Send deleted duplicates to the trash instead of removing them
    pub use_trash: bool,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self {
            match_artist: false,
            use_trash: true,
        }
    }
}

/// Tag cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether tag reads are cached at all
    pub enabled: bool,

    /// Cache database location (None = OS data directory)
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    /// Resolve the cache database path, or None when caching is disabled.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        self.path.clone().or_else(default_cache_path)
    }
}

/// Library management settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Last scanned path; `scan` and `clean` default to it
    pub last_scan_path: Option<PathBuf>,
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Default location of the tag cache database
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR).join("tag_cache.db"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!(target: "config", "Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::debug!(target: "config", path = %path.display(), "No config file found, using defaults");
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!(target: "config", path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                tracing::error!(target: "config", path = %path.display(), error = %e, "Failed to parse config file");
                tracing::warn!(target: "config", "Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!(target: "config", path = %path.display(), error = %e, "Failed to read config file");
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &dir.join("config.toml"))
}

/// Save configuration to an explicit file path (write to temp, then rename).
pub fn save_to(config: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!(target: "config", path = %path.display(), "Saved config");
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
