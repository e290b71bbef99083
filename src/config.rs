use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use crate::indexer::DEFAULT_EXTENSION;
use crate::query::SortMode;
use crate::relevance::RelevanceKind;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub display: DisplayConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    // Defaults to ~/.cch/history.db
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    // Defaults to ~/.claude/projects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<PathBuf>,
    pub log_extension: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SearchConfig {
    pub default_sort: SortMode,
    pub relevance: RelevanceKind,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub max_results: usize,
    pub language: String,
    pub color: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    // Index new log entries before every list/search
    pub auto_sync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            source_root: None,
            log_extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            language: "auto".to_string(),
            color: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { auto_sync: true }
    }
}

impl Config {
    /// Load `~/.cch/config.toml`, writing the defaults on first run.
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Config::default();
            // A read-only home must not block queries.
            if let Err(e) = config.save_to(&config_path) {
                log::warn!("could not write default config: {:#}", e);
            }
            Ok(config)
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cch")
    }

    fn get_config_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    /// Database path: `CCH_DB`, then config, then the data dir.
    pub fn db_path(&self) -> PathBuf {
        env_path("CCH_DB")
            .or_else(|| self.storage.db_path.as_deref().map(expand_home))
            .unwrap_or_else(|| Self::data_dir().join("history.db"))
    }

    /// Session log root: `CCH_SOURCE`, then config, then `~/.claude/projects`.
    pub fn source_root(&self) -> PathBuf {
        env_path("CCH_SOURCE")
            .or_else(|| self.storage.source_root.as_deref().map(expand_home))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".claude")
                    .join("projects")
            })
    }

    pub fn auto_sync(&self) -> bool {
        match std::env::var("CCH_NO_SYNC") {
            Ok(v) => {
                let v = v.to_lowercase();
                v == "0" || v == "false"
            }
            Err(_) => self.sync.auto_sync,
        }
    }

    pub fn get_effective_language(&self) -> String {
        if self.display.language == "auto" {
            std::env::var("LANG")
                .unwrap_or_else(|_| "en_US".to_string())
                .split('.')
                .next()
                .unwrap_or("en")
                .to_string()
        } else {
            self.display.language.clone()
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(|v| expand_home(Path::new(&v)))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
