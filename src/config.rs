//! TOML configuration.
//!
//! Every path the store touches is derived from [`StoreConfig::dir`], which is
//! always passed in explicitly; there is no process-wide default location.
//!
//! ```toml
//! [store]
//! dir = "/home/me/journal/.beats"
//! id_prefix = "beat"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [hooks]
//! enabled = true
//! threshold = 5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::DEFAULT_ID_PREFIX;

/// Canonical log file name inside the store directory.
pub const LOG_FILE: &str = "beats.jsonl";
/// Default full-text index database file name.
pub const INDEX_FILE: &str = "beats.db";
/// Config file looked up inside the store directory.
pub const CONFIG_FILE: &str = "beats.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_id_prefix() -> String {
    DEFAULT_ID_PREFIX.to_string()
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            id_prefix: default_id_prefix(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    /// Full-text index database. Defaults to `<store.dir>/beats.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    10
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> i64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct HooksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// `"file"` writes `synthesis_needed.json`; `"script"` runs [`HooksConfig::script`].
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub script: Option<PathBuf>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_threshold(),
            action: default_action(),
            script: None,
        }
    }
}

fn default_threshold() -> usize {
    5
}
fn default_action() -> String {
    "file".to_string()
}

impl Config {
    /// Defaults for a store directory, used when no config file exists.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(dir),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            hooks: HooksConfig::default(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index
            .path
            .clone()
            .unwrap_or_else(|| self.store.dir.join(INDEX_FILE))
    }

    pub fn validate(&self) -> Result<()> {
        let prefix = &self.store.id_prefix;
        if prefix.is_empty() || prefix.contains('-') {
            bail!("store.id_prefix must be non-empty and must not contain '-'");
        }

        if self.retrieval.max_results < 1 {
            bail!("retrieval.max_results must be >= 1");
        }

        if self.embedding.dims == 0 {
            bail!("embedding.dims must be > 0");
        }
        if !(1..=60).contains(&self.embedding.timeout_secs) {
            bail!("embedding.timeout_secs must be between 1 and 60");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    bail!("embedding.model must be specified when provider is 'openai'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }

        if self.hooks.threshold == 0 {
            bail!("hooks.threshold must be >= 1");
        }
        match self.hooks.action.as_str() {
            "file" => {}
            "script" => {
                if self.hooks.script.is_none() {
                    bail!("hooks.script must be set when hooks.action is 'script'");
                }
            }
            other => bail!("Unknown hooks.action: '{}'. Must be file or script.", other),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(tmp: &TempDir, body: &str) -> PathBuf {
        let path = tmp.path().join("beats.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[store]\ndir = \"/tmp/journal\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.store.id_prefix, "beat");
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.retrieval.max_results, 20);
        assert!(!config.hooks.enabled);
        assert_eq!(config.index_path(), PathBuf::from("/tmp/journal/beats.db"));
    }

    #[test]
    fn test_rejects_prefix_with_dash() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[store]\ndir = \"/tmp/j\"\nid_prefix = \"my-beat\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[store]\ndir = \"/tmp/j\"\n[embedding]\nprovider = \"magic\"\n",
        );
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_unbounded_timeout() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[store]\ndir = \"/tmp/j\"\n[embedding]\nprovider = \"ollama\"\ntimeout_secs = 0\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_script_hook_requires_script() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[store]\ndir = \"/tmp/j\"\n[hooks]\nenabled = true\naction = \"script\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_for_dir_is_valid() {
        let config = Config::for_dir("/tmp/somewhere");
        config.validate().unwrap();
        assert_eq!(
            config.store.log_path(),
            PathBuf::from("/tmp/somewhere/beats.jsonl")
        );
    }
}
