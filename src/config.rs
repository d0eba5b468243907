//! Configuration module for the similarity index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SIMDEX_` and use double
//! underscores to separate nested levels:
//! - `SIMDEX_INDEX__TOP_SIMS=50` sets `index.top_sims`
//! - `SIMDEX_MODEL__KIND=fastembed` sets `model.kind`
//! - `SIMDEX_LOGGING__LEVEL=debug` sets `logging.level`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::ScoreMode;

const CONFIG_DIR: &str = ".simdex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "SIMDEX_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Index layout and ranking
    #[serde(default)]
    pub index: IndexConfig,

    /// Semantic model selection
    #[serde(default)]
    pub model: ModelConfig,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Vectors per shard file
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,

    /// Peers kept in each precomputed similarity list
    #[serde(default = "default_top_sims")]
    pub top_sims: usize,

    /// Maintain similarity lists at index time
    #[serde(default = "default_true")]
    pub precompute: bool,

    /// Rows per replay chunk, bounds memory during indexing
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Rank by absolute or signed cosine similarity
    #[serde(default)]
    pub score_mode: ScoreMode,

    /// List a document as its own most similar peer
    #[serde(default = "default_true")]
    pub include_self: bool,

    /// Number of threads for scoring
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Feature hashing, no external assets
    #[default]
    Hashing,
    /// ONNX sentence embeddings (requires the `fastembed` feature)
    Fastembed,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: ModelKind,

    /// Vector dimension of the hashing model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// fastembed model name
    #[serde(default = "default_fastembed_model")]
    pub fastembed_model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueryConfig {
    /// Results below this score are cut off
    #[serde(default)]
    pub min_score: f32,

    /// Maximum results per query, 0 for no limit
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when SIMDEX_LOG and RUST_LOG are unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".simdex/index")
}
fn default_shard_size() -> usize {
    50_000
}
fn default_top_sims() -> usize {
    100
}
fn default_chunk_size() -> usize {
    256
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_true() -> bool {
    true
}
fn default_dimension() -> usize {
    256
}
fn default_fastembed_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_max_results() -> usize {
    100
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            index: IndexConfig::default(),
            model: ModelConfig::default(),
            query: QueryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shard_size: default_shard_size(),
            top_sims: default_top_sims(),
            precompute: true,
            chunk_size: default_chunk_size(),
            score_mode: ScoreMode::default(),
            include_self: true,
            parallel_threads: default_parallel_threads(),
        }
    }
}

impl IndexConfig {
    /// Rejects values the index cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.shard_size == 0 {
            return Err("index.shard_size must be at least 1".to_string());
        }
        if self.top_sims == 0 {
            return Err("index.top_sims must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return Err("index.chunk_size must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::default(),
            dimension: default_dimension(),
            fastembed_model: default_fastembed_model(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_results: default_max_results(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .simdex directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::load_from(config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .simdex directory
    /// from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .simdex is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Index directory, resolved against the workspace root when relative
    pub fn resolved_index_path(&self) -> PathBuf {
        if self.index_path.is_absolute() {
            return self.index_path.clone();
        }
        match Self::workspace_root() {
            Some(root) => root.join(&self.index_path),
            None => self.index_path.clone(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let current_dir = std::env::current_dir()?;
        Self::init_config_file_in(&current_dir, force)
    }

    /// Create a default settings file with helpful comments under `dir/.simdex`
    pub fn init_config_file_in(
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# simdex configuration file

# Version of the configuration schema
version = 1

# Path to the index directory (relative to the workspace root)
index_path = ".simdex/index"

[index]
# Vectors per shard file
shard_size = 50000

# Peers kept in each precomputed similarity list
top_sims = 100

# Maintain similarity lists while indexing. When false, queries by id scan
# the whole store instead of reading a precomputed list.
precompute = true

# Stored vectors replayed per chunk while indexing
chunk_size = 256

# "absolute" ranks by |cosine|, "signed" by the raw cosine
score_mode = "absolute"

# Report a document as its own top match
include_self = true

# Number of scoring threads (defaults to CPU count)
# parallel_threads = {}

[model]
# "hashing" needs nothing else; "fastembed" needs a build with the
# fastembed feature and downloads the model on first use
kind = "hashing"

# Vector dimension of the hashing model
dimension = 256

# Model used when kind = "fastembed"
fastembed_model = "AllMiniLML6V2"

[query]
# Results below this score are dropped
min_score = 0.0

# Maximum number of results, 0 for no limit
max_results = 100

[logging]
# Default log filter, overridden by SIMDEX_LOG or RUST_LOG
level = "warn"
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".simdex/index"));
        assert_eq!(settings.index.shard_size, 50_000);
        assert_eq!(settings.index.top_sims, 100);
        assert!(settings.index.precompute);
        assert_eq!(settings.index.score_mode, ScoreMode::Absolute);
        assert!(settings.index.parallel_threads > 0);
        assert_eq!(settings.model.kind, ModelKind::Hashing);
        settings.index.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[index]
shard_size = 1000
top_sims = 20
precompute = false
score_mode = "signed"

[model]
kind = "fastembed"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.index.shard_size, 1000);
        assert_eq!(settings.index.top_sims, 20);
        assert!(!settings.index.precompute);
        assert_eq!(settings.index.score_mode, ScoreMode::Signed);
        assert_eq!(settings.model.kind, ModelKind::Fastembed);
        // Untouched keys keep their defaults
        assert_eq!(settings.index.chunk_size, 256);
        assert_eq!(settings.model.dimension, 256);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.index.top_sims = 7;
        settings.index.include_self = false;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.index.top_sims, 7);
        assert!(!loaded.index.include_self);
    }

    #[test]
    fn test_invalid_score_mode_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[index]\nscore_mode = \"cosine\"\n").unwrap();

        assert!(Settings::load_from(&config_path).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = IndexConfig::default();
        config.top_sims = 0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::default();
        config.shard_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_parses() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();
        assert!(path.ends_with(".simdex/settings.toml"));

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Settings = toml::from_str(&content).unwrap();
        assert_eq!(parsed.index.top_sims, 100);
        assert_eq!(parsed.model.kind, ModelKind::Hashing);

        // Second init without force refuses to overwrite
        assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file_in(temp_dir.path(), true).is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[index]\nchunk_size = 64\n").unwrap();

        // Only keys no other test asserts on
        unsafe {
            std::env::set_var("SIMDEX_QUERY__MAX_RESULTS", "321");
        }

        let settings = Settings::load_from(&config_path).unwrap();

        unsafe {
            std::env::remove_var("SIMDEX_QUERY__MAX_RESULTS");
        }

        assert_eq!(settings.query.max_results, 321);
        assert_eq!(settings.index.chunk_size, 64);
    }
}
