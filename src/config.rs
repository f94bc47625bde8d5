//! Configuration loading and credential resolution.
//!
//! Settings live in a TOML file (default `./config/docsearch.toml`). Every
//! table has serde defaults, so a minimal file only needs the values that
//! differ. The three credentials (store endpoint, store write key and
//! embedding key) may also come from the environment, which takes
//! precedence over the file.
//!
//! ```toml
//! [source]
//! root = "docs"
//! label = "guide"
//!
//! [store]
//! url = "sqlite:./data/docsearch.sqlite"
//!
//! [embedding]
//! model = "text-embedding-ada-002"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_STORE_URL: &str = "DOCSEARCH_STORE_URL";
pub const ENV_STORE_KEY: &str = "DOCSEARCH_STORE_KEY";
pub const ENV_EMBEDDING_KEY: &str = "OPENAI_KEY";
const ENV_EMBEDDING_KEY_FALLBACK: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Root-relative file paths that are never indexed.
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            label: default_label(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            ignore: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("docs")
}
fn default_label() -> String {
    "guide".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.mdx".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite:<path>` or the base URL of a PostgREST endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default = "default_page_table")]
    pub page_table: String,
    #[serde(default = "default_section_table")]
    pub section_table: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            page_table: default_page_table(),
            section_table: default_section_table(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_page_table() -> String {
    "page".to_string()
}
fn default_section_table() -> String {
    "page_section".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            min_content_length: default_min_content_length(),
        }
    }
}

fn default_match_threshold() -> f32 {
    0.78
}
fn default_match_count() -> usize {
    10
}
fn default_min_content_length() -> usize {
    50
}

/// Where pages and sections are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// Local SQLite database file.
    Sqlite { path: PathBuf },
    /// PostgREST-compatible endpoint authenticated with a service key.
    Postgrest { url: String, service_key: String },
}

/// Fully resolved credentials required to run the pipeline.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub store: StoreTarget,
    pub embedding_key: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{} required", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
}

impl Config {
    /// Overlay credentials found in the process environment.
    pub fn apply_env(&mut self) {
        if let Some(url) = env_value(ENV_STORE_URL) {
            self.store.url = Some(url);
        }
        if let Some(key) = env_value(ENV_STORE_KEY) {
            self.store.service_key = Some(key);
        }
        if let Some(key) =
            env_value(ENV_EMBEDDING_KEY).or_else(|| env_value(ENV_EMBEDDING_KEY_FALLBACK))
        {
            self.embedding.api_key = Some(key);
        }
    }

    /// Resolve the store target and embedding key.
    ///
    /// Every missing value is reported at once so the operator can fix the
    /// configuration in a single pass.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let mut missing = Vec::new();
        let store = self.resolve_store(&mut missing);

        let embedding_key = non_empty(self.embedding.api_key.as_deref());
        if embedding_key.is_none() {
            missing.push(ENV_EMBEDDING_KEY);
        }

        match (store, embedding_key) {
            (Some(store), Some(key)) if missing.is_empty() => Ok(Credentials {
                store,
                embedding_key: key.to_string(),
            }),
            _ => Err(ConfigError::MissingCredentials(missing)),
        }
    }

    /// Resolve only the store target, for commands that never embed.
    pub fn store_target(&self) -> Result<StoreTarget, ConfigError> {
        let mut missing = Vec::new();
        self.resolve_store(&mut missing)
            .ok_or(ConfigError::MissingCredentials(missing))
    }

    fn resolve_store(&self, missing: &mut Vec<&'static str>) -> Option<StoreTarget> {
        let url = match non_empty(self.store.url.as_deref()) {
            Some(url) => url,
            None => {
                missing.push(ENV_STORE_URL);
                return None;
            }
        };

        if let Some(path) = sqlite_path(url) {
            return Some(StoreTarget::Sqlite { path });
        }
        match non_empty(self.store.service_key.as_deref()) {
            Some(key) => Some(StoreTarget::Postgrest {
                url: url.trim_end_matches('/').to_string(),
                service_key: key.to_string(),
            }),
            None => {
                missing.push(ENV_STORE_KEY);
                None
            }
        }
    }
}

/// Extract the file path from a `sqlite:` URL, or `None` for any other scheme.
pub fn sqlite_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    Some(PathBuf::from(rest))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env();

    if config.source.label.trim().is_empty() {
        anyhow::bail!("source.label must not be empty");
    }

    if config.source.include_globs.is_empty() {
        anyhow::bail!("source.include_globs must list at least one pattern");
    }

    if !(-1.0..=1.0).contains(&config.search.match_threshold) {
        anyhow::bail!("search.match_threshold must be in [-1.0, 1.0]");
    }

    if config.search.match_count == 0 {
        anyhow::bail!("search.match_count must be >= 1");
    }

    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }

    Ok(config)
}
