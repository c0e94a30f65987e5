//! TOML configuration parsing and validation.
//!
//! The configuration is loaded once at startup by [`load_config`] and passed
//! by reference into every component constructor. Nothing in the library
//! reads configuration from globals.
//!
//! Every section has defaults, so a minimal file only needs to override what
//! differs from them:
//!
//! ```toml
//! [kb]
//! dir = "./kb"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub kb: KbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            collection: default_collection(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/kb.sqlite")
}
fn default_collection() -> String {
    "kb".to_string()
}

/// Where the knowledge-base markdown files live.
#[derive(Debug, Deserialize, Clone)]
pub struct KbConfig {
    #[serde(default = "default_kb_dir")]
    pub dir: PathBuf,
    /// Glob patterns relative to `dir`. `*` does not cross `/`, so the
    /// default only picks up top-level markdown files.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            dir: default_kb_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_kb_dir() -> PathBuf {
    PathBuf::from("./kb")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Temperature for the answer step. Reranking always runs at 0.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            base_url: default_base_url(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout_secs() -> u64 {
    60
}

/// Distance function used by the vector index. Lower is always more similar.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`.
    Cosine,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of candidates fetched from the index.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Number of candidates kept after reranking.
    #[serde(default = "default_keep_n")]
    pub keep_n: usize,
    /// Refuse to answer when the best candidate is farther than this.
    /// Dataset-dependent; tune after inspecting real distances.
    #[serde(default = "default_max_best_distance")]
    pub max_best_distance: f64,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            keep_n: default_keep_n(),
            max_best_distance: default_max_best_distance(),
            metric: DistanceMetric::default(),
        }
    }
}

fn default_k() -> usize {
    12
}
fn default_keep_n() -> usize {
    5
}
fn default_max_best_distance() -> f64 {
    0.85
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.max_chars == 0 {
            bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            bail!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
                self.chunking.overlap_chars,
                self.chunking.max_chars
            );
        }

        // Validate retrieval
        if self.retrieval.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        if self.retrieval.keep_n < 1 {
            bail!("retrieval.keep_n must be >= 1");
        }
        if !self.retrieval.max_best_distance.is_finite() || self.retrieval.max_best_distance < 0.0
        {
            bail!("retrieval.max_best_distance must be a finite value >= 0");
        }

        if self.db.collection.trim().is_empty() {
            bail!("db.collection must not be empty");
        }

        // Validate embedding
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }

        // Validate generation
        match self.generation.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if self.generation.is_enabled() && self.generation.model.is_none() {
            bail!(
                "generation.model must be specified when provider is '{}'",
                self.generation.provider
            );
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}
