//! TOML configuration.
//!
//! Every path the assistant touches and every model it talks to comes from
//! one file, passed with `--config`. See `config/askdoc.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Placeholder replaced with the retrieved context block.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";
/// Placeholder replaced with the user's question, verbatim.
pub const QUESTION_PLACEHOLDER: &str = "{question}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// The corpus: a PDF or a UTF-8 text file.
    pub source_document: PathBuf,
    /// Persisted vector index (SQLite file).
    pub index: PathBuf,
    /// Credential store (JSON).
    pub credentials: PathBuf,
    /// One history file per user lives here.
    pub history_dir: PathBuf,
    /// Feedback notes and chat backups.
    pub feedback_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
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

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: default_ollama_url(),
            temperature: 0.0,
            timeout_secs: default_generation_timeout_secs(),
            prompt_template: default_prompt_template(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "llama3".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    300
}

/// Instruction-style template used when the config does not override it.
pub fn default_prompt_template() -> String {
    "<s>[INST] You are a document assistant.\n\n\
     {context}\n\
     You are a respectful and honest assistant. Answer the user's questions using only the \
     context provided. Answer coding-related questions with code and explanation. Do not \
     start the response with salutations, answer directly.\n\
     {question} [/INST] </s>"
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hash" | "local" => {}
        "ollama" | "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, openai, or local.",
            other
        ),
    }

    if config.generation.provider != "ollama" {
        anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama.",
            config.generation.provider
        );
    }

    let template = &config.generation.prompt_template;
    for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
        if !template.contains(placeholder) {
            anyhow::bail!("generation.prompt_template must contain {}", placeholder);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[paths]
source_document = "corpus/manual.pdf"
index = "data/index.sqlite"
credentials = "data/users.json"
history_dir = "data/history"
feedback_dir = "data/feedback"
"#;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 20);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.generation.temperature, 0.0);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let text = format!("{}\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_ollama_embedding_requires_model_and_dims() {
        let text = format!("{}\n[embedding]\nprovider = \"ollama\"\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());

        let text = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&text).unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn test_template_needs_both_placeholders() {
        let text = format!(
            "{}\n[generation]\nprompt_template = \"Answer: {{question}}\"\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&text).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let text = format!("{}\n[embedding]\nprovider = \"word2vec\"\n", MINIMAL);
        let config: Config = toml::from_str(&text).unwrap();
        assert!(validate(&config).is_err());
    }
}
