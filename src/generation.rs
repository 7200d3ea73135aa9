//! Streaming text generation.
//!
//! A [`Generator`] turns a rendered prompt into a [`FragmentStream`]: an
//! async stream of answer deltas. The caller accumulates deltas by
//! concatenation. The stream ends with `None` after the model reports
//! completion, or yields one `Err` and stops if anything fails on the way,
//! in which case whatever was received so far is a truncated answer.
//!
//! [`OllamaGenerator`] talks to `POST /api/generate`, which answers with
//! newline-delimited JSON objects:
//!
//! ```text
//! {"model":"llama3","response":"The","done":false}
//! {"model":"llama3","response":" answer","done":false}
//! {"model":"llama3","response":"","done":true,"done_reason":"stop"}
//! ```

use anyhow::{bail, Context, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Answer deltas, in order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    /// Start generating. Errors returned here mean the model could not be
    /// reached at all; errors inside the stream mean it failed midway.
    async fn stream(&self, prompt: String) -> Result<FragmentStream>;
}

/// Create the [`Generator`] named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        // Idle limits only: a stream that keeps producing is never cut off.
        let idle = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(idle)
            .read_timeout(idle)
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, prompt: String) -> Result<FragmentStream> {
        let endpoint = format!("{}/api/generate", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "options": { "temperature": self.temperature },
        });

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "requesting generation");
        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Generation service unreachable ({})", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Generation API error {}: {}", status, text);
        }

        Ok(ndjson_fragments(response.bytes_stream()))
    }
}

/// One parsed line of an Ollama generate stream.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Blank,
    Delta(String),
    Done(String),
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

fn parse_line(line: &[u8]) -> Result<StreamLine> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(StreamLine::Blank);
    }
    let chunk: GenerateChunk =
        serde_json::from_slice(line).context("Malformed line in generation stream")?;
    if let Some(error) = chunk.error {
        bail!("Generation failed: {}", error);
    }
    Ok(if chunk.done {
        StreamLine::Done(chunk.response)
    } else {
        StreamLine::Delta(chunk.response)
    })
}

/// Re-frame a byte stream of newline-delimited JSON into answer deltas.
///
/// Network chunks may split lines anywhere, including inside a multi-byte
/// character, so bytes are buffered until a full line is available. A
/// stream that ends without a `done` line is an error.
pub fn ndjson_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    Box::pin(stream! {
        let mut bytes = Box::pin(bytes);
        let mut buf: Vec<u8> = Vec::new();
        let mut finished = false;

        'read: while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(chunk.as_ref()),
                Err(e) => {
                    let e: anyhow::Error = e.into();
                    yield Err(e.context("Generation stream interrupted"));
                    return;
                }
            }
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(StreamLine::Blank) => {}
                    Ok(StreamLine::Delta(text)) => {
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Ok(StreamLine::Done(text)) => {
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                        finished = true;
                        break 'read;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if !finished {
            // The last line may arrive without a trailing newline.
            match parse_line(&buf) {
                Ok(StreamLine::Done(text)) => {
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Ok(StreamLine::Delta(_)) | Ok(StreamLine::Blank) => {
                    yield Err(anyhow::anyhow!("Generation stream ended before completion"));
                }
                Err(e) => yield Err(e),
            }
        }
    })
}
