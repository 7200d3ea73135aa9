//! Retrieval + generation.
//!
//! [`AnswerChain::answer`] retrieves the top-k chunks for a question, joins
//! their text (best first, separated by blank lines) into a context block,
//! renders the prompt template and starts a streaming generation. It has no
//! side effects of its own: recording the exchange is up to the caller,
//! and only once the stream has completed.

use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;

use crate::config::{CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER};
use crate::generation::{FragmentStream, Generator};
use crate::models::RetrievedChunk;
use crate::retriever::Retriever;

pub struct AnswerChain {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    template: String,
}

/// An answer in flight: the chunks it was grounded on and the deltas still
/// to come.
pub struct Answer {
    pub sources: Vec<RetrievedChunk>,
    pub fragments: FragmentStream,
}

impl Answer {
    /// Drain the stream, concatenating deltas into the final text.
    pub async fn collect(self) -> Result<String> {
        self.collect_with(|_| {}).await
    }

    /// Like [`Answer::collect`], handing each delta to `on_fragment` as it
    /// arrives. On error the deltas already delivered are a truncated
    /// answer.
    pub async fn collect_with(mut self, mut on_fragment: impl FnMut(&str)) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.fragments.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            text.push_str(&fragment);
        }
        Ok(text)
    }
}

impl AnswerChain {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>, template: String) -> Self {
        Self {
            retriever,
            generator,
            template,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let sources = self.retriever.retrieve(question).await?;
        let context = format_context(&sources);
        let prompt = render_prompt(&self.template, &context, question);
        tracing::debug!(
            sources = sources.len(),
            generator = self.generator.model_name(),
            "generating answer"
        );
        let fragments = self.generator.stream(prompt).await?;
        Ok(Answer { sources, fragments })
    }
}

/// Chunk texts in retrieval order, separated by blank lines.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Substitute `{context}` and `{question}` in a single left-to-right pass.
///
/// Substituted text is never rescanned, so placeholders appearing inside
/// the context or the question come through verbatim.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    loop {
        let next = [(CONTEXT_PLACEHOLDER, context), (QUESTION_PLACEHOLDER, question)]
            .into_iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder).map(|at| (at, placeholder, value))
            })
            .min_by_key(|(at, _, _)| *at);
        match next {
            Some((at, placeholder, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + placeholder.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}
