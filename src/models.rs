//! Core data models used throughout askdoc.
//!
//! These types represent the users, corpus chunks, and chat exchanges that
//! flow between the credential store, the indexing pipeline, the answer
//! chain, and the history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user as seen by callers of the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    /// Lowercase hex SHA-256 digest of the password.
    pub password_hash: String,
    /// Exactly 10 digits, or empty for legacy records.
    pub phone: String,
}

/// One section of the source document before chunking (a page of a PDF,
/// or the whole of a text file).
#[derive(Debug, Clone)]
pub struct SourceSection {
    pub source_id: String,
    pub text: String,
}

/// A contiguous window of a source section.
///
/// `start` is the character offset of `text` within its section, which
/// lets neighbouring chunks be stitched back together without the overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    pub source_id: String,
    pub text: String,
    /// Position of the chunk across the whole corpus, starting at 0.
    pub order: i64,
    pub start: i64,
}

/// A chunk returned by the retriever, with its cosine similarity to the
/// question.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
}

impl ChatRecord {
    /// Stamp a new exchange with the current time.
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// All three fields as a single line of text, used for history search.
    pub fn searchable_text(&self) -> String {
        format!(
            "{} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.question,
            self.answer
        )
    }
}
