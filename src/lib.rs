//! # askdoc
//!
//! A local-first document Q&A assistant. Registered users ask questions in
//! natural language; answers are generated by a language model from the
//! passages of a fixed corpus that are most similar to the question
//! (retrieval-augmented generation), and every exchange is kept in a
//! per-user history.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Source doc │──▶│ Chunk+Embed  │──▶│ SQLite index │
//! │  PDF/text  │   │              │   │  (vectors)   │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            ▼
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Credential │──▶│   Session    │──▶│ Answer chain │──▶ streamed answer
//! │   store    │   │              │   │ (retriever + │
//! └────────────┘   └──────┬───────┘   │  generator)  │
//!                         ▼           └──────────────┘
//!                  ┌──────────────┐
//!                  │   History    │
//!                  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askdoc register alice --password pw123 --phone 5551234567
//! askdoc index                                   # build the vector index
//! askdoc ask "How do routers work?" --user alice --password pw123
//! askdoc chat --user alice --password pw123      # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`credentials`] | User registration, login, password reset |
//! | [`extract`] | Source document loading (PDF, text) |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index build, persistence, k-NN |
//! | [`retriever`] | Top-k retrieval for a question |
//! | [`generation`] | Streaming text generation |
//! | [`chain`] | Prompt assembly and answer streaming |
//! | [`history`] | Per-user chat history |
//! | [`feedback`] | Free-text feedback capture |
//! | [`session`] | Application handle and user sessions |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Index schema |

pub mod chain;
pub mod chunk;
pub mod config;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod feedback;
pub mod fsutil;
pub mod generation;
pub mod history;
pub mod index;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod session;
