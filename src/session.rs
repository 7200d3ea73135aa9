//! Orchestration: the long-lived [`App`] handle and per-user [`Session`]s.
//!
//! `App` is built once per process. Building it loads (or builds) the
//! vector index and wires the answer chain, so every question after that
//! reuses the same index. It is passed by reference to whatever serves
//! requests; nothing here is global.
//!
//! A `Session` is the explicit context of one logged-in user: their name
//! and the live view of exchanges made since login. Durable history lives
//! in the [`HistoryStore`] and outlives the session.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::chain::AnswerChain;
use crate::config::{Config, PathsConfig};
use crate::credentials::CredentialStore;
use crate::embedding::{create_embedder, Embedder};
use crate::feedback;
use crate::generation::{create_generator, Generator};
use crate::history::HistoryStore;
use crate::index::{build_or_load, BuildOptions};
use crate::models::ChatRecord;
use crate::retriever::Retriever;

/// History store rooted at the configured directories. Backups go to
/// `<feedback_dir>/backup`.
pub fn history_store(paths: &PathsConfig) -> HistoryStore {
    HistoryStore::new(&paths.history_dir, paths.feedback_dir.join("backup"))
}

pub struct App {
    config: Config,
    credentials: CredentialStore,
    history: HistoryStore,
    chain: AnswerChain,
}

impl App {
    /// Build the handle with the providers named in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::with_providers(config, embedder, generator).await
    }

    /// Build the handle around explicit providers.
    pub async fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let index = build_or_load(
            &config.paths.source_document,
            &config.paths.index,
            embedder.as_ref(),
            &BuildOptions::from_config(&config),
        )
        .await?;
        let retriever = Retriever::new(Arc::new(index), embedder, config.retrieval.top_k);
        let chain = AnswerChain::new(
            retriever,
            generator,
            config.generation.prompt_template.clone(),
        );

        Ok(Self {
            credentials: CredentialStore::new(&config.paths.credentials),
            history: history_store(&config.paths),
            chain,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn chain(&self) -> &AnswerChain {
        &self.chain
    }

    /// Start a session for a user whose password checks out.
    pub fn login(&self, username: &str, password: &str) -> Result<Option<Session>> {
        if !self.credentials.authenticate(username, password)? {
            tracing::info!(username, "login rejected");
            return Ok(None);
        }
        tracing::info!(username, "logged in");
        Ok(Some(Session::new(username)))
    }
}

#[derive(Debug)]
pub struct Session {
    username: String,
    live_view: Vec<ChatRecord>,
}

impl Session {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            live_view: Vec::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Exchanges made during this session, oldest first.
    pub fn live_view(&self) -> &[ChatRecord] {
        &self.live_view
    }

    /// Answer `question`, handing each delta to `on_fragment` as it
    /// arrives.
    ///
    /// Only a completed answer is recorded: first in durable history, then
    /// in the live view. If retrieval or generation fails, nothing is
    /// recorded and the deltas already delivered must be treated as a
    /// truncated answer.
    pub async fn ask(
        &mut self,
        app: &App,
        question: &str,
        on_fragment: impl FnMut(&str),
    ) -> Result<ChatRecord> {
        let answer = app.chain.answer(question).await?;
        let text = answer.collect_with(on_fragment).await?;

        let record = ChatRecord::new(question, text);
        app.history.append(&self.username, &record)?;
        self.live_view.push(record.clone());
        Ok(record)
    }

    /// The user's durable history, optionally filtered.
    pub fn history(&self, app: &App, query: &str) -> Result<Vec<ChatRecord>> {
        let records = app.history.load(&self.username)?;
        Ok(crate::history::search(&records, query))
    }

    /// Delete durable history and empty the live view.
    pub fn clear_history(&mut self, app: &App) -> Result<()> {
        app.history.clear(&self.username)?;
        self.live_view.clear();
        Ok(())
    }

    /// Archive the live view.
    pub fn backup(&self, app: &App) -> Result<PathBuf> {
        app.history.backup(&self.username, &self.live_view)
    }

    pub fn feedback(&self, app: &App, text: &str) -> Result<Option<PathBuf>> {
        feedback::save_feedback(&app.config.paths.feedback_dir, &self.username, text)
    }

    /// End the session. The live view goes with it; history stays.
    pub fn logout(mut self) {
        self.live_view.clear();
        tracing::info!(username = %self.username, "logged out");
    }
}
