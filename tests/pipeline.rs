//! End-to-end scenarios through the library API, fully offline: the hash
//! embedder stands in for a model and a scripted generator for the LLM.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use askdoc::config::{
    ChunkingConfig, Config, EmbeddingConfig, GenerationConfig, PathsConfig, RetrievalConfig,
};
use askdoc::credentials::CredentialStore;
use askdoc::embedding::HashEmbedder;
use askdoc::generation::{FragmentStream, Generator};
use askdoc::history::{self, HistoryStore};
use askdoc::models::ChatRecord;
use askdoc::session::App;

/// Answers every prompt with the same deltas and keeps the prompts.
struct Scripted {
    parts: Vec<&'static str>,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn stream(&self, prompt: String) -> Result<FragmentStream> {
        self.prompts.lock().unwrap().push(prompt);
        let items: Vec<Result<String>> = self.parts.iter().map(|p| Ok(p.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

fn config(root: &std::path::Path) -> Config {
    Config {
        paths: PathsConfig {
            source_document: root.join("corpus.txt"),
            index: root.join("data/index.sqlite"),
            credentials: root.join("data/users.json"),
            history_dir: root.join("data/history"),
            feedback_dir: root.join("data/feedback"),
        },
        chunking: ChunkingConfig {
            chunk_size: 120,
            chunk_overlap: 20,
        },
        retrieval: RetrievalConfig { top_k: 2 },
        embedding: EmbeddingConfig::default(),
        generation: GenerationConfig::default(),
    }
}

#[test]
fn test_alice_account_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let store = CredentialStore::new(tmp.path().join("users.json"));

    assert!(store.register("alice", "pw123", "5551234567").unwrap());
    assert!(store.authenticate("alice", "pw123").unwrap());
    assert!(!store.authenticate("alice", "wrong").unwrap());

    assert!(store.update_password("alice", "pw456").unwrap());
    assert!(!store.authenticate("alice", "pw123").unwrap());
    assert!(store.authenticate("alice", "pw456").unwrap());

    assert_eq!(
        store.find_username_by_phone("5551234567").unwrap().as_deref(),
        Some("alice")
    );
    let user = store.user("alice").unwrap().unwrap();
    assert_eq!(user.phone, "5551234567");

    // A second store over the same file sees the same data.
    let reopened = CredentialStore::new(tmp.path().join("users.json"));
    assert!(reopened.authenticate("alice", "pw456").unwrap());
}

#[test]
fn test_bob_history_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let store = HistoryStore::new(tmp.path().join("history"), tmp.path().join("backup"));

    let records = vec![
        ChatRecord::new("What is a router?", "It forwards packets."),
        ChatRecord::new("And a switch?", "It forwards frames."),
        ChatRecord::new("Firewall?", "It filters traffic."),
    ];
    for r in &records {
        store.append("bob", r).unwrap();
    }
    assert_eq!(store.load("bob").unwrap(), records);

    let forwards = history::search(&store.load("bob").unwrap(), "FORWARDS");
    assert_eq!(forwards, records[..2].to_vec());

    store.clear("bob").unwrap();
    assert!(store.load("bob").unwrap().is_empty());
}

#[tokio::test]
async fn test_question_flows_from_corpus_to_history() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("corpus.txt"),
        "Routers forward packets between networks using routing tables.\n\n\
         Sourdough bread needs a starter, flour, water and time to rise.\n\n\
         Firewalls filter network traffic according to configured rules.\n\n\
         A good oven temperature for bread is around 230 degrees.",
    )
    .unwrap();

    let generator = Arc::new(Scripted {
        parts: vec!["Routers ", "forward ", "packets."],
        prompts: Mutex::new(Vec::new()),
    });
    let app = App::with_providers(
        config(tmp.path()),
        Arc::new(HashEmbedder::new(1024)),
        generator.clone(),
    )
    .await
    .unwrap();
    assert!(tmp.path().join("data/index.sqlite").exists());

    app.credentials()
        .register("carol", "secret", "5550001111")
        .unwrap();
    let mut session = app.login("carol", "secret").unwrap().unwrap();

    let mut streamed = Vec::new();
    let record = session
        .ask(&app, "What do routers forward between networks?", |f| {
            streamed.push(f.to_string())
        })
        .await
        .unwrap();

    assert_eq!(streamed, vec!["Routers ", "forward ", "packets."]);
    assert_eq!(record.answer, "Routers forward packets.");
    assert_eq!(app.history().load("carol").unwrap(), vec![record.clone()]);
    assert_eq!(session.live_view(), &[record]);

    // The prompt is the default template with the best chunk first.
    let prompts = generator.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("<s>[INST]"));
    let routers = prompts[0].find("Routers forward packets").unwrap();
    assert!(prompts[0].contains("What do routers forward between networks? [/INST]"));
    assert!(routers < prompts[0].find("What do routers").unwrap());

    session.logout();
    let session = app.login("carol", "secret").unwrap().unwrap();
    assert!(session.live_view().is_empty());
    assert_eq!(session.history(&app, "").unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_corpus_fails_open() {
    let tmp = TempDir::new().unwrap();
    let generator = Arc::new(Scripted {
        parts: vec![],
        prompts: Mutex::new(Vec::new()),
    });
    let result = App::with_providers(
        config(tmp.path()),
        Arc::new(HashEmbedder::new(64)),
        generator,
    )
    .await;
    assert!(result.is_err());
    assert!(!tmp.path().join("data/index.sqlite").exists());
}
