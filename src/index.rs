//! Corpus indexing: load → chunk → embed → persist.
//!
//! The index lives in a single SQLite file. [`build_or_load`] reuses that
//! file whenever it exists (the corpus is treated as immutable for the
//! lifetime of an index); delete the file to force a rebuild.
//!
//! A build writes everything into a `.tmp` sibling and renames it over the
//! target only after the last row is committed, so an interrupted or failed
//! build never leaves a partial index behind.
//!
//! Similarity search is exact: cosine similarity against every entry,
//! which is plenty for a single document's worth of chunks.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::chunk::chunk_sections;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::extract;
use crate::fsutil::tmp_sibling;
use crate::migrate;
use crate::models::{DocumentChunk, RetrievedChunk};

/// Knobs for building an index.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Facts recorded alongside the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub build_id: String,
    /// SHA-256 of the source document bytes.
    pub corpus_version: String,
    pub model: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub built_at: String,
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

/// All chunks of the corpus with their embeddings, held in memory.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Pair chunks with their vectors. Every vector must have `meta.dims`
    /// components.
    pub fn new(meta: IndexMeta, chunks: Vec<DocumentChunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "index needs one vector per chunk ({} chunks, {} vectors)",
                chunks.len(),
                vectors.len()
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != meta.dims) {
            bail!(
                "embedding has {} dimensions, index expects {}",
                bad.len(),
                meta.dims
            );
        }
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        Ok(Self { meta, entries })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` entries most similar to `query`, best first.
    ///
    /// The sort is stable, so equal scores keep corpus order.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(i, score)| RetrievedChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Persist to `path`, replacing any existing file only on success.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_sibling(path);
        remove_if_exists(&tmp)?;

        let written = self.write_sqlite(&tmp).await;
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move index into place: {}", path.display()))?;
        Ok(())
    }

    async fn write_sqlite(&self, path: &Path) -> Result<()> {
        let pool = db::connect(path, true)
            .await
            .with_context(|| format!("Failed to create index file: {}", path.display()))?;
        migrate::create_index_schema(&pool).await?;

        let mut tx = pool.begin().await?;
        let meta = &self.meta;
        let pairs = [
            ("build_id", meta.build_id.clone()),
            ("corpus_version", meta.corpus_version.clone()),
            ("model", meta.model.clone()),
            ("dims", meta.dims.to_string()),
            ("chunk_size", meta.chunk_size.to_string()),
            ("chunk_overlap", meta.chunk_overlap.to_string()),
            ("built_at", meta.built_at.clone()),
        ];
        for (key, value) in pairs {
            sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for entry in &self.entries {
            sqlx::query(
                "INSERT INTO chunks (ord, source_id, start_offset, text, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(entry.chunk.order)
            .bind(&entry.chunk.source_id)
            .bind(entry.chunk.start)
            .bind(&entry.chunk.text)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        pool.close().await;
        Ok(())
    }

    /// Read a persisted index.
    pub async fn load(path: &Path) -> Result<Self> {
        let pool = db::connect(path, false)
            .await
            .with_context(|| format!("Failed to open index: {}", path.display()))?;

        let rows = sqlx::query("SELECT key, value FROM meta")
            .fetch_all(&pool)
            .await
            .with_context(|| format!("Not a valid index file: {}", path.display()))?;
        let pairs: HashMap<String, String> = rows
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();

        let field = |key: &str| -> Result<String> {
            pairs
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("index metadata is missing '{}'", key))
        };
        let meta = IndexMeta {
            build_id: field("build_id")?,
            corpus_version: field("corpus_version")?,
            model: field("model")?,
            dims: field("dims")?.parse().context("index metadata 'dims'")?,
            chunk_size: field("chunk_size")?.parse().context("index metadata 'chunk_size'")?,
            chunk_overlap: field("chunk_overlap")?
                .parse()
                .context("index metadata 'chunk_overlap'")?,
            built_at: field("built_at")?,
        };

        let rows = sqlx::query(
            "SELECT ord, source_id, start_offset, text, embedding FROM chunks ORDER BY ord",
        )
        .fetch_all(&pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            chunks.push(DocumentChunk {
                order: row.get("ord"),
                source_id: row.get("source_id"),
                start: row.get("start_offset"),
                text: row.get("text"),
            });
            let blob: Vec<u8> = row.get("embedding");
            vectors.push(blob_to_vec(&blob));
        }
        pool.close().await;

        Self::new(meta, chunks, vectors)
    }
}

/// Return the index at `index_path`, building it from `source_path` first
/// when no persisted index exists.
///
/// Building is all-or-nothing: an unreadable source, an embedding failure,
/// or a write error leaves `index_path` untouched.
pub async fn build_or_load(
    source_path: &Path,
    index_path: &Path,
    embedder: &dyn Embedder,
    options: &BuildOptions,
) -> Result<VectorIndex> {
    if index_path.exists() {
        let index = VectorIndex::load(index_path).await?;
        check_compatible(&index, embedder)?;
        tracing::info!(
            path = %index_path.display(),
            chunks = index.len(),
            build_id = %index.meta().build_id,
            "loaded vector index"
        );
        return Ok(index);
    }

    let index = build(source_path, embedder, options).await?;
    index.save(index_path).await?;
    tracing::info!(
        path = %index_path.display(),
        chunks = index.len(),
        build_id = %index.meta().build_id,
        "built vector index"
    );
    Ok(index)
}

/// Build an index in memory without persisting it.
pub async fn build(
    source_path: &Path,
    embedder: &dyn Embedder,
    options: &BuildOptions,
) -> Result<VectorIndex> {
    let raw = std::fs::read(source_path)
        .with_context(|| format!("Failed to read source document: {}", source_path.display()))?;
    let corpus_version = hex::encode(Sha256::digest(&raw));
    drop(raw);

    let sections = extract::load_source(source_path)?;
    let chunks = chunk_sections(&sections, options.chunk_size, options.chunk_overlap);
    tracing::info!(
        sections = sections.len(),
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedding corpus"
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedding::embed_in_batches(embedder, &texts, options.batch_size).await?;

    let meta = IndexMeta {
        build_id: Uuid::new_v4().to_string(),
        corpus_version,
        model: embedder.model_name().to_string(),
        dims: embedder.dims(),
        chunk_size: options.chunk_size,
        chunk_overlap: options.chunk_overlap,
        built_at: chrono::Utc::now().to_rfc3339(),
    };
    VectorIndex::new(meta, chunks, vectors)
}

fn check_compatible(index: &VectorIndex, embedder: &dyn Embedder) -> Result<()> {
    let meta = index.meta();
    if meta.dims != embedder.dims() {
        bail!(
            "index was built with {}-dimensional '{}' vectors but the configured embedder '{}' produces {}; delete the index to rebuild",
            meta.dims,
            meta.model,
            embedder.model_name(),
            embedder.dims()
        );
    }
    if meta.model != embedder.model_name() {
        tracing::warn!(
            index_model = %meta.model,
            configured_model = embedder.model_name(),
            "index was built with a different embedding model"
        );
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn options() -> BuildOptions {
        BuildOptions {
            chunk_size: 60,
            chunk_overlap: 10,
            batch_size: 4,
        }
    }

    fn write_corpus(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("corpus.txt");
        std::fs::write(
            &path,
            "Routers forward packets between networks using routing tables.\n\n\
             Switches forward frames inside a local network using MAC addresses.\n\n\
             Sourdough bread needs a starter, flour, water and patience.\n\n\
             Firewalls filter traffic according to configured rules.",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_build_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let source = write_corpus(tmp.path());
        let index_path = tmp.path().join("index/index.sqlite");
        std::fs::create_dir_all(index_path.parent().unwrap()).unwrap();
        let embedder = HashEmbedder::new(64);

        let built = build_or_load(&source, &index_path, &embedder, &options())
            .await
            .unwrap();
        assert!(index_path.exists());
        assert!(!tmp_sibling(&index_path).exists());
        assert!(built.len() > 1);

        let loaded = VectorIndex::load(&index_path).await.unwrap();
        assert_eq!(loaded.meta(), built.meta());
        assert_eq!(loaded.len(), built.len());
        for (a, b) in loaded.entries().iter().zip(built.entries()) {
            assert_eq!(a.chunk, b.chunk);
            assert_eq!(a.vector, b.vector);
        }
    }

    #[tokio::test]
    async fn test_existing_index_is_reused_without_reading_source() {
        let tmp = TempDir::new().unwrap();
        let source = write_corpus(tmp.path());
        let index_path = tmp.path().join("index.sqlite");
        let embedder = HashEmbedder::new(64);

        let first = build_or_load(&source, &index_path, &embedder, &options())
            .await
            .unwrap();
        std::fs::remove_file(&source).unwrap();

        let second = build_or_load(&source, &index_path, &embedder, &options())
            .await
            .unwrap();
        assert_eq!(first.meta().build_id, second.meta().build_id);
    }

    #[tokio::test]
    async fn test_unreadable_source_leaves_no_index() {
        let tmp = TempDir::new().unwrap();
        let index_path = tmp.path().join("index.sqlite");
        let embedder = HashEmbedder::new(64);

        let result = build_or_load(
            &tmp.path().join("missing.pdf"),
            &index_path,
            &embedder,
            &options(),
        )
        .await;
        assert!(result.is_err());
        assert!(!index_path.exists());
        assert!(!tmp_sibling(&index_path).exists());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let source = write_corpus(tmp.path());
        let index_path = tmp.path().join("index.sqlite");

        build_or_load(&source, &index_path, &HashEmbedder::new(64), &options())
            .await
            .unwrap();
        let err = build_or_load(&source, &index_path, &HashEmbedder::new(32), &options())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("delete the index"));
    }

    #[tokio::test]
    async fn test_corpus_version_is_source_digest() {
        let tmp = TempDir::new().unwrap();
        let source = write_corpus(tmp.path());
        let index = build(&source, &HashEmbedder::new(16), &options()).await.unwrap();
        let expected = hex::encode(Sha256::digest(std::fs::read(&source).unwrap()));
        assert_eq!(index.meta().corpus_version, expected);
    }

    fn meta(dims: usize) -> IndexMeta {
        IndexMeta {
            build_id: "b".into(),
            corpus_version: "v".into(),
            model: "m".into(),
            dims,
            chunk_size: 10,
            chunk_overlap: 0,
            built_at: "t".into(),
        }
    }

    fn chunk(order: i64) -> DocumentChunk {
        DocumentChunk {
            source_id: "s".into(),
            text: format!("chunk {}", order),
            order,
            start: order * 10,
        }
    }

    #[test]
    fn test_nearest_orders_by_score_and_caps_at_k() {
        let index = VectorIndex::new(
            meta(2),
            (0..4).map(chunk).collect(),
            vec![
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![0.7, 0.7],
                vec![-1.0, 0.0],
            ],
        )
        .unwrap();

        let hits = index.nearest(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.order, 1);
        assert_eq!(hits[1].chunk.order, 2);
        assert!(hits[0].score >= hits[1].score);

        assert_eq!(index.nearest(&[1.0, 0.0], 10).len(), 4);
        assert!(index.nearest(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_nearest_ties_keep_corpus_order() {
        let index = VectorIndex::new(
            meta(2),
            (0..3).map(chunk).collect(),
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();
        let orders: Vec<i64> = index
            .nearest(&[1.0, 0.0], 3)
            .iter()
            .map(|h| h.chunk.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_new_rejects_mismatched_inputs() {
        assert!(VectorIndex::new(meta(2), vec![chunk(0)], vec![]).is_err());
        assert!(VectorIndex::new(meta(2), vec![chunk(0)], vec![vec![1.0]]).is_err());
    }
}
