//! Top-k similarity retrieval over a loaded [`VectorIndex`].
//!
//! The question is embedded with the same [`Embedder`] the index was built
//! with and compared against every chunk. Results come back highest
//! similarity first; equal scores keep corpus order.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }

    /// The deployment's default `k`.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// At most `k` chunks nearest to `question`, best first.
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder.as_ref(), question).await?;
        let hits = self.index.nearest(&vector, k);
        tracing::debug!(
            k,
            returned = hits.len(),
            best = hits.first().map(|h| h.score),
            "retrieved chunks"
        );
        Ok(hits)
    }

    /// [`Retriever::query`] with the default `k`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        self.query(question, self.top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::IndexMeta;
    use crate::models::DocumentChunk;

    const TEXTS: [&str; 5] = [
        "routers forward packets between networks",
        "sourdough bread needs flour water and a starter",
        "switches learn mac addresses on a local network",
        "the oven should be preheated before baking bread",
        "firewalls drop packets that match deny rules",
    ];

    async fn retriever(top_k: usize) -> Retriever {
        let embedder = Arc::new(HashEmbedder::new(1024));
        let texts: Vec<String> = TEXTS.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, t)| DocumentChunk {
                source_id: "corpus.txt".into(),
                text: t.clone(),
                order: i as i64,
                start: 0,
            })
            .collect();
        let meta = IndexMeta {
            build_id: "test".into(),
            corpus_version: "v".into(),
            model: "hash".into(),
            dims: 1024,
            chunk_size: 100,
            chunk_overlap: 0,
            built_at: "now".into(),
        };
        let index = VectorIndex::new(meta, chunks, vectors).unwrap();
        Retriever::new(Arc::new(index), embedder, top_k)
    }

    #[tokio::test]
    async fn test_query_finds_relevant_chunk_first() {
        let r = retriever(4).await;
        let hits = r.query("how do I bake sourdough bread", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.order, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_never_more_than_k_and_only_indexed_chunks() {
        let r = retriever(4).await;
        for k in [1, 3, 4, 5, 50] {
            let hits = r.query("packets", k).await.unwrap();
            assert!(hits.len() <= k);
            for h in &hits {
                assert!(TEXTS.contains(&h.chunk.text.as_str()));
            }
        }
        assert_eq!(r.retrieve("packets").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_zero_k_is_empty() {
        let r = retriever(4).await;
        assert!(r.query("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_question_ties_resolve_by_order() {
        let r = retriever(5).await;
        // No tokens at all: every score is 0 and corpus order wins.
        let orders: Vec<i64> = r
            .retrieve("?? !!")
            .await
            .unwrap()
            .iter()
            .map(|h| h.chunk.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }
}
