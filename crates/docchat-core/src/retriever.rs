//! Query-time retrieval: embed the question once, search the index.

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Return the `k` chunks most similar to `query`.
///
/// A blank query or an empty index yields an empty list without calling
/// the embedder.
pub async fn retrieve(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievalResult>> {
    let query = query.trim();
    if query.is_empty() || index.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let mut vectors = embedder.embed(&[query.to_string()]).await?;
    let vector = match vectors.pop() {
        Some(v) if vectors.is_empty() => v,
        _ => {
            return Err(RagError::upstream(
                None,
                "embedding response did not contain exactly one vector",
            ))
        }
    };

    let results = index.search(&vector, k)?;
    tracing::debug!(hits = results.len(), k, "retrieved");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FlatIndex;
    use crate::models::{ChunkMetadata, IndexEntry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| if t.contains("sky") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn entry(text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: text.to_string(),
            vector,
            metadata: ChunkMetadata {
                source_id: "doc".into(),
                title: None,
                locator: None,
                ordinal: 0,
                text: text.into(),
            },
        }
    }

    #[tokio::test]
    async fn blank_query_skips_embedder() {
        let embedder = AxisEmbedder { calls: AtomicUsize::new(0) };
        let index = FlatIndex::new();
        index.add(vec![entry("sky", vec![1.0, 0.0])]).unwrap();

        assert!(retrieve(&embedder, &index, "   ", 3).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_index_skips_embedder() {
        let embedder = AxisEmbedder { calls: AtomicUsize::new(0) };
        let index = FlatIndex::new();

        assert!(retrieve(&embedder, &index, "sky color", 3).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn returns_closest_first() {
        let embedder = AxisEmbedder { calls: AtomicUsize::new(0) };
        let index = FlatIndex::new();
        index
            .add(vec![entry("grass", vec![0.0, 1.0]), entry("sky", vec![1.0, 0.0])])
            .unwrap();

        let hits = retrieve(&embedder, &index, "sky color", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.text, "sky");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
