//! OpenAI-compatible embedding backend.
//!
//! [`OpenAiEmbedder`] implements [`docchat_core::embedding::Embedder`] by
//! calling `POST {base_url}/embeddings`. Input is split into batches of
//! `openai.batch_size` texts, one request per batch, and the results are
//! concatenated in input order. Nothing is cached.

use async_trait::async_trait;
use docchat_core::embedding::Embedder;
use docchat_core::{RagError, Result};
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::openai::OpenAiClient;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        Ok(Self::new(
            OpenAiClient::from_config(config)?,
            config.embedding_model.clone(),
            config.batch_size,
        ))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };
        let response: EmbeddingResponse = self.client.post_json("embeddings", &request).await?;
        order_embeddings(response.data, batch.len())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        tracing::debug!(texts = texts.len(), model = %self.model, "embedded");
        Ok(out)
    }
}

/// Put response items in input order and check the count.
fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(RagError::upstream(
            None,
            format!(
                "embedding response has {} vectors for {} inputs",
                items.len(),
                expected
            ),
        ));
    }
    if items.iter().all(|i| i.index.is_some()) {
        items.sort_by_key(|i| i.index);
    }
    Ok(items.into_iter().map(|i| i.embedding).collect())
}
