mod embedding;
mod error;
mod pinecone;

use async_trait::async_trait;
use medassist_core::Passage;
use reqwest::RequestBuilder;
use serde_json::Value;
use url::Url;

pub use embedding::{HuggingFaceEmbedder, DEFAULT_EMBEDDING_MODEL, DEFAULT_HF_BASE_URL};
pub use error::RetrievalError;
pub use pinecone::{
    describe_index_host, PineconeRetriever, DEFAULT_CONTROL_PLANE_URL, DEFAULT_INDEX_NAME,
};

pub const DEFAULT_TOP_K: usize = 3;

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// "Given a query, return the top-k relevant passages", best match first.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError>;
}

/// Parses a base URL so that relative joins append to its path.
pub(crate) fn base_url(raw: &str) -> Result<Url, RetrievalError> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Ok(Url::parse(trimmed)?)
    } else {
        Ok(Url::parse(&format!("{trimmed}/"))?)
    }
}

pub(crate) async fn read_json(
    service: &'static str,
    request: RequestBuilder,
) -> Result<Value, RetrievalError> {
    let response = request
        .send()
        .await
        .map_err(|source| RetrievalError::Transport { service, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RetrievalError::Status {
            service,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| RetrievalError::malformed(service, err.to_string()))
}
