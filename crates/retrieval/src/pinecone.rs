use std::sync::Arc;

use async_trait::async_trait;
use medassist_core::Passage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::error::RetrievalError;
use crate::{base_url, read_json, EmbeddingModel, Retriever};

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2024-07";

pub const DEFAULT_CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
pub const DEFAULT_INDEX_NAME: &str = "medical-bot";

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

/// Looks up the data-plane host of an existing index by name.
pub async fn describe_index_host(
    http: &Client,
    control_plane: &str,
    api_key: &str,
    index_name: &str,
) -> Result<String, RetrievalError> {
    let url = base_url(control_plane)?.join(&format!("indexes/{index_name}"))?;
    let request = http
        .get(url)
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION);

    let body = read_json(SERVICE, request).await?;
    let description = serde_json::from_value::<IndexDescription>(body)
        .map_err(|err| RetrievalError::malformed(SERVICE, err.to_string()))?;
    if description.host.trim().is_empty() {
        return Err(RetrievalError::malformed(SERVICE, "index has no host"));
    }
    Ok(description.host)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// Similarity search against an existing Pinecone index whose records carry
/// the chunk text under `metadata.text` and the origin under `metadata.source`.
#[derive(Clone)]
pub struct PineconeRetriever {
    http: Client,
    query_url: Url,
    api_key: String,
    namespace: Option<String>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl PineconeRetriever {
    pub fn new(
        http: Client,
        index_host: &str,
        api_key: impl Into<String>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, RetrievalError> {
        let host = if index_host.contains("://") {
            index_host.to_string()
        } else {
            format!("https://{index_host}")
        };

        Ok(Self {
            http,
            query_url: base_url(&host)?.join("query")?,
            api_key: api_key.into(),
            namespace: None,
            embedder,
        })
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[async_trait]
impl Retriever for PineconeRetriever {
    #[instrument(skip(self, query), fields(model = self.embedder.model_name()))]
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let payload = QueryRequest {
            vector: &vector,
            top_k,
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };

        let request = self
            .http
            .post(self.query_url.clone())
            .header("Api-Key", self.api_key.as_str())
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&payload);

        let body = read_json(SERVICE, request).await?;
        let response = serde_json::from_value::<QueryResponse>(body)
            .map_err(|err| RetrievalError::malformed(SERVICE, err.to_string()))?;

        let passages = passages_from_matches(response.matches, top_k);
        debug!(passages = passages.len(), "pinecone query answered");
        Ok(passages)
    }
}

fn passages_from_matches(matches: Vec<QueryMatch>, top_k: usize) -> Vec<Passage> {
    matches
        .into_iter()
        .filter_map(|hit| {
            let metadata = hit.metadata.unwrap_or_default();
            let text = metadata.text.filter(|text| !text.trim().is_empty())?;
            Some(Passage {
                text,
                source: metadata.source.unwrap_or(hit.id),
                score: hit.score,
            })
        })
        .take(top_k)
        .collect()
}
