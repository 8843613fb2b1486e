use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::error::RetrievalError;
use crate::{base_url, read_json, EmbeddingModel};

pub const DEFAULT_HF_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

const SERVICE: &str = "huggingface";

/// Sentence embeddings from the Hugging Face feature-extraction pipeline.
#[derive(Clone)]
pub struct HuggingFaceEmbedder {
    http: Client,
    endpoint: Url,
    model: String,
    token: Option<String>,
}

impl std::fmt::Debug for HuggingFaceEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceEmbedder")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HuggingFaceEmbedder {
    pub fn new(
        http: Client,
        base: &str,
        model: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, RetrievalError> {
        let model = model.into();
        let endpoint = base_url(base)?.join(&format!("pipeline/feature-extraction/{model}"))?;

        Ok(Self {
            http,
            endpoint,
            model,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingModel for HuggingFaceEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut request = self.http.post(self.endpoint.clone()).json(&json!({
            "inputs": text,
            "options": { "wait_for_model": true }
        }));
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let body = read_json(SERVICE, request).await?;
        sentence_vector(&body)
            .ok_or_else(|| RetrievalError::malformed(SERVICE, "expected a numeric embedding"))
    }
}

/// Accepts either a flat vector or a matrix of token vectors, which is
/// mean-pooled into one sentence vector.
fn sentence_vector(value: &Value) -> Option<Vec<f32>> {
    let rows = value.as_array()?;
    if rows.is_empty() {
        return None;
    }

    if rows.iter().all(Value::is_number) {
        return rows.iter().map(|v| v.as_f64().map(|v| v as f32)).collect();
    }

    let matrix = rows
        .iter()
        .map(sentence_vector)
        .collect::<Option<Vec<_>>>()?;
    let dims = matrix.first()?.len();
    if matrix.iter().any(|row| row.len() != dims) {
        return None;
    }

    let mut pooled = vec![0.0_f32; dims];
    for row in &matrix {
        for (acc, value) in pooled.iter_mut().zip(row) {
            *acc += value;
        }
    }
    let count = matrix.len() as f32;
    pooled.iter_mut().for_each(|value| *value /= count);
    Some(pooled)
}
