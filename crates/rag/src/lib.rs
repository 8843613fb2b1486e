mod prompt;
mod together;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use medassist_core::Passage;
use medassist_retrieval::{RetrievalError, Retriever, DEFAULT_TOP_K};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

pub use prompt::{build_messages, stuff_passages, SYSTEM_PROMPT};
pub use together::{
    TogetherChatModel, TogetherConfig, DEFAULT_TOGETHER_BASE_URL, DEFAULT_TOGETHER_MODEL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("chat model request failed")]
    Transport(#[from] reqwest::Error),
    #[error("chat model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed chat model response: {0}")]
    Malformed(String),
    #[error("invalid chat model url")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval failed")]
    Retrieval(#[from] RetrievalError),
    #[error("generation failed")]
    Generation(#[from] GenerationError),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    /// Raw model output, not yet sanitized.
    pub answer: String,
    pub passages: Vec<Passage>,
}

impl RagAnswer {
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for passage in &self.passages {
            if !sources.contains(&passage.source) {
                sources.push(passage.source.clone());
            }
        }
        sources
    }
}

/// Anything that can answer a medical question from retrieved context.
#[async_trait]
pub trait AnswerSource: Send + Sync {
    async fn answer(&self, question: &str) -> Result<RagAnswer, RagError>;
}

/// Retrieve top-k passages, stuff them into the system prompt, and ask the
/// chat model.
#[derive(Clone)]
pub struct RagChain {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
    system_prompt: String,
}

impl RagChain {
    pub fn new(retriever: Arc<dyn Retriever>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever,
            model,
            top_k: DEFAULT_TOP_K,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RagError> {
        Ok(self.retriever.retrieve(query, top_k).await?)
    }
}

#[async_trait]
impl AnswerSource for RagChain {
    #[instrument(skip(self, question), fields(model = self.model.model_name(), top_k = self.top_k))]
    async fn answer(&self, question: &str) -> Result<RagAnswer, RagError> {
        let started = Instant::now();

        let passages = self.retriever.retrieve(question, self.top_k).await?;
        let messages = build_messages(&self.system_prompt, &passages, question);
        let answer = self.model.complete(&messages).await?;

        info!(
            passages = passages.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "rag answer generated"
        );

        Ok(RagAnswer { answer, passages })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct FixedRetriever {
        passages: Vec<Passage>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(
            &self,
            query: &str,
            top_k: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            self.seen.lock().push((query.to_string(), top_k));
            Ok(self.passages.iter().take(top_k).cloned().collect())
        }
    }

    struct DownRetriever;

    #[async_trait]
    impl Retriever for DownRetriever {
        async fn retrieve(&self, _: &str, _: usize) -> Result<Vec<Passage>, RetrievalError> {
            Err(RetrievalError::Status {
                service: "pinecone",
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct EchoModel {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
            self.prompts.lock().push(messages.to_vec());
            Ok(format!("answer to: {}", messages[1].content))
        }
    }

    fn passage(text: &str, source: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source: source.to_string(),
            score: 0.7,
        }
    }

    #[tokio::test]
    async fn chain_retrieves_then_generates() {
        let retriever = Arc::new(FixedRetriever {
            passages: vec![
                passage("Fever is a raised temperature.", "book.pdf"),
                passage("Infections cause fever.", "book.pdf"),
                passage("Hydrate.", "leaflet.pdf"),
                passage("Unused.", "other.pdf"),
            ],
            seen: Mutex::new(Vec::new()),
        });
        let model = Arc::new(EchoModel::default());
        let chain = RagChain::new(retriever.clone(), model.clone());

        let answer = chain.answer("What causes a fever?").await.unwrap();

        assert_eq!(answer.answer, "answer to: What causes a fever?");
        assert_eq!(answer.passages.len(), 3);
        assert_eq!(answer.sources(), vec!["book.pdf", "leaflet.pdf"]);
        assert_eq!(
            retriever.seen.lock().as_slice(),
            &[("What causes a fever?".to_string(), 3)]
        );
        let prompts = model.prompts.lock();
        assert!(prompts[0][0].content.contains("Infections cause fever."));
        assert!(!prompts[0][0].content.contains("Unused."));
    }

    #[tokio::test]
    async fn retrieval_failure_skips_generation() {
        let model = Arc::new(EchoModel::default());
        let chain = RagChain::new(Arc::new(DownRetriever), model.clone());

        let result = chain.answer("What causes a fever?").await;

        assert!(matches!(result, Err(RagError::Retrieval(_))));
        assert!(model.prompts.lock().is_empty());
    }

    #[test]
    fn roles_serialize_lowercase() {
        let message = ChatMessage {
            role: Role::System,
            content: "x".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap()["role"],
            serde_json::json!("system")
        );
    }
}
