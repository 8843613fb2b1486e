mod clock;
mod picker;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use medassist_core::{
    sanitize, ChatReply, Classification, Intent, IntentClassifier, ResponseCatalog, TimeBand,
    EMERGENCY_MESSAGE, RAG_FALLBACK_MESSAGE,
};
use medassist_observability::AppMetrics;
use medassist_rag::{AnswerSource, RagError};
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use clock::{Clock, FixedClock, SystemClock};
pub use picker::{ResponsePicker, SeededPicker, ThreadRngPicker};

pub const DEFAULT_RAG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
enum RagFailure {
    #[error(transparent)]
    Upstream(#[from] RagError),
    #[error("rag call timed out after {0:?}")]
    TimedOut(Duration),
    #[error("rag call panicked: {0}")]
    Panicked(String),
}

/// Routes each message to a canned reply, the emergency message, or a
/// sanitized retrieval-augmented answer.
#[derive(Clone)]
pub struct MedicalAssistant {
    classifier: Arc<IntentClassifier>,
    catalog: Arc<ResponseCatalog>,
    rag: Arc<dyn AnswerSource>,
    picker: Arc<dyn ResponsePicker>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AppMetrics>,
    rag_timeout: Option<Duration>,
}

impl MedicalAssistant {
    pub fn new(rag: Arc<dyn AnswerSource>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            classifier: Arc::new(IntentClassifier::default()),
            catalog: Arc::new(ResponseCatalog::default()),
            rag,
            picker: Arc::new(ThreadRngPicker),
            clock: Arc::new(SystemClock),
            metrics,
            rag_timeout: Some(DEFAULT_RAG_TIMEOUT),
        }
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_catalog(mut self, catalog: ResponseCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn ResponsePicker>) -> Self {
        self.picker = picker;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// `None` waits for the upstream call however long it takes.
    pub fn with_rag_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rag_timeout = timeout;
        self
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn metrics(&self) -> &Arc<AppMetrics> {
        &self.metrics
    }

    pub fn classify(&self, message: &str) -> Classification {
        self.classifier.classify_detailed(message)
    }

    #[instrument(skip(self, message))]
    pub async fn handle(&self, message: &str) -> ChatReply {
        let started = Instant::now();
        self.metrics.inc_request();

        let classification = self.classify(message);
        self.metrics.inc_intent(classification.intent.as_code());

        let reply = self.route(&classification, message).await;

        self.metrics.observe_latency(started.elapsed());
        info!(
            intent = classification.intent.as_code(),
            rule = classification.rule.as_deref().unwrap_or("-"),
            reason = ?classification.reason,
            fallback = reply.fallback,
            sources = reply.sources.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "message handled"
        );

        reply
    }

    /// Builds the reply for an already classified message. The small-talk
    /// topic is recovered from the message when it agrees with `intent`.
    pub async fn respond(&self, intent: Intent, message: &str) -> ChatReply {
        let detailed = self.classify(message);
        let classification = if detailed.intent == intent {
            detailed
        } else {
            Classification {
                intent,
                ..Classification::fallback()
            }
        };

        self.route(&classification, message).await
    }

    async fn route(&self, classification: &Classification, message: &str) -> ChatReply {
        match classification.intent {
            Intent::Emergency => {
                self.metrics.inc_emergency();
                warn!(
                    rule = classification.rule.as_deref().unwrap_or("-"),
                    "emergency message short-circuited"
                );
                ChatReply {
                    text: EMERGENCY_MESSAGE.to_string(),
                    intent: Intent::Emergency,
                    sources: Vec::new(),
                    fallback: false,
                }
            }
            Intent::Greeting | Intent::Farewell | Intent::SmallTalk => {
                self.metrics.inc_canned();
                ChatReply {
                    text: self.canned_text(classification.intent, classification.topic.as_deref()),
                    intent: classification.intent,
                    sources: Vec::new(),
                    fallback: false,
                }
            }
            Intent::MedicalQuery => self.medical_reply(message).await,
        }
    }

    fn canned_text(&self, intent: Intent, topic: Option<&str>) -> String {
        let band = TimeBand::from_hour(self.clock.local_hour());
        self.catalog
            .pool(intent, topic)
            .filter(|pool| !pool.is_empty())
            .and_then(|pool| pool.get(self.picker.pick(pool.len())))
            .map(|template| ResponseCatalog::render(template, band))
            .unwrap_or_else(|| format!("{}! How can I help you today?", band.greeting()))
    }

    async fn medical_reply(&self, message: &str) -> ChatReply {
        self.metrics.inc_rag_call();

        match self.invoke_rag(message).await {
            Ok(answer) => {
                let fallback = answer.answer.trim().is_empty();
                ChatReply {
                    text: sanitize(&answer.answer),
                    intent: Intent::MedicalQuery,
                    sources: answer.sources(),
                    fallback,
                }
            }
            Err(error) => {
                self.metrics.inc_rag_failure();
                warn!(error = ?error, "rag call failed, returning fallback");
                ChatReply {
                    text: RAG_FALLBACK_MESSAGE.to_string(),
                    intent: Intent::MedicalQuery,
                    sources: Vec::new(),
                    fallback: true,
                }
            }
        }
    }

    async fn invoke_rag(&self, message: &str) -> Result<medassist_rag::RagAnswer, RagFailure> {
        let call = AssertUnwindSafe(self.rag.answer(message))
            .catch_unwind()
            .map(|outcome| match outcome {
                Ok(answer) => answer.map_err(RagFailure::from),
                Err(payload) => Err(RagFailure::Panicked(panic_message(payload.as_ref()))),
            });

        match self.rag_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RagFailure::TimedOut(limit))?,
            None => call.await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use medassist_core::{safety::MEDICAL_DISCLAIMER, Passage};
    use medassist_rag::{GenerationError, RagAnswer};
    use parking_lot::Mutex;

    use super::*;

    enum Behaviour {
        Answer(&'static str),
        Fail,
        Hang,
        Panic,
    }

    struct ScriptedRag {
        behaviour: Behaviour,
        calls: AtomicUsize,
        questions: Mutex<Vec<String>>,
    }

    impl ScriptedRag {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                questions: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnswerSource for ScriptedRag {
        async fn answer(&self, question: &str) -> Result<RagAnswer, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.questions.lock().push(question.to_string());
            match self.behaviour {
                Behaviour::Answer(text) => Ok(RagAnswer {
                    answer: text.to_string(),
                    passages: vec![Passage {
                        text: "Fever passage".to_string(),
                        source: "Data/medical_book.pdf".to_string(),
                        score: 0.8,
                    }],
                }),
                Behaviour::Fail => Err(RagError::Generation(GenerationError::Status {
                    status: 429,
                    body: "quota exceeded".to_string(),
                })),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(RagError::Generation(GenerationError::Malformed(
                        "unreachable".to_string(),
                    )))
                }
                Behaviour::Panic => panic!("vector store client exploded"),
            }
        }
    }

    fn assistant(rag: Arc<ScriptedRag>) -> MedicalAssistant {
        MedicalAssistant::new(rag, AppMetrics::shared())
            .with_picker(Arc::new(SeededPicker::new(1)))
            .with_clock(Arc::new(FixedClock(9)))
    }

    #[tokio::test]
    async fn emergency_never_calls_rag() {
        let rag = ScriptedRag::new(Behaviour::Answer("unused"));
        let assistant = assistant(rag.clone());

        for message in [
            "I have chest pain and can't breathe",
            "hello, my friend is unconscious",
            "I think I took an overdose, bye",
        ] {
            let reply = assistant.handle(message).await;
            assert_eq!(reply.intent, Intent::Emergency);
            assert_eq!(reply.text, EMERGENCY_MESSAGE);
        }

        assert_eq!(rag.calls(), 0);
        assert_eq!(assistant.metrics().snapshot().emergency_total, 3);
    }

    #[tokio::test]
    async fn greeting_comes_from_pool_without_disclaimer() {
        let rag = ScriptedRag::new(Behaviour::Answer("unused"));
        let assistant = assistant(rag.clone());
        let pool = ResponseCatalog::default()
            .pool(Intent::Greeting, None)
            .unwrap()
            .iter()
            .map(|template| ResponseCatalog::render(template, TimeBand::Morning))
            .collect::<Vec<_>>();

        let reply = assistant.handle("hi").await;

        assert_eq!(reply.intent, Intent::Greeting);
        assert!(pool.contains(&reply.text), "{}", reply.text);
        assert!(!reply.text.contains(MEDICAL_DISCLAIMER));
        assert_eq!(rag.calls(), 0);
    }

    #[tokio::test]
    async fn time_greeting_uses_clock() {
        struct LastPicker;
        impl ResponsePicker for LastPicker {
            fn pick(&self, len: usize) -> usize {
                len - 2
            }
        }

        let assistant = MedicalAssistant::new(
            ScriptedRag::new(Behaviour::Answer("unused")),
            AppMetrics::shared(),
        )
        .with_picker(Arc::new(LastPicker))
        .with_clock(Arc::new(FixedClock(18)));

        let reply = assistant.respond(Intent::Greeting, "hello").await;
        assert_eq!(reply.text, "Good evening! How can I support you today?");
    }

    #[tokio::test]
    async fn small_talk_uses_topic_pool() {
        let assistant = assistant(ScriptedRag::new(Behaviour::Answer("unused")));

        let reply = assistant.handle("are you a bot?").await;

        assert_eq!(reply.intent, Intent::SmallTalk);
        assert!(reply.text.contains("AI chatbot"));
    }

    #[tokio::test]
    async fn medical_answer_is_sanitized() {
        let rag = ScriptedRag::new(Behaviour::Answer(
            "  Fever is caused by infection. The usual treatment is rest and fluids.  ",
        ));
        let assistant = assistant(rag.clone());

        let reply = assistant.handle("What causes a fever?").await;

        assert_eq!(reply.intent, Intent::MedicalQuery);
        assert!(reply.text.starts_with("Fever is caused by infection."));
        assert!(reply.text.ends_with(MEDICAL_DISCLAIMER));
        assert_eq!(reply.sources, vec!["Data/medical_book.pdf".to_string()]);
        assert!(!reply.fallback);
        assert_eq!(rag.questions.lock().as_slice(), &["What causes a fever?".to_string()]);
    }

    #[tokio::test]
    async fn empty_answer_becomes_fallback_text() {
        let assistant = assistant(ScriptedRag::new(Behaviour::Answer("   ")));

        let reply = assistant.handle("What causes a fever?").await;

        assert!(reply.fallback);
        assert!(!reply.text.is_empty());
    }

    #[tokio::test]
    async fn rag_failure_returns_fixed_fallback() {
        let rag = ScriptedRag::new(Behaviour::Fail);
        let assistant = assistant(rag.clone());

        let reply = assistant.handle("What causes a fever?").await;

        assert_eq!(reply.text, RAG_FALLBACK_MESSAGE);
        assert!(reply.fallback);
        assert_eq!(rag.calls(), 1);
        assert_eq!(assistant.metrics().snapshot().rag_failures_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rag_timeout_is_a_failure() {
        let assistant = assistant(ScriptedRag::new(Behaviour::Hang))
            .with_rag_timeout(Some(Duration::from_secs(5)));

        let reply = assistant.handle("What causes a fever?").await;

        assert_eq!(reply.text, RAG_FALLBACK_MESSAGE);
        assert!(reply.fallback);
    }

    #[tokio::test]
    async fn rag_panic_returns_fixed_fallback() {
        let rag = ScriptedRag::new(Behaviour::Panic);
        let assistant = assistant(rag.clone());

        let reply = assistant.handle("What causes a fever?").await;

        assert_eq!(reply.text, RAG_FALLBACK_MESSAGE);
        assert!(reply.fallback);
        assert_eq!(rag.calls(), 1);
        assert_eq!(assistant.metrics().snapshot().rag_failures_total, 1);
    }

    #[tokio::test]
    async fn rag_panic_without_timeout_is_still_caught() {
        let assistant = assistant(ScriptedRag::new(Behaviour::Panic)).with_rag_timeout(None);

        let reply = assistant.handle("How is a fever treated?").await;

        assert_eq!(reply.text, RAG_FALLBACK_MESSAGE);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        let borrowed: Box<dyn Any + Send> = Box::new("bang");
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(owned.as_ref()), "boom");
        assert_eq!(panic_message(borrowed.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn respond_honours_given_intent() {
        let rag = ScriptedRag::new(Behaviour::Answer("Fever is common."));
        let assistant = assistant(rag.clone());

        let reply = assistant.respond(Intent::MedicalQuery, "hi").await;

        assert_eq!(reply.intent, Intent::MedicalQuery);
        assert_eq!(reply.text, "Fever is common.");
        assert_eq!(rag.questions.lock().as_slice(), &["hi".to_string()]);
    }
}
