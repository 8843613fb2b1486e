use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use medassist_api::{build_router, ApiState, IpRateLimiter};
use medassist_assistant::{FixedClock, MedicalAssistant, ResponsePicker, SeededPicker};
use medassist_core::safety::MEDICAL_DISCLAIMER;
use medassist_core::{Passage, EMERGENCY_MESSAGE, RAG_FALLBACK_MESSAGE};
use medassist_observability::AppMetrics;
use medassist_rag::{AnswerSource, GenerationError, RagAnswer, RagError};
use serde_json::{json, Value};
use tower::ServiceExt;

enum Behaviour {
    Answer(&'static str),
    Fail,
    Panic,
}

struct ScriptedSource {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerSource for ScriptedSource {
    async fn answer(&self, _question: &str) -> Result<RagAnswer, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Answer(text) => Ok(RagAnswer {
                answer: text.to_string(),
                passages: vec![Passage {
                    text: "Fever is a temporary rise in body temperature.".to_string(),
                    source: "Data/Medical_book.pdf".to_string(),
                    score: 0.87,
                }],
            }),
            Behaviour::Fail => Err(RagError::Generation(GenerationError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            })),
            Behaviour::Panic => panic!("answer source exploded"),
        }
    }
}

fn app_with(source: Arc<ScriptedSource>, max_requests: usize) -> Router {
    let assistant = MedicalAssistant::new(source, AppMetrics::shared())
        .with_picker(Arc::new(SeededPicker::new(7)))
        .with_clock(Arc::new(FixedClock(9)));
    let limiter = IpRateLimiter::new(Duration::from_secs(60), max_requests);
    build_router(ApiState::new(assistant, limiter))
}

fn app(source: Arc<ScriptedSource>) -> Router {
    app_with(source, 100)
}

fn form_request(msg: Option<&str>) -> Request<Body> {
    let body = match msg {
        Some(msg) => format!("msg={}", msg.replace(' ', "+")),
        None => String::new(),
    };
    Request::builder()
        .method("POST")
        .uri("/get")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn index_serves_chat_page() {
    let response = app(ScriptedSource::new(Behaviour::Fail))
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<form"));
}

#[tokio::test]
async fn greeting_gets_canned_reply_without_rag() {
    let source = ScriptedSource::new(Behaviour::Fail);
    let response = app(source.clone())
        .oneshot(form_request(Some("hi")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(!text.is_empty());
    assert!(!text.contains("{time_greeting}"));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn missing_or_blank_message_is_rejected() {
    for msg in [None, Some(""), Some("   ")] {
        let source = ScriptedSource::new(Behaviour::Fail);
        let response = app(source.clone()).oneshot(form_request(msg)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().is_some_and(|error| !error.is_empty()));
        assert_eq!(source.calls(), 0);
    }
}

#[tokio::test]
async fn emergency_short_circuits_before_rag() {
    let source = ScriptedSource::new(Behaviour::Answer("should never be used"));
    let response = app(source.clone())
        .oneshot(form_request(Some("I have chest pain and can't breathe")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, EMERGENCY_MESSAGE);
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn rag_failure_returns_polite_fallback() {
    let source = ScriptedSource::new(Behaviour::Fail);
    let response = app(source.clone())
        .oneshot(form_request(Some("What are the symptoms of diabetes?")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, RAG_FALLBACK_MESSAGE);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn medical_answer_gets_disclaimer() {
    let source = ScriptedSource::new(Behaviour::Answer(
        "Fever is often caused by infection. Treatment includes rest and fluids.",
    ));
    let response = app(source)
        .oneshot(form_request(Some("What causes a fever?")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.starts_with("Fever is often caused by infection."));
    assert!(text.ends_with(MEDICAL_DISCLAIMER));
}

#[tokio::test]
async fn json_chat_returns_structured_reply() {
    let source = ScriptedSource::new(Behaviour::Answer(
        "Hydration and rest usually help a mild fever.",
    ));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "message": "How do I bring down a fever at home?" }).to_string(),
        ))
        .unwrap();

    let response = app(source).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["intent"], "medical_query");
    assert_eq!(body["fallback"], false);
    assert_eq!(body["sources"], json!(["Data/Medical_book.pdf"]));
    assert_eq!(body["text"], "Hydration and rest usually help a mild fever.");
}

#[tokio::test]
async fn json_chat_rejects_blank_message() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "message": "  " }).to_string()))
        .unwrap();

    let response = app(ScriptedSource::new(Behaviour::Fail))
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_metrics_and_rules_version() {
    let app = app(ScriptedSource::new(Behaviour::Fail));

    let response = app.clone().oneshot(form_request(Some("hello"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["metrics"]["requests_total"], 1);
    assert_eq!(body["metrics"]["canned_total"], 1);
    assert!(body["rules_version"].as_str().is_some());
}

fn from_peer(mut request: Request<Body>, ip: [u8; 4]) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 51000))));
    request
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let app = app_with(ScriptedSource::new(Behaviour::Fail), 1);

    let first = app
        .clone()
        .oneshot(from_peer(form_request(Some("hello")), [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(from_peer(form_request(Some("hello")), [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    assert!(body_json(second).await["error"].is_string());

    let third = app
        .oneshot(from_peer(form_request(Some("hello")), [10, 0, 0, 2]))
        .await
        .unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}

#[tokio::test]
async fn spoofed_forwarded_header_does_not_reset_budget() {
    let app = app_with(ScriptedSource::new(Behaviour::Fail), 1);

    let first = app
        .clone()
        .oneshot(from_peer(form_request(Some("hello")), [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let mut spoofed = from_peer(form_request(Some("hello")), [10, 0, 0, 1]);
    spoofed
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.4".parse().unwrap());
    let second = app.oneshot(spoofed).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn trusted_proxy_headers_separate_clients_behind_one_peer() {
    let source = ScriptedSource::new(Behaviour::Fail);
    let assistant = MedicalAssistant::new(source, AppMetrics::shared())
        .with_picker(Arc::new(SeededPicker::new(7)))
        .with_clock(Arc::new(FixedClock(9)));
    let limiter = IpRateLimiter::new(Duration::from_secs(60), 1);
    let app = build_router(ApiState::new(assistant, limiter).with_trusted_proxy_headers(true));

    for client in ["203.0.113.7", "203.0.113.8"] {
        let mut request = from_peer(form_request(Some("hello")), [10, 0, 0, 1]);
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn answer_source_panic_returns_polite_fallback() {
    let source = ScriptedSource::new(Behaviour::Panic);
    let response = app(source.clone())
        .oneshot(form_request(Some("What is hypertension?")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, RAG_FALLBACK_MESSAGE);
    assert_eq!(source.calls(), 1);
}

struct ExplodingPicker;

impl ResponsePicker for ExplodingPicker {
    fn pick(&self, _len: usize) -> usize {
        panic!("picker exploded")
    }
}

#[tokio::test]
async fn handler_panic_becomes_json_500() {
    let source = ScriptedSource::new(Behaviour::Fail);
    let assistant = MedicalAssistant::new(source, AppMetrics::shared())
        .with_picker(Arc::new(ExplodingPicker))
        .with_clock(Arc::new(FixedClock(9)));
    let app = build_router(ApiState::new(
        assistant,
        IpRateLimiter::new(Duration::from_secs(60), 100),
    ));

    let response = app.oneshot(form_request(Some("hi"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(response).await["error"].is_string());
}
