mod config;
mod error;
mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{ConnectInfo, Form, Json, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use medassist_assistant::MedicalAssistant;
use medassist_core::{ChatReply, IntentClassifier};
use medassist_observability::{AppMetrics, MetricsSnapshot};
use medassist_rag::{RagChain, TogetherChatModel, TogetherConfig};
use medassist_retrieval::{describe_index_host, HuggingFaceEmbedder, PineconeRetriever};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use crate::config::{AppConfig, ConfigError, IndexLocation};
pub use crate::error::ApiError;
pub use crate::rate_limit::IpRateLimiter;

const MAX_BODY_BYTES: usize = 16 * 1024;
const UPSTREAM_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const EMPTY_MESSAGE_ERROR: &str = "Please enter a message so I can help you.";

static CHAT_PAGE: &str = include_str!("../static/chat.html");

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<MedicalAssistant>,
    pub metrics: Arc<AppMetrics>,
    pub limiter: IpRateLimiter,
    pub trust_forwarded_for: bool,
}

impl ApiState {
    pub fn new(assistant: MedicalAssistant, limiter: IpRateLimiter) -> Self {
        let metrics = assistant.metrics().clone();
        Self {
            assistant: Arc::new(assistant),
            metrics,
            limiter,
            trust_forwarded_for: false,
        }
    }

    /// Keys rate limiting on proxy headers rather than the socket peer.
    pub fn with_trusted_proxy_headers(mut self, trusted: bool) -> Self {
        self.trust_forwarded_for = trusted;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
    rules_version: String,
}

/// Wires the embedding, retrieval and generation clients into a chain and
/// resolves the Pinecone host when only an index name is configured.
pub async fn build_rag_chain(config: &AppConfig) -> Result<RagChain> {
    let http = Client::builder()
        .timeout(UPSTREAM_HTTP_TIMEOUT)
        .build()
        .context("failed to build upstream http client")?;

    let index_host = match &config.pinecone_index {
        IndexLocation::Host(host) => host.clone(),
        IndexLocation::Named {
            control_plane,
            index_name,
        } => {
            let host =
                describe_index_host(&http, control_plane, &config.pinecone_api_key, index_name)
                    .await
                    .with_context(|| format!("failed to resolve pinecone index {index_name}"))?;
            info!(index = %index_name, host = %host, "resolved pinecone index host");
            host
        }
    };

    let embedder = HuggingFaceEmbedder::new(
        http.clone(),
        &config.hf_base_url,
        config.hf_embedding_model.clone(),
        config.hf_api_token.clone(),
    )
    .context("invalid embedding endpoint")?;

    let retriever = PineconeRetriever::new(
        http.clone(),
        &index_host,
        config.pinecone_api_key.clone(),
        Arc::new(embedder),
    )
    .context("invalid pinecone index host")?
    .with_namespace(config.pinecone_namespace.clone());

    let together = TogetherConfig {
        base_url: config.together_base_url.clone(),
        model: config.together_model.clone(),
        ..TogetherConfig::new(config.together_api_key.clone())
    };
    let model = TogetherChatModel::new(http, together).context("invalid together endpoint")?;

    Ok(RagChain::new(Arc::new(retriever), Arc::new(model)).with_top_k(config.top_k))
}

pub fn load_classifier(config: &AppConfig) -> Result<IntentClassifier> {
    let Some(path) = config.intent_rules_path.as_ref() else {
        return Ok(IntentClassifier::builtin());
    };

    let classifier = IntentClassifier::from_json_path(path)
        .with_context(|| format!("failed to load intent rules from {}", path.display()))?;
    info!(
        path = %path.display(),
        version = classifier.version(),
        "loaded intent rules"
    );
    Ok(classifier)
}

pub async fn build_assistant(
    config: &AppConfig,
    metrics: Arc<AppMetrics>,
) -> Result<MedicalAssistant> {
    let chain = build_rag_chain(config).await?;
    let classifier = load_classifier(config)?;

    Ok(MedicalAssistant::new(Arc::new(chain), metrics)
        .with_classifier(classifier)
        .with_rag_timeout(config.rag_timeout))
}

pub async fn build_app(config: &AppConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();
    let assistant = build_assistant(config, metrics).await?;
    let limiter = IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max);

    let state = ApiState::new(assistant, limiter)
        .with_trusted_proxy_headers(config.trust_forwarded_for);

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/get", post(get_reply))
        .route("/v1/chat", post(chat))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let app = build_app(&config).await?;

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %config.bind, "medical assistant api started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server error")?;

    info!("medical assistant api stopped");
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        rules_version: state.assistant.classifier().version().to_string(),
    };
    (StatusCode::OK, Json(payload))
}

async fn get_reply(
    State(state): State<ApiState>,
    form: Result<Form<ChatForm>, FormRejection>,
) -> Result<String, ApiError> {
    let raw = match form {
        Ok(Form(form)) => form.msg,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable chat form");
            None
        }
    };

    let message = require_message(&state, raw)?;
    Ok(state.assistant.handle(&message).await.text)
}

async fn chat(
    State(state): State<ApiState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let raw = match request {
        Ok(Json(request)) => request.message,
        Err(rejection) => {
            state.metrics.inc_rejected();
            return Err(ApiError::BadRequest(rejection.body_text()));
        }
    };

    let message = require_message(&state, raw)?;
    Ok(Json(state.assistant.handle(&message).await))
}

fn require_message(state: &ApiState, raw: Option<String>) -> Result<String, ApiError> {
    match raw.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => Ok(message.to_string()),
        _ => {
            state.metrics.inc_rejected();
            Err(ApiError::BadRequest(EMPTY_MESSAGE_ERROR.to_string()))
        }
    }
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = client_key(&request, state.trust_forwarded_for);
    if let Err(retry_after) = state.limiter.check(&ip) {
        state.metrics.inc_rejected();
        warn!(client = %ip, "rate limit exceeded");
        return ApiError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        }
        .into_response();
    }

    next.run(request).await
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/" | "/health")
}

/// Identifies the caller for rate limiting. Proxy headers are only honoured
/// when trusted, since any client can set them.
fn client_key(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = forwarded_ip(request) {
            return forwarded;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}

fn forwarded_ip(request: &Request<Body>) -> Option<String> {
    let headers = request.headers();
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
