use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Process-wide counters. Each update is also forwarded to the `metrics`
/// facade so an installed exporter can pick it up.
#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    emergency_total: AtomicU64,
    canned_total: AtomicU64,
    rag_calls_total: AtomicU64,
    rag_failures_total: AtomicU64,
    rejected_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub emergency_total: u64,
    pub canned_total: u64,
    pub rag_calls_total: u64,
    pub rag_failures_total: u64,
    pub rejected_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_requests_total").increment(1);
    }

    pub fn inc_intent(&self, intent: &'static str) {
        metrics::counter!("medassist_intent_total", "intent" => intent).increment(1);
    }

    pub fn inc_emergency(&self) {
        self.emergency_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_emergency_total").increment(1);
    }

    pub fn inc_canned(&self) {
        self.canned_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_canned_total").increment(1);
    }

    pub fn inc_rag_call(&self) {
        self.rag_calls_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_rag_calls_total").increment(1);
    }

    pub fn inc_rag_failure(&self) {
        self.rag_failures_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_rag_failures_total").increment(1);
    }

    pub fn inc_rejected(&self) {
        self.rejected_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("medassist_rejected_total").increment(1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        metrics::histogram!("medassist_request_latency_seconds").record(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            emergency_total: self.emergency_total.load(Ordering::Relaxed),
            canned_total: self.canned_total.load(Ordering::Relaxed),
            rag_calls_total: self.rag_calls_total.load(Ordering::Relaxed),
            rag_failures_total: self.rag_failures_total.load(Ordering::Relaxed),
            rejected_total: self.rejected_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,medassist_api=info,medassist_assistant=info,medassist_rag=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
