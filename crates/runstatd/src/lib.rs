//! runstatd — scrape endpoint for the runstat metric registry.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition of every registered metric |
//! | GET | `/healthz` | Liveness probe, always `ok` |

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use runstat_metrics::{MetricRegistry, render_prometheus};
use runstat_recorder::{CallHistograms, CallRecorder};
use runstat_sampler::ObjectTracker;

/// Content type of the exposition format served on `/metrics`.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state for the exporter handlers.
#[derive(Clone)]
pub struct ExporterState {
    registry: Arc<MetricRegistry>,
    /// Measures the scrape handler itself.
    scrape: Arc<CallRecorder>,
    objects: Option<ObjectTracker>,
}

impl ExporterState {
    /// Create the exporter state; scrapes are recorded into `histograms`.
    pub fn new(histograms: CallHistograms, threshold: Duration) -> Self {
        Self {
            registry: histograms.registry().clone(),
            scrape: Arc::new(CallRecorder::new("Exporter", "#metrics", histograms, threshold)),
            objects: None,
        }
    }

    /// Builder method: count in-flight scrapes as live `Scrape` objects.
    pub fn with_object_tracker(self, tracker: ObjectTracker) -> Self {
        Self {
            objects: Some(tracker),
            ..self
        }
    }

    /// Registry rendered on every scrape.
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Recorder timing the `/metrics` handler.
    pub fn scrape_recorder(&self) -> &Arc<CallRecorder> {
        &self.scrape
    }
}

/// Build the exporter router.
pub fn build_router(state: ExporterState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// GET /metrics
async fn metrics(State(state): State<ExporterState>) -> impl IntoResponse {
    let _scrape = state.objects.as_ref().map(|t| t.track_named("Scrape"));
    let body = state
        .scrape
        .measure(|| render_prometheus(&state.registry.gather()));
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body)
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}
