//! # Prometheus Metrics
//!
//! Operational metrics for the token authority, scraped at `/metrics` on
//! the metrics port. Everything lives in a dedicated registry with the
//! `upay` prefix.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

/// Metric handles of the node. Cheap to clone.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Tokens registered through transform outputs.
    pub tokens_created_total: IntCounter,
    /// Tokens spent as transform inputs.
    pub tokens_voided_total: IntCounter,
    /// Committed transforms.
    pub transforms_total: IntCounter,
    /// Tokens checked by `/validate`.
    pub tokens_validated_total: IntCounter,
    /// Fresh tokens handed out by `/create`.
    pub tokens_generated_total: IntCounter,
    /// Refused requests, by reason.
    pub requests_rejected_total: IntCounterVec,
    /// Handler latency in seconds, by endpoint.
    pub request_latency_seconds: HistogramVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("upay".into()), None)?;

        let tokens_created_total = counter(
            &registry,
            "tokens_created_total",
            "Tokens registered by committed transforms",
        )?;
        let tokens_voided_total = counter(
            &registry,
            "tokens_voided_total",
            "Tokens spent by committed transforms",
        )?;
        let transforms_total =
            counter(&registry, "transforms_total", "Committed transforms")?;
        let tokens_validated_total = counter(
            &registry,
            "tokens_validated_total",
            "Tokens submitted for validation",
        )?;
        let tokens_generated_total = counter(
            &registry,
            "tokens_generated_total",
            "Unregistered tokens generated by /create",
        )?;

        let requests_rejected_total = IntCounterVec::new(
            Opts::new("requests_rejected_total", "Refused requests by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(requests_rejected_total.clone()))?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_seconds",
                "Token API handler latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            tokens_created_total,
            tokens_voided_total,
            transforms_total,
            tokens_validated_total,
            tokens_generated_total,
            requests_rejected_total,
            request_latency_seconds,
        })
    }

    pub fn observe_latency(&self, endpoint: &str, started: Instant) {
        self.request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn reject(&self, reason: &str) {
        self.requests_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
