// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServerConfig;
use crate::handlers::{
    evaluate_alerts, evaluate_throughput, evaluate_workflow_throughput, metrics,
    observability_summary, push_telemetry, reset_alerts, reset_throughput,
    reset_workflow_throughput, throughput_status, workflow_throughput_status,
};
use crate::publisher::{LogPublisher, WebhookPublisher};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use ingest_policy::alerts::{AlertEvaluator, AlertPublisher, ObservabilityInputs};
use ingest_policy::{
    Clock, PolicyInputSource, PolicyMetrics, QueueThroughputPolicy, WorkflowThroughputPolicy,
};
use parking_lot::RwLock;
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info, Level};

/// Shared state behind every route.
pub struct AppState {
    pub clock: Arc<dyn Clock>,
    pub queue_policy: Arc<QueueThroughputPolicy>,
    pub workflow_policy: Arc<WorkflowThroughputPolicy>,
    pub inputs: Arc<dyn PolicyInputSource>,
    pub alerts: Arc<AlertEvaluator>,
    /// Last telemetry pushed to `/telemetry`.
    pub telemetry: RwLock<ObservabilityInputs>,
    pub registry: Registry,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn AlertPublisher>,
        registry: Registry,
    ) -> Self {
        let metrics = Arc::new(PolicyMetrics::new(&registry));
        let queue_policy = QueueThroughputPolicy::for_queue(config.queue_gate.worker_count)
            .with_metrics(metrics.clone());
        let workflow_policy =
            WorkflowThroughputPolicy::for_workflows(config.workflow_gate.max_parallel_workflows)
                .with_metrics(metrics.clone());
        let alerts = AlertEvaluator::new(config.observability.clone(), publisher, Some(metrics));
        Self {
            clock,
            queue_policy: Arc::new(queue_policy),
            workflow_policy: Arc::new(workflow_policy),
            inputs: config.policy_inputs(),
            alerts: Arc::new(alerts),
            telemetry: RwLock::new(ObservabilityInputs::default()),
            registry,
        }
    }
}

/// Picks the webhook publisher when a URL is configured, the log publisher otherwise.
pub fn make_publisher(config: &ServerConfig) -> Result<Arc<dyn AlertPublisher>> {
    Ok(match &config.alert_webhook_url {
        Some(url) => {
            info!("publishing alerts to {url}");
            Arc::new(WebhookPublisher::new(url.clone())?)
        }
        None => {
            info!("no alert webhook configured, alerts will be logged");
            Arc::new(LogPublisher)
        }
    })
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/telemetry", post(push_telemetry))
        .route("/throughput-policy/status", get(throughput_status))
        .route("/throughput-policy/evaluate", post(evaluate_throughput))
        .route("/throughput-policy/reset", post(reset_throughput))
        .route("/throughput-policy/workflow/status", get(workflow_throughput_status))
        .route("/throughput-policy/workflow/evaluate", post(evaluate_workflow_throughput))
        .route("/throughput-policy/workflow/reset", post(reset_workflow_throughput))
        .route("/observability/summary", get(observability_summary))
        .route("/observability/alerts/evaluate", post(evaluate_alerts))
        .route("/observability/reset", post(reset_alerts))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http().on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Seconds),
                ),
            ),
        )
        .with_state(state)
}

/// Serves `app` until ctrl-c or SIGTERM.
pub async fn server(listener: TcpListener, app: Router) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, shutting down");
}
