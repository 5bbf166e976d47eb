// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::admin::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ingest_policy::alerts::{
    AlertEvaluation, ObservabilityInputs, ObservabilitySummary, QueueMetrics,
};
use ingest_policy::{PolicyInputs, ThroughputStatus, WorkflowSnapshot};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// Any failure surfaced by a handler. Rendered as `{"detail": ...}` with a 500.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

/// Per-request overrides for the configured policy inputs.
#[derive(Debug, Default, Deserialize)]
pub struct PolicyOverrides {
    pub preset: Option<String>,
    pub telemetry_stale: Option<bool>,
}

impl PolicyOverrides {
    fn apply(self, mut inputs: PolicyInputs) -> PolicyInputs {
        if let Some(preset) = self.preset {
            inputs.preset = Some(preset);
        }
        if let Some(stale) = self.telemetry_stale {
            inputs.telemetry_stale = stale;
        }
        inputs
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkflowLoad {
    pub active_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    #[serde(default = "default_emit_alerts")]
    pub emit_alerts: bool,
}

fn default_emit_alerts() -> bool {
    true
}

pub async fn push_telemetry(
    State(state): State<Arc<AppState>>,
    Json(inputs): Json<ObservabilityInputs>,
) -> StatusCode {
    debug!(
        total_queued = inputs.queue_metrics.summary.total_queued_messages,
        failed_workflows = inputs.failed_workflows,
        "telemetry received"
    );
    *state.telemetry.write() = inputs;
    StatusCode::ACCEPTED
}

/// Evaluates the queue policy against the most recently pushed telemetry.
pub async fn throughput_status(
    State(state): State<Arc<AppState>>,
    Query(overrides): Query<PolicyOverrides>,
) -> Json<ThroughputStatus> {
    let queues = state.telemetry.read().queue_metrics.clone();
    Json(evaluate_status(&state, &queues, overrides))
}

/// Evaluates the queue policy against queue metrics supplied in the body.
pub async fn evaluate_throughput(
    State(state): State<Arc<AppState>>,
    Query(overrides): Query<PolicyOverrides>,
    Json(queues): Json<QueueMetrics>,
) -> Json<ThroughputStatus> {
    Json(evaluate_status(&state, &queues, overrides))
}

pub async fn reset_throughput(State(state): State<Arc<AppState>>) -> StatusCode {
    state.queue_policy.reset();
    StatusCode::NO_CONTENT
}

/// Evaluates the workflow-count policy against the last pushed `active_workflows`.
pub async fn workflow_throughput_status(
    State(state): State<Arc<AppState>>,
    Query(overrides): Query<PolicyOverrides>,
) -> Json<WorkflowSnapshot> {
    let active_count = state.telemetry.read().active_workflows;
    Json(evaluate_workflows(&state, active_count, overrides))
}

pub async fn evaluate_workflow_throughput(
    State(state): State<Arc<AppState>>,
    Query(overrides): Query<PolicyOverrides>,
    Json(load): Json<WorkflowLoad>,
) -> Json<WorkflowSnapshot> {
    Json(evaluate_workflows(&state, load.active_count, overrides))
}

pub async fn reset_workflow_throughput(State(state): State<Arc<AppState>>) -> StatusCode {
    state.workflow_policy.reset();
    StatusCode::NO_CONTENT
}

pub async fn observability_summary(
    State(state): State<Arc<AppState>>,
) -> Json<ObservabilitySummary> {
    Json(current_summary(&state))
}

pub async fn evaluate_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> Json<AlertEvaluation> {
    let summary = current_summary(&state);
    let evaluation = state
        .alerts
        .evaluate(summary, query.emit_alerts, state.clock.now())
        .await;
    Json(evaluation)
}

pub async fn reset_alerts(State(state): State<Arc<AppState>>) -> StatusCode {
    state.alerts.reset().await;
    StatusCode::NO_CONTENT
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    let mut buffer = vec![];
    TextEncoder.encode(&state.registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn evaluate_status(
    state: &AppState,
    queues: &QueueMetrics,
    overrides: PolicyOverrides,
) -> ThroughputStatus {
    let inputs = overrides.apply(state.inputs.policy_inputs());
    ThroughputStatus::evaluate(&state.queue_policy, queues, &inputs, state.clock.now())
}

fn evaluate_workflows(
    state: &AppState,
    active_count: u64,
    overrides: PolicyOverrides,
) -> WorkflowSnapshot {
    let inputs = overrides.apply(state.inputs.policy_inputs());
    state
        .workflow_policy
        .evaluate(active_count, &inputs, state.clock.now())
}

fn current_summary(state: &AppState) -> ObservabilitySummary {
    let telemetry = state.telemetry.read();
    ObservabilitySummary::build(&telemetry, state.alerts.config(), state.clock.now())
}
