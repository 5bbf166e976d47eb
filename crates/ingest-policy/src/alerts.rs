// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sustained-condition alerting on aggregated pipeline signals.
//!
//! Three conditions are tracked independently: queue backlog, workflow
//! failures and service health. A condition becomes eligible once it has
//! been above `normal` for the sustained window and no alert for it was
//! published within the cooldown window. Failed publications do not start a
//! cooldown, so the next evaluation retries.

use crate::config::ObservabilityConfig;
use crate::metrics::PolicyMetrics;
use crate::severity::{classify, Severity};
use crate::tracker::{ConditionTracker, CooldownTrigger, Observation};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertCondition {
    QueueBacklog,
    WorkflowFailures,
    ServiceHealth,
}

impl AlertCondition {
    pub const ALL: [AlertCondition; 3] = [
        AlertCondition::QueueBacklog,
        AlertCondition::WorkflowFailures,
        AlertCondition::ServiceHealth,
    ];

    /// Human-readable name, e.g. "Queue Backlog".
    pub fn title(self) -> &'static str {
        match self {
            AlertCondition::QueueBacklog => "Queue Backlog",
            AlertCondition::WorkflowFailures => "Workflow Failures",
            AlertCondition::ServiceHealth => "Service Health",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueDetail {
    pub ready_messages: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSummary {
    pub total_queued_messages: u64,
    pub total_processing_messages: u64,
    pub bottleneck_queues: Vec<String>,
    pub queues_without_consumers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueMetrics {
    pub queue_details: BTreeMap<String, QueueDetail>,
    pub summary: QueueSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DependencyHealth {
    pub name: Option<String>,
    pub readiness: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthReport {
    pub readiness: Option<String>,
    /// Legacy field, consulted when `readiness` is missing.
    pub status: Option<String>,
    pub dependencies: Vec<DependencyHealth>,
}

/// Raw telemetry the summary is computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityInputs {
    pub queue_metrics: QueueMetrics,
    pub active_workflows: u64,
    pub failed_workflows: u64,
    pub health: HealthReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueBacklogSignal {
    pub severity: Severity,
    pub total_queued_messages: u64,
    pub total_processing_messages: u64,
    pub bottleneck_queues: Vec<String>,
    pub queues_without_consumers: Vec<String>,
    pub warning_threshold: u64,
    pub critical_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowFailureSignal {
    pub severity: Severity,
    pub failed_workflows: u64,
    pub active_workflows: u64,
    pub warning_threshold: u64,
    pub critical_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealthSignal {
    pub severity: Severity,
    pub readiness: String,
    pub unhealthy_dependencies: Vec<String>,
    pub degraded_dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservabilitySummary {
    pub queue_backlog: QueueBacklogSignal,
    pub workflow_failures: WorkflowFailureSignal,
    pub service_health: ServiceHealthSignal,
    pub timestamp: DateTime<Utc>,
}

impl ObservabilitySummary {
    pub fn build(
        inputs: &ObservabilityInputs,
        config: &ObservabilityConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let queue = &inputs.queue_metrics.summary;
        let readiness = inputs
            .health
            .readiness
            .as_deref()
            .or(inputs.health.status.as_deref())
            .unwrap_or("unknown")
            .to_lowercase();

        let mut unhealthy_dependencies = vec![];
        let mut degraded_dependencies = vec![];
        for dependency in &inputs.health.dependencies {
            let name = dependency.name.as_deref().unwrap_or("unknown").to_string();
            match dependency.readiness.as_deref().map(str::to_lowercase).as_deref() {
                Some("unhealthy") => unhealthy_dependencies.push(name),
                Some("degraded") => degraded_dependencies.push(name),
                _ => {}
            }
        }

        Self {
            queue_backlog: QueueBacklogSignal {
                severity: classify(
                    queue.total_queued_messages,
                    config.queue_backlog_warning,
                    config.queue_backlog_critical,
                ),
                total_queued_messages: queue.total_queued_messages,
                total_processing_messages: queue.total_processing_messages,
                bottleneck_queues: queue.bottleneck_queues.clone(),
                queues_without_consumers: queue.queues_without_consumers.clone(),
                warning_threshold: config.queue_backlog_warning,
                critical_threshold: config.queue_backlog_critical,
            },
            workflow_failures: WorkflowFailureSignal {
                severity: classify(
                    inputs.failed_workflows,
                    config.workflow_failure_warning,
                    config.workflow_failure_critical,
                ),
                failed_workflows: inputs.failed_workflows,
                active_workflows: inputs.active_workflows,
                warning_threshold: config.workflow_failure_warning,
                critical_threshold: config.workflow_failure_critical,
            },
            service_health: ServiceHealthSignal {
                severity: readiness_severity(&readiness),
                readiness,
                unhealthy_dependencies,
                degraded_dependencies,
            },
            timestamp: now,
        }
    }

    pub fn severity(&self, condition: AlertCondition) -> Severity {
        match condition {
            AlertCondition::QueueBacklog => self.queue_backlog.severity,
            AlertCondition::WorkflowFailures => self.workflow_failures.severity,
            AlertCondition::ServiceHealth => self.service_health.severity,
        }
    }
}

fn readiness_severity(readiness: &str) -> Severity {
    match readiness {
        "unhealthy" => Severity::Critical,
        "degraded" => Severity::Warning,
        _ => Severity::Normal,
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Multi-line alert body for `condition`.
pub fn alert_message(condition: AlertCondition, summary: &ObservabilitySummary) -> String {
    let timestamp = summary
        .timestamp
        .to_rfc3339_opts(SecondsFormat::AutoSi, false);
    match condition {
        AlertCondition::QueueBacklog => {
            let signal = &summary.queue_backlog;
            format!(
                "Operational alert: queue backlog is sustained above threshold.\n\
                 - Severity: {}\n\
                 - Total queued messages: {}\n\
                 - Bottleneck queues: {}\n\
                 - Timestamp: {}",
                signal.severity,
                signal.total_queued_messages,
                list_or_none(&signal.bottleneck_queues),
                timestamp,
            )
        }
        AlertCondition::WorkflowFailures => {
            let signal = &summary.workflow_failures;
            format!(
                "Operational alert: workflow failures are sustained above threshold.\n\
                 - Severity: {}\n\
                 - Failed workflows: {}\n\
                 - Active workflows: {}\n\
                 - Timestamp: {}",
                signal.severity, signal.failed_workflows, signal.active_workflows, timestamp,
            )
        }
        AlertCondition::ServiceHealth => {
            let signal = &summary.service_health;
            format!(
                "Operational alert: unhealthy service readiness is sustained.\n\
                 - Severity: {}\n\
                 - Readiness: {}\n\
                 - Unhealthy dependencies: {}\n\
                 - Timestamp: {}",
                signal.severity,
                signal.readiness,
                list_or_none(&signal.unhealthy_dependencies),
                timestamp,
            )
        }
    }
}

/// Alert as handed to downstream alert channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationalAlert {
    pub title: String,
    pub body: String,
    pub service: String,
    pub category: String,
    pub severity: u8,
}

impl OperationalAlert {
    pub fn new(condition: AlertCondition, severity: Severity, message: &str) -> Self {
        Self {
            title: format!("Operational Alert: {}", condition.title()),
            body: message.to_string(),
            service: "ingest-policy".to_string(),
            category: "operational_observability".to_string(),
            severity: severity.alert_value(),
        }
    }
}

#[async_trait]
pub trait AlertPublisher: Send + Sync {
    /// Returns whether the alert was delivered. Implementations log their
    /// own failures; the evaluator never retries within one evaluation.
    async fn publish(&self, condition: AlertCondition, severity: Severity, message: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionStatus {
    pub condition: AlertCondition,
    pub active: bool,
    pub severity: Severity,
    pub sustained_seconds: u64,
    pub cooldown_remaining_seconds: u64,
    pub eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmittedAlert {
    pub condition: AlertCondition,
    pub severity: Severity,
    pub emitted: bool,
    pub message: String,
    pub emitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvaluation {
    pub evaluated_at: DateTime<Utc>,
    pub sustained_duration_seconds: u64,
    pub cooldown_seconds: u64,
    pub alerts_emitted: Vec<EmittedAlert>,
    pub condition_states: Vec<ConditionStatus>,
    pub summary: ObservabilitySummary,
}

pub struct AlertEvaluator {
    config: ObservabilityConfig,
    publisher: Arc<dyn AlertPublisher>,
    trackers: Mutex<[ConditionTracker; 3]>,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl AlertEvaluator {
    pub fn new(
        config: ObservabilityConfig,
        publisher: Arc<dyn AlertPublisher>,
        metrics: Option<Arc<PolicyMetrics>>,
    ) -> Self {
        Self {
            config,
            publisher,
            trackers: Mutex::new(std::array::from_fn(|_| {
                ConditionTracker::new(CooldownTrigger::Alert)
            })),
            metrics,
        }
    }

    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    pub async fn reset(&self) {
        for tracker in self.trackers.lock().await.iter_mut() {
            tracker.reset();
        }
    }

    /// Runs every condition through its tracker and publishes alerts for the
    /// eligible ones unless `emit_alerts` is false. Evaluations are serialized.
    pub async fn evaluate(
        &self,
        summary: ObservabilitySummary,
        emit_alerts: bool,
        now: DateTime<Utc>,
    ) -> AlertEvaluation {
        let mut trackers = self.trackers.lock().await;
        let mut condition_states = Vec::with_capacity(AlertCondition::ALL.len());
        let mut alerts_emitted = vec![];

        for condition in AlertCondition::ALL {
            let severity = summary.severity(condition);
            let tracker = &mut trackers[condition.index()];
            let report = tracker.evaluate(Observation {
                severity,
                telemetry_stale: false,
                sustained: self.config.sustained_secs,
                cooldown: self.config.cooldown_secs,
                preset: None,
                now,
            });
            if let Some(metrics) = &self.metrics {
                metrics
                    .alert_condition_severity
                    .with_label_values(&[condition.to_string().as_str()])
                    .set(severity.as_gauge());
            }

            if report.policy_active && emit_alerts {
                let message = alert_message(condition, &summary);
                let emitted = self.publisher.publish(condition, severity, &message).await;
                self.record_publication(condition, severity, emitted);
                if emitted {
                    tracker.start_cooldown(now, self.config.cooldown_secs);
                }
                alerts_emitted.push(EmittedAlert {
                    condition,
                    severity,
                    emitted,
                    message,
                    emitted_at: emitted.then_some(now),
                });
            }

            condition_states.push(ConditionStatus {
                condition,
                active: report.active,
                severity,
                sustained_seconds: report.sustained_seconds,
                cooldown_remaining_seconds: report.cooldown_remaining_seconds,
                eligible: report.policy_active,
            });
        }

        AlertEvaluation {
            evaluated_at: now,
            sustained_duration_seconds: self.config.sustained_secs.as_secs(),
            cooldown_seconds: self.config.cooldown_secs.as_secs(),
            alerts_emitted,
            condition_states,
            summary,
        }
    }

    fn record_publication(&self, condition: AlertCondition, severity: Severity, emitted: bool) {
        let label = condition.to_string();
        if emitted {
            info!(%condition, %severity, "Published operational alert");
            if let Some(metrics) = &self.metrics {
                metrics
                    .alerts_published
                    .with_label_values(&[label.as_str()])
                    .inc();
            }
        } else {
            warn!(%condition, %severity, "Operational alert was not delivered");
            if let Some(metrics) = &self.metrics {
                metrics
                    .alert_publish_failures
                    .with_label_values(&[label.as_str()])
                    .inc();
            }
        }
    }
}
