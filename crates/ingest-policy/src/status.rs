// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::alerts::QueueMetrics;
use crate::config::PolicyInputs;
use crate::policy::{QueueSnapshot, QueueThroughputPolicy};
use crate::preset::PresetName;
use crate::severity::{classify, Severity};
use crate::workload::WorkloadClass;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueState {
    pub queue: String,
    pub queued_messages: u64,
    pub warning_threshold: u64,
    pub critical_threshold: u64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassState {
    pub class_name: WorkloadClass,
    pub active_parallelism: usize,
    pub minimum_floor: usize,
    pub deferred_admission: bool,
    pub reason: String,
}

/// Operator-facing view of the queue-depth policy over the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThroughputStatus {
    pub requested_preset: PresetName,
    pub active_preset: PresetName,
    pub queue_pressure_level: Severity,
    pub policy_active: bool,
    pub telemetry_stale: bool,
    pub fail_safe: bool,
    pub fail_safe_reason: Option<&'static str>,
    pub sustained_seconds: u64,
    pub sustained_seconds_required: u64,
    pub cooldown_seconds: u64,
    pub cooldown_remaining_seconds: u64,
    pub queue_states: Vec<QueueState>,
    pub class_states: Vec<ClassState>,
    pub timestamp: DateTime<Utc>,
}

impl ThroughputStatus {
    /// Evaluates `policy` on the aggregate queued-message count and projects
    /// the snapshot onto every monitored queue and workload class.
    pub fn evaluate(
        policy: &QueueThroughputPolicy,
        queues: &QueueMetrics,
        inputs: &PolicyInputs,
        now: DateTime<Utc>,
    ) -> Self {
        let snapshot = policy.evaluate(queues.summary.total_queued_messages, inputs, now);
        Self::project(&snapshot, queues, inputs.telemetry_stale, now)
    }

    fn project(
        snapshot: &QueueSnapshot,
        queues: &QueueMetrics,
        telemetry_stale: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let queue_states = queues
            .queue_details
            .iter()
            .map(|(name, detail)| QueueState {
                queue: name.clone(),
                queued_messages: detail.ready_messages,
                warning_threshold: snapshot.warning_threshold,
                critical_threshold: snapshot.critical_threshold,
                severity: classify(
                    detail.ready_messages,
                    snapshot.warning_threshold,
                    snapshot.critical_threshold,
                ),
            })
            .collect();

        let class_states = WorkloadClass::ALL
            .into_iter()
            .map(|class| class_state(snapshot, class))
            .collect();

        Self {
            requested_preset: snapshot.requested_preset,
            active_preset: snapshot.active_preset,
            queue_pressure_level: snapshot.pressure_level,
            policy_active: snapshot.policy_active,
            telemetry_stale,
            fail_safe: snapshot.fail_safe,
            fail_safe_reason: snapshot.fail_safe_reason,
            sustained_seconds: snapshot.sustained_seconds,
            sustained_seconds_required: snapshot.sustained_seconds_required,
            cooldown_seconds: snapshot.cooldown_seconds,
            cooldown_remaining_seconds: snapshot.cooldown_remaining_seconds,
            queue_states,
            class_states,
            timestamp: now,
        }
    }
}

fn class_state(snapshot: &QueueSnapshot, class: WorkloadClass) -> ClassState {
    let limits = &snapshot.limits;
    let (minimum_floor, deferred_admission) = match class {
        WorkloadClass::Expensive => (limits.expensive_floor, limits.defer_expensive_admission),
        WorkloadClass::Baseline => (1, false),
    };
    let reason = if snapshot.fail_safe {
        "Telemetry stale; conservative fail-safe limits apply."
    } else if deferred_admission {
        "Sustained queue pressure; expensive admission is delayed."
    } else if snapshot.policy_active {
        "Policy active; admission bounded by queue capacity."
    } else if snapshot.cooldown_remaining_seconds > 0 {
        "Cooling down after recent throttling."
    } else {
        "No sustained pressure; full capacity available."
    };
    ClassState {
        class_name: class,
        active_parallelism: snapshot.effective_limit(class),
        minimum_floor,
        deferred_admission,
        reason: reason.to_string(),
    }
}
