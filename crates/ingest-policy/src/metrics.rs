// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry,
};

#[derive(Clone)]
pub struct PolicyMetrics {
    pub policy_active: IntGaugeVec,
    pub pressure_level: IntGaugeVec,
    pub observed_load: IntGaugeVec,
    pub effective_limit: IntGaugeVec,
    pub fail_safe: IntGaugeVec,
    pub admission_deferrals: IntCounterVec,
    pub admission_delays: IntCounterVec,
    pub in_flight: IntGaugeVec,
    pub workflow_timeouts: IntCounterVec,
    pub alert_condition_severity: IntGaugeVec,
    pub alerts_published: IntCounterVec,
    pub alert_publish_failures: IntCounterVec,
}

impl PolicyMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            policy_active: register_int_gauge_vec_with_registry!(
                "throughput_policy_active",
                "Whether the throughput policy is currently throttling (1) or not (0).",
                &["policy"],
                registry,
            )
            .unwrap(),
            pressure_level: register_int_gauge_vec_with_registry!(
                "throughput_policy_pressure_level",
                "Pressure level seen by the last evaluation: 0 normal, 1 warning, 2 critical.",
                &["policy"],
                registry,
            )
            .unwrap(),
            observed_load: register_int_gauge_vec_with_registry!(
                "throughput_policy_observed_load",
                "Load value (active work count or queue depth) fed to the last evaluation.",
                &["policy"],
                registry,
            )
            .unwrap(),
            effective_limit: register_int_gauge_vec_with_registry!(
                "throughput_policy_effective_limit",
                "Admission limit computed by the last evaluation, per workload class.",
                &["policy", "class"],
                registry,
            )
            .unwrap(),
            fail_safe: register_int_gauge_vec_with_registry!(
                "throughput_policy_fail_safe",
                "Whether the last evaluation ran in stale-telemetry fail-safe mode.",
                &["policy"],
                registry,
            )
            .unwrap(),
            admission_deferrals: register_int_counter_vec_with_registry!(
                "admission_deferrals",
                "Number of times admission was deferred because the effective limit was reached.",
                &["gate", "class"],
                registry,
            )
            .unwrap(),
            admission_delays: register_int_counter_vec_with_registry!(
                "admission_delays",
                "Number of expensive items delayed before being enqueued.",
                &["gate"],
                registry,
            )
            .unwrap(),
            in_flight: register_int_gauge_vec_with_registry!(
                "admission_in_flight",
                "Number of admitted items currently holding a concurrency slot.",
                &["gate"],
                registry,
            )
            .unwrap(),
            workflow_timeouts: register_int_counter_vec_with_registry!(
                "admission_workflow_timeouts",
                "Number of admitted workflows terminated after exceeding the execution limit.",
                &["gate"],
                registry,
            )
            .unwrap(),
            alert_condition_severity: register_int_gauge_vec_with_registry!(
                "observability_condition_severity",
                "Severity of each monitored condition: 0 normal, 1 warning, 2 critical.",
                &["condition"],
                registry,
            )
            .unwrap(),
            alerts_published: register_int_counter_vec_with_registry!(
                "observability_alerts_published",
                "Number of operational alerts successfully published.",
                &["condition"],
                registry,
            )
            .unwrap(),
            alert_publish_failures: register_int_counter_vec_with_registry!(
                "observability_alert_publish_failures",
                "Number of operational alerts the publisher failed to deliver.",
                &["condition"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
