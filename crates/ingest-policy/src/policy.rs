// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Preset-driven throughput policy.
//!
//! [`ThroughputPolicy`] classifies a load value against the thresholds of the
//! resolved preset, runs the result through a [`ConditionTracker`] and turns
//! the debounced decision into admission limits. The two stages share the
//! algorithm and differ only in their preset table and limit shape:
//! [`WorkflowThroughputPolicy`] is fed the number of in-flight workflows,
//! [`QueueThroughputPolicy`] the depth of the ingest queue.

use crate::config::PolicyInputs;
use crate::metrics::PolicyMetrics;
use crate::preset::{PresetName, PresetTable, QueuePreset, Thresholds, WorkflowPreset};
use crate::severity::{classify, Severity};
use crate::tracker::{ConditionState, ConditionTracker, CooldownTrigger, Observation};
use crate::workload::WorkloadClass;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::cmp::{max, min};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub const FAIL_SAFE_REASON: &str =
    "Queue telemetry unavailable; fail-safe conservative throttling active.";

/// Limits a policy hands to its admission gate.
pub trait AdmissionLimits: Clone + Debug + PartialEq + Serialize + Send + Sync {
    /// Soft limit for `class` given whether the policy is throttling.
    fn effective_limit(&self, policy_active: bool, class: WorkloadClass) -> usize;
}

/// Capacity-specific half of a preset entry.
pub trait CapacityProfile: Send + Sync + 'static {
    type Limits: AdmissionLimits;

    fn thresholds(&self) -> &Thresholds;

    /// Derives the limits for one evaluation. `capacity` is the hard capacity
    /// of the stage, `defer` is set when the policy is active at a non-normal
    /// level.
    fn limits(&self, capacity: usize, defer: bool) -> Self::Limits;
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowLimits {
    pub max_parallel_workflows: usize,
    pub baseline_parallelism: usize,
    pub expensive_parallelism: usize,
    pub expensive_floor: usize,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(rename = "throttle_sleep_seconds")]
    pub throttle_sleep: Duration,
}

impl AdmissionLimits for WorkflowLimits {
    fn effective_limit(&self, policy_active: bool, class: WorkloadClass) -> usize {
        if !policy_active {
            return max(1, self.max_parallel_workflows);
        }
        let baseline = max(1, self.baseline_parallelism);
        match class {
            WorkloadClass::Expensive => min(
                max(self.expensive_floor, self.expensive_parallelism),
                baseline,
            ),
            WorkloadClass::Baseline => baseline,
        }
    }
}

impl CapacityProfile for WorkflowPreset {
    type Limits = WorkflowLimits;

    fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn limits(&self, capacity: usize, _defer: bool) -> WorkflowLimits {
        let capacity = max(1, capacity);
        let clamp = |value: usize| value.clamp(1, capacity);
        WorkflowLimits {
            max_parallel_workflows: capacity,
            baseline_parallelism: clamp(self.baseline_parallelism),
            expensive_parallelism: clamp(self.expensive_parallelism),
            expensive_floor: clamp(self.expensive_floor),
            throttle_sleep: self.throttle_sleep,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueLimits {
    pub defer_expensive_admission: bool,
    pub expensive_floor: usize,
    pub expensive_admission_threshold: usize,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[serde(rename = "expensive_admission_delay_seconds")]
    pub expensive_admission_delay: Duration,
    pub queue_capacity: usize,
}

impl QueueLimits {
    /// Delay to apply before enqueuing an item of `class` at `queue_depth`.
    pub fn admission_delay(&self, queue_depth: usize, class: WorkloadClass) -> Option<Duration> {
        let deferred = class == WorkloadClass::Expensive
            && self.defer_expensive_admission
            && queue_depth >= self.expensive_admission_threshold
            && !self.expensive_admission_delay.is_zero();
        deferred.then_some(self.expensive_admission_delay)
    }
}

impl AdmissionLimits for QueueLimits {
    fn effective_limit(&self, policy_active: bool, class: WorkloadClass) -> usize {
        match class {
            WorkloadClass::Expensive if policy_active => {
                min(self.expensive_admission_threshold, self.queue_capacity)
            }
            _ => self.queue_capacity,
        }
    }
}

impl CapacityProfile for QueuePreset {
    type Limits = QueueLimits;

    fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn limits(&self, capacity: usize, defer: bool) -> QueueLimits {
        let expensive_floor = max(1, self.expensive_floor);
        QueueLimits {
            defer_expensive_admission: defer,
            expensive_floor,
            expensive_admission_threshold: max(expensive_floor, self.expensive_admission_threshold),
            expensive_admission_delay: if defer {
                self.expensive_admission_delay
            } else {
                Duration::ZERO
            },
            queue_capacity: max(capacity, self.queue_capacity),
        }
    }
}

/// Result of one evaluation. Returned, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySnapshot<L> {
    pub requested_preset: PresetName,
    pub active_preset: PresetName,
    #[serde(rename = "queue_pressure_level")]
    pub pressure_level: Severity,
    pub policy_active: bool,
    pub load: u64,
    pub warning_threshold: u64,
    pub critical_threshold: u64,
    pub sustained_seconds: u64,
    pub sustained_seconds_required: u64,
    pub cooldown_seconds: u64,
    pub cooldown_remaining_seconds: u64,
    #[serde(flatten)]
    pub limits: L,
    pub fail_safe: bool,
    pub fail_safe_reason: Option<&'static str>,
}

impl<L: AdmissionLimits> PolicySnapshot<L> {
    pub fn effective_limit(&self, class: WorkloadClass) -> usize {
        self.limits.effective_limit(self.policy_active, class)
    }
}

pub type WorkflowThroughputPolicy = ThroughputPolicy<WorkflowPreset>;
pub type QueueThroughputPolicy = ThroughputPolicy<QueuePreset>;
pub type WorkflowSnapshot = PolicySnapshot<WorkflowLimits>;
pub type QueueSnapshot = PolicySnapshot<QueueLimits>;

pub struct ThroughputPolicy<P: CapacityProfile> {
    name: &'static str,
    capacity: usize,
    presets: PresetTable<P>,
    tracker: Mutex<ConditionTracker>,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl WorkflowThroughputPolicy {
    pub fn for_workflows(max_parallel_workflows: usize) -> Self {
        Self::new(
            "workflow",
            max_parallel_workflows,
            WorkflowPreset::table(max_parallel_workflows),
        )
    }
}

impl QueueThroughputPolicy {
    pub fn for_queue(worker_count: usize) -> Self {
        Self::new("queue", worker_count, QueuePreset::table(worker_count))
    }
}

impl<P: CapacityProfile> ThroughputPolicy<P> {
    pub fn new(name: &'static str, capacity: usize, presets: PresetTable<P>) -> Self {
        Self {
            name,
            capacity,
            presets,
            tracker: Mutex::new(ConditionTracker::new(CooldownTrigger::Recovery)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PolicyMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn preset(&self, name: PresetName) -> &P {
        self.presets.get(name)
    }

    pub fn state(&self) -> ConditionState {
        self.tracker.lock().state().clone()
    }

    pub fn reset(&self) {
        self.tracker.lock().reset();
    }

    pub fn evaluate(
        &self,
        load: u64,
        inputs: &PolicyInputs,
        now: DateTime<Utc>,
    ) -> PolicySnapshot<P::Limits> {
        let requested_preset = PresetName::resolve(inputs.preset.as_deref());
        let active_preset = if inputs.telemetry_stale {
            PresetName::FAIL_SAFE
        } else {
            requested_preset
        };
        let preset = self.presets.get(active_preset);
        let thresholds = *preset.thresholds();

        let report = self.tracker.lock().evaluate(Observation {
            severity: classify(load, thresholds.warning, thresholds.critical),
            telemetry_stale: inputs.telemetry_stale,
            sustained: thresholds.sustained,
            cooldown: thresholds.cooldown,
            preset: Some(active_preset),
            now,
        });

        let defer = report.policy_active && report.severity.is_elevated();
        let snapshot = PolicySnapshot {
            requested_preset,
            active_preset,
            pressure_level: report.severity,
            policy_active: report.policy_active,
            load,
            warning_threshold: thresholds.warning,
            critical_threshold: thresholds.critical,
            sustained_seconds: report.sustained_seconds,
            sustained_seconds_required: report.sustained_seconds_required,
            cooldown_seconds: report.cooldown_seconds,
            cooldown_remaining_seconds: report.cooldown_remaining_seconds,
            limits: preset.limits(self.capacity, defer),
            fail_safe: report.fail_safe,
            fail_safe_reason: report.fail_safe.then_some(FAIL_SAFE_REASON),
        };
        self.report_metrics(&snapshot);
        snapshot
    }

    fn report_metrics(&self, snapshot: &PolicySnapshot<P::Limits>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let labels = [self.name];
        metrics
            .policy_active
            .with_label_values(&labels)
            .set(snapshot.policy_active as i64);
        metrics
            .pressure_level
            .with_label_values(&labels)
            .set(snapshot.pressure_level.as_gauge());
        metrics
            .observed_load
            .with_label_values(&labels)
            .set(i64::try_from(snapshot.load).unwrap_or(i64::MAX));
        metrics
            .fail_safe
            .with_label_values(&labels)
            .set(snapshot.fail_safe as i64);
        for class in WorkloadClass::ALL {
            let class_label = class.to_string();
            metrics
                .effective_limit
                .with_label_values(&[self.name, class_label.as_str()])
                .set(snapshot.effective_limit(class) as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(start: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        start + chrono::Duration::seconds(secs)
    }

    fn balanced() -> PolicyInputs {
        PolicyInputs::new(Some("balanced"), false)
    }

    #[test]
    fn workflow_policy_sustained_and_cooldown_transitions() {
        let policy = WorkflowThroughputPolicy::for_workflows(3);
        let start = Utc.with_ymd_and_hms(2026, 2, 25, 16, 30, 0).unwrap();

        let first = policy.evaluate(4, &balanced(), start);
        let second = policy.evaluate(4, &balanced(), at(start, 61));
        let recovered = policy.evaluate(0, &balanced(), at(start, 62));
        let reattempt = policy.evaluate(4, &balanced(), at(start, 70));

        assert!(!first.policy_active);
        assert_eq!(first.pressure_level, Severity::Critical);
        assert!(second.policy_active);
        assert!(!recovered.policy_active);
        assert!(recovered.cooldown_remaining_seconds > 0);
        assert!(!reattempt.policy_active);
        assert!(reattempt.cooldown_remaining_seconds > 0);
    }

    #[test]
    fn queue_policy_requires_sustained_pressure() {
        let policy = QueueThroughputPolicy::for_queue(5);
        let start = Utc.with_ymd_and_hms(2026, 2, 25, 15, 0, 0).unwrap();

        let first = policy.evaluate(80, &balanced(), start);
        let second = policy.evaluate(80, &balanced(), at(start, 61));

        assert!(!first.policy_active);
        assert!(!first.limits.defer_expensive_admission);
        assert_eq!(first.limits.expensive_admission_delay, Duration::ZERO);
        assert!(second.policy_active);
        assert!(second.pressure_level.is_elevated());
        assert!(second.sustained_seconds >= second.sustained_seconds_required);
        assert!(second.limits.defer_expensive_admission);
        assert_eq!(
            second.limits.expensive_admission_delay,
            Duration::from_millis(30)
        );
    }

    #[test]
    fn queue_policy_enters_cooldown_after_recovery() {
        let policy = QueueThroughputPolicy::for_queue(5);
        let start = Utc.with_ymd_and_hms(2026, 2, 25, 15, 30, 0).unwrap();
        policy.evaluate(120, &balanced(), start);
        let active = policy.evaluate(120, &balanced(), at(start, 61));
        let recovered = policy.evaluate(0, &balanced(), at(start, 62));
        let reattempt = policy.evaluate(120, &balanced(), at(start, 70));

        assert!(active.policy_active);
        assert!(!recovered.policy_active);
        assert_eq!(recovered.cooldown_remaining_seconds, 120);
        assert!(!reattempt.policy_active);
        assert!(reattempt.cooldown_remaining_seconds > 0);
        assert!(!reattempt.limits.defer_expensive_admission);
    }

    #[test]
    fn stale_telemetry_forces_conservative_fail_safe() {
        let policy = WorkflowThroughputPolicy::for_workflows(3);
        let snapshot = policy.evaluate(
            0,
            &PolicyInputs::new(Some("aggressive"), true),
            Utc.with_ymd_and_hms(2026, 2, 25, 17, 30, 0).unwrap(),
        );
        assert_eq!(snapshot.requested_preset, PresetName::Aggressive);
        assert_eq!(snapshot.active_preset, PresetName::Conservative);
        assert_eq!(snapshot.pressure_level, Severity::Critical);
        assert!(snapshot.fail_safe);
        assert!(snapshot.policy_active);
        assert_eq!(snapshot.sustained_seconds, 45);
        assert!(snapshot.fail_safe_reason.unwrap().contains("fail-safe"));
        assert_eq!(policy.state().last_preset, Some(PresetName::Conservative));

        let queue = QueueThroughputPolicy::for_queue(5);
        let snapshot = queue.evaluate(
            1,
            &PolicyInputs::new(Some("aggressive"), true),
            Utc.with_ymd_and_hms(2026, 2, 25, 16, 0, 0).unwrap(),
        );
        assert!(snapshot.limits.defer_expensive_admission);
        assert_eq!(snapshot.active_preset, PresetName::Conservative);
    }

    #[test]
    fn expensive_workload_keeps_minimum_floor() {
        let policy = WorkflowThroughputPolicy::for_workflows(3);
        let start = Utc.with_ymd_and_hms(2026, 2, 25, 17, 0, 0).unwrap();
        policy.evaluate(4, &balanced(), start);
        let active = policy.evaluate(4, &balanced(), at(start, 61));

        let expensive = active.effective_limit(WorkloadClass::Expensive);
        let baseline = active.effective_limit(WorkloadClass::Baseline);
        assert!(active.policy_active);
        assert!(expensive >= active.limits.expensive_floor);
        assert!(expensive >= 1);
        assert!(baseline >= expensive);
        assert_eq!((expensive, baseline), (1, 3));
    }

    #[test]
    fn inactive_policy_grants_full_capacity() {
        let policy = WorkflowThroughputPolicy::for_workflows(4);
        let snapshot = policy.evaluate(0, &balanced(), Utc::now());
        assert!(!snapshot.policy_active);
        assert_eq!(snapshot.effective_limit(WorkloadClass::Expensive), 4);
        assert_eq!(snapshot.effective_limit(WorkloadClass::Baseline), 4);
    }

    #[test]
    fn expensive_limit_never_exceeds_baseline() {
        for workers in 1..8 {
            let policy = QueueThroughputPolicy::for_queue(workers);
            for preset in ["conservative", "balanced", "aggressive"] {
                policy.reset();
                let snapshot =
                    policy.evaluate(0, &PolicyInputs::new(Some(preset), true), Utc::now());
                let expensive = snapshot.effective_limit(WorkloadClass::Expensive);
                assert!(expensive >= snapshot.limits.expensive_floor);
                assert!(expensive <= snapshot.effective_limit(WorkloadClass::Baseline));
            }
        }
        for parallel in 1..8 {
            let policy = WorkflowThroughputPolicy::for_workflows(parallel);
            let snapshot = policy.evaluate(0, &PolicyInputs::new(None, true), Utc::now());
            let expensive = snapshot.effective_limit(WorkloadClass::Expensive);
            assert!(expensive >= snapshot.limits.expensive_floor);
            assert!(expensive <= snapshot.effective_limit(WorkloadClass::Baseline));
        }
    }

    #[test]
    fn admission_delay_requires_deferral_and_threshold() {
        let limits = QueueLimits {
            defer_expensive_admission: true,
            expensive_floor: 1,
            expensive_admission_threshold: 8,
            expensive_admission_delay: Duration::from_millis(30),
            queue_capacity: 15,
        };
        assert_eq!(limits.admission_delay(7, WorkloadClass::Expensive), None);
        assert_eq!(
            limits.admission_delay(8, WorkloadClass::Expensive),
            Some(Duration::from_millis(30))
        );
        assert_eq!(limits.admission_delay(20, WorkloadClass::Baseline), None);
        let relaxed = QueueLimits {
            defer_expensive_admission: false,
            ..limits
        };
        assert_eq!(relaxed.admission_delay(20, WorkloadClass::Expensive), None);
    }

    #[test]
    fn unknown_preset_resolves_to_balanced() {
        let policy = QueueThroughputPolicy::for_queue(5);
        let snapshot = policy.evaluate(0, &PolicyInputs::new(Some("Turbo"), false), Utc::now());
        assert_eq!(snapshot.requested_preset, PresetName::Balanced);
        assert_eq!(snapshot.warning_threshold, 18);
        assert_eq!(snapshot.limits.queue_capacity, 15);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let policy = QueueThroughputPolicy::for_queue(5);
        let snapshot = policy.evaluate(3, &PolicyInputs::default(), Utc::now());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["queue_pressure_level"], "normal");
        assert_eq!(json["requested_preset"], "balanced");
        assert_eq!(json["queue_capacity"], 15);
        assert_eq!(json["expensive_admission_delay_seconds"], 0.0);
        assert!(json["fail_safe_reason"].is_null());
    }

    #[test]
    fn evaluation_updates_metrics() {
        let metrics = Arc::new(PolicyMetrics::new_for_testing());
        let policy = WorkflowThroughputPolicy::for_workflows(3).with_metrics(metrics.clone());
        policy.evaluate(2, &PolicyInputs::new(None, true), Utc::now());
        assert_eq!(metrics.policy_active.with_label_values(&["workflow"]).get(), 1);
        assert_eq!(metrics.observed_load.with_label_values(&["workflow"]).get(), 2);
        assert_eq!(metrics.pressure_level.with_label_values(&["workflow"]).get(), 2);
        assert_eq!(
            metrics
                .effective_limit
                .with_label_values(&["workflow", "expensive"])
                .get(),
            1
        );
    }

    #[test]
    fn reset_clears_tracker() {
        let policy = WorkflowThroughputPolicy::for_workflows(3);
        policy.evaluate(4, &balanced(), Utc::now());
        assert!(policy.state().active_since.is_some());
        policy.reset();
        assert_eq!(policy.state(), ConditionState::default());
    }
}
