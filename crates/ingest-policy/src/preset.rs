// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Named threshold bundles for the throughput policies.
//!
//! A preset table is built once when a policy is constructed and is never
//! mutated afterwards. The capacity-dependent entries are derived from the
//! hard capacity of the stage the policy guards (`max_parallel_workflows`
//! for the workflow-count policy, the worker count for the queue-depth policy).

use serde::{Deserialize, Serialize};
use std::cmp::max;
use std::time::Duration;
use strum::{Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PresetName {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl PresetName {
    /// Preset used whenever telemetry cannot be trusted.
    pub const FAIL_SAFE: PresetName = PresetName::Conservative;

    /// Resolves a requested preset name. Surrounding whitespace and case are
    /// ignored; unknown or missing names fall back to `balanced`.
    pub fn resolve(requested: Option<&str>) -> PresetName {
        requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| name.parse().ok())
            .unwrap_or_default()
    }
}

/// Severity thresholds and debounce timers shared by every policy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: u64,
    pub critical: u64,
    pub sustained: Duration,
    pub cooldown: Duration,
}

impl Thresholds {
    pub fn new(warning: u64, critical: u64, sustained_secs: u64, cooldown_secs: u64) -> Self {
        Self {
            warning,
            critical,
            sustained: Duration::from_secs(sustained_secs),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }
}

/// One entry per named preset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetTable<P> {
    pub conservative: P,
    pub balanced: P,
    pub aggressive: P,
}

impl<P> PresetTable<P> {
    pub fn get(&self, name: PresetName) -> &P {
        match name {
            PresetName::Conservative => &self.conservative,
            PresetName::Balanced => &self.balanced,
            PresetName::Aggressive => &self.aggressive,
        }
    }
}

/// Preset entry for the workflow-count policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPreset {
    pub thresholds: Thresholds,
    pub expensive_parallelism: usize,
    pub baseline_parallelism: usize,
    pub expensive_floor: usize,
    pub throttle_sleep: Duration,
}

impl WorkflowPreset {
    pub fn table(max_parallel_workflows: usize) -> PresetTable<WorkflowPreset> {
        let n = max_parallel_workflows as u64;
        let parallel = max_parallel_workflows;
        PresetTable {
            conservative: WorkflowPreset {
                thresholds: Thresholds::new(max(1, n.saturating_sub(1)), max(1, n), 45, 90),
                expensive_parallelism: 1,
                baseline_parallelism: max(1, parallel.saturating_sub(1)),
                expensive_floor: 1,
                throttle_sleep: Duration::from_millis(50),
            },
            balanced: WorkflowPreset {
                thresholds: Thresholds::new(max(1, n.saturating_sub(1)), max(1, n), 60, 120),
                expensive_parallelism: max(1, parallel / 2),
                baseline_parallelism: max(1, parallel),
                expensive_floor: 1,
                throttle_sleep: Duration::from_millis(30),
            },
            aggressive: WorkflowPreset {
                thresholds: Thresholds::new(max(1, n), max(1, n + 1), 90, 120),
                expensive_parallelism: max(1, parallel),
                baseline_parallelism: max(1, parallel),
                expensive_floor: 1,
                throttle_sleep: Duration::from_millis(10),
            },
        }
    }
}

/// Preset entry for the queue-depth policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePreset {
    pub thresholds: Thresholds,
    pub expensive_floor: usize,
    pub queue_capacity: usize,
    pub expensive_admission_threshold: usize,
    pub expensive_admission_delay: Duration,
}

impl QueuePreset {
    pub fn table(worker_count: usize) -> PresetTable<QueuePreset> {
        PresetTable {
            conservative: QueuePreset {
                thresholds: Thresholds::new(10, 20, 45, 90),
                expensive_floor: 1,
                queue_capacity: max(worker_count, 12),
                expensive_admission_threshold: 4,
                expensive_admission_delay: Duration::from_millis(50),
            },
            balanced: QueuePreset {
                thresholds: Thresholds::new(18, 35, 60, 120),
                expensive_floor: 1,
                queue_capacity: max(worker_count, worker_count * 3),
                expensive_admission_threshold: 8,
                expensive_admission_delay: Duration::from_millis(30),
            },
            aggressive: QueuePreset {
                thresholds: Thresholds::new(30, 60, 90, 120),
                expensive_floor: 1,
                queue_capacity: max(worker_count, worker_count * 5),
                expensive_admission_threshold: 12,
                expensive_admission_delay: Duration::from_millis(10),
            },
        }
    }
}
