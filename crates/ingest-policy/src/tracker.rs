// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Debouncing of a raw severity signal into an "act now" decision.
//!
//! A condition has to stay above `normal` for the whole sustained window
//! before it is allowed to take effect, and once it has taken effect a
//! cooldown suppresses it again for a while. The same state machine drives
//! both the throughput policies (cooldown entered on recovery) and the
//! operational alerts (cooldown entered when an alert is published).
//!
//! Every call to [`ConditionTracker::evaluate`] performs one read-modify-write
//! of the state. Owners that share a tracker between tasks must serialize
//! those calls (the policies keep the tracker behind a mutex).

use crate::preset::PresetName;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// What opens the cooldown window of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownTrigger {
    /// Entered on every true -> false transition of the effective decision.
    Recovery,
    /// Entered only through [`ConditionTracker::start_cooldown`], after an
    /// alert for the condition was actually delivered.
    Alert,
}

/// Mutable per-condition state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConditionState {
    /// Set while the condition is above `normal`, cleared on every normal tick.
    pub active_since: Option<DateTime<Utc>>,
    /// End of the current cooldown window, cleared once it has elapsed.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_active: bool,
    pub last_severity: Severity,
    pub last_preset: Option<PresetName>,
}

/// One sample fed to the tracker.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub severity: Severity,
    pub telemetry_stale: bool,
    pub sustained: Duration,
    pub cooldown: Duration,
    pub preset: Option<PresetName>,
    pub now: DateTime<Utc>,
}

/// Result of one evaluation. All second counts are whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionReport {
    /// Severity after the stale-telemetry override.
    pub severity: Severity,
    /// Whether the condition is currently above `normal`.
    pub active: bool,
    /// Sustained window satisfied, no cooldown pending (or fail-safe).
    pub policy_active: bool,
    pub sustained_seconds: u64,
    pub sustained_seconds_required: u64,
    pub cooldown_seconds: u64,
    pub cooldown_remaining_seconds: u64,
    pub fail_safe: bool,
}

#[derive(Debug, Clone)]
pub struct ConditionTracker {
    trigger: CooldownTrigger,
    state: ConditionState,
}

impl ConditionTracker {
    pub fn new(trigger: CooldownTrigger) -> Self {
        Self {
            trigger,
            state: ConditionState::default(),
        }
    }

    pub fn state(&self) -> &ConditionState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = ConditionState::default();
    }

    /// Opens a cooldown window starting at `now`.
    pub fn start_cooldown(&mut self, now: DateTime<Utc>, cooldown: Duration) {
        let until = now
            .checked_add_signed(to_chrono(cooldown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state.cooldown_until = Some(until);
    }

    pub fn evaluate(&mut self, observation: Observation) -> ConditionReport {
        let Observation {
            severity,
            telemetry_stale,
            sustained,
            cooldown,
            preset,
            now,
        } = observation;

        let severity = if telemetry_stale {
            Severity::Critical
        } else {
            severity
        };
        let active = severity.is_elevated();

        if active {
            if self.state.active_since.is_none() {
                self.state.active_since = Some(now);
            }
        } else {
            if self.trigger == CooldownTrigger::Recovery && self.state.last_active {
                self.start_cooldown(now, cooldown);
            }
            // A recovered condition always re-accumulates its sustained window.
            self.state.active_since = None;
        }

        let sustained_seconds_required = sustained.as_secs();
        let mut sustained_seconds = self
            .state
            .active_since
            .map(|since| whole_seconds(now - since))
            .unwrap_or(0);

        let cooldown_remaining_seconds = match self.state.cooldown_until {
            Some(until) => {
                let remaining = whole_seconds(until - now);
                if remaining == 0 {
                    self.state.cooldown_until = None;
                }
                remaining
            }
            None => 0,
        };

        let policy_active = telemetry_stale
            || (active
                && sustained_seconds >= sustained_seconds_required
                && cooldown_remaining_seconds == 0);
        if telemetry_stale {
            sustained_seconds = sustained_seconds_required;
        }

        self.state.last_active = policy_active;
        self.state.last_severity = severity;
        self.state.last_preset = preset;

        ConditionReport {
            severity,
            active,
            policy_active,
            sustained_seconds,
            sustained_seconds_required,
            cooldown_seconds: cooldown.as_secs(),
            cooldown_remaining_seconds,
            fail_safe: telemetry_stale,
        }
    }
}

fn whole_seconds(delta: chrono::Duration) -> u64 {
    delta.num_seconds().max(0) as u64
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
