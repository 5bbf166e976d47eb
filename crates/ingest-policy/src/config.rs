// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the requested preset.
pub const PRESET_ENV_VAR: &str = "THROUGHPUT_POLICY_PRESET";

/// Inputs resolved once per policy evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyInputs {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub telemetry_stale: bool,
}

impl PolicyInputs {
    pub fn new(preset: Option<&str>, telemetry_stale: bool) -> Self {
        Self {
            preset: preset.map(str::to_owned),
            telemetry_stale,
        }
    }
}

/// Where an admission gate gets its preset and stale-telemetry flag from.
/// Gates ask again on every evaluation, so sources must not cache.
pub trait PolicyInputSource: Send + Sync {
    fn policy_inputs(&self) -> PolicyInputs;
}

impl PolicyInputSource for PolicyInputs {
    fn policy_inputs(&self) -> PolicyInputs {
        self.clone()
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `THROUGHPUT_POLICY_PRESET` and `<SERVICE>_POLICY_TELEMETRY_STALE`.
#[derive(Clone)]
pub struct EnvPolicyInputs {
    stale_var: String,
    lookup: EnvLookup,
}

impl EnvPolicyInputs {
    pub fn new(service: &str) -> Self {
        Self::with_lookup(service, |name| std::env::var(name).ok())
    }

    pub fn document_conversion() -> Self {
        Self::new("DOCUMENTCONVERSION")
    }

    pub fn file_enrichment() -> Self {
        Self::new("FILE_ENRICHMENT")
    }

    pub fn with_lookup<F>(service: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            stale_var: format!("{}_POLICY_TELEMETRY_STALE", service.to_ascii_uppercase()),
            lookup: Arc::new(lookup),
        }
    }

    pub fn stale_var(&self) -> &str {
        &self.stale_var
    }
}

impl std::fmt::Debug for EnvPolicyInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvPolicyInputs")
            .field("stale_var", &self.stale_var)
            .finish()
    }
}

impl PolicyInputSource for EnvPolicyInputs {
    fn policy_inputs(&self) -> PolicyInputs {
        PolicyInputs {
            preset: (self.lookup)(PRESET_ENV_VAR),
            telemetry_stale: (self.lookup)(&self.stale_var)
                .map(|value| is_truthy(&value))
                .unwrap_or(false),
        }
    }
}

/// `1`, `true`, `yes` and `on`, ignoring case and surrounding whitespace.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowGateConfig {
    #[serde(default = "default_max_parallel_workflows")]
    pub max_parallel_workflows: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_workflow_execution")]
    pub max_workflow_execution_secs: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_monitor_poll_interval")]
    pub monitor_poll_interval_ms: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_status_error_backoff")]
    pub status_error_backoff_ms: Duration,
}

impl Default for WorkflowGateConfig {
    fn default() -> Self {
        Self {
            max_parallel_workflows: default_max_parallel_workflows(),
            max_workflow_execution_secs: default_max_workflow_execution(),
            monitor_poll_interval_ms: default_monitor_poll_interval(),
            status_error_backoff_ms: default_status_error_backoff(),
        }
    }
}

impl WorkflowGateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_workflows == 0 {
            return Err(ConfigError::ZeroCapacity("max-parallel-workflows"));
        }
        if self.max_workflow_execution_secs.is_zero() {
            return Err(ConfigError::ZeroDuration("max-workflow-execution-secs"));
        }
        if self.monitor_poll_interval_ms.is_zero() {
            return Err(ConfigError::ZeroDuration("monitor-poll-interval-ms"));
        }
        Ok(())
    }
}

fn default_max_parallel_workflows() -> usize {
    3
}

fn default_max_workflow_execution() -> Duration {
    Duration::from_secs(300)
}

fn default_monitor_poll_interval() -> Duration {
    Duration::from_millis(300)
}

fn default_status_error_backoff() -> Duration {
    Duration::from_secs(2)
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueGateConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

impl Default for QueueGateConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
        }
    }
}

impl QueueGateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroCapacity("worker-count"));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    5
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObservabilityConfig {
    #[serde(default = "default_queue_backlog_warning")]
    pub queue_backlog_warning: u64,
    #[serde(default = "default_queue_backlog_critical")]
    pub queue_backlog_critical: u64,
    #[serde(default = "default_workflow_failure_warning")]
    pub workflow_failure_warning: u64,
    #[serde(default = "default_workflow_failure_critical")]
    pub workflow_failure_critical: u64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_alert_sustained")]
    pub sustained_secs: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_alert_cooldown")]
    pub cooldown_secs: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            queue_backlog_warning: default_queue_backlog_warning(),
            queue_backlog_critical: default_queue_backlog_critical(),
            workflow_failure_warning: default_workflow_failure_warning(),
            workflow_failure_critical: default_workflow_failure_critical(),
            sustained_secs: default_alert_sustained(),
            cooldown_secs: default_alert_cooldown(),
        }
    }
}

impl ObservabilityConfig {
    /// Inverted thresholds are accepted; classification then degenerates to
    /// normal/critical.
    pub fn validate(&self) {
        if self.queue_backlog_warning > self.queue_backlog_critical {
            warn!(
                warning = self.queue_backlog_warning,
                critical = self.queue_backlog_critical,
                "queue backlog warning threshold is above critical"
            );
        }
        if self.workflow_failure_warning > self.workflow_failure_critical {
            warn!(
                warning = self.workflow_failure_warning,
                critical = self.workflow_failure_critical,
                "workflow failure warning threshold is above critical"
            );
        }
    }
}

fn default_queue_backlog_warning() -> u64 {
    50
}

fn default_queue_backlog_critical() -> u64 {
    200
}

fn default_workflow_failure_warning() -> u64 {
    5
}

fn default_workflow_failure_critical() -> u64 {
    20
}

fn default_alert_sustained() -> Duration {
    Duration::from_secs(300)
}

fn default_alert_cooldown() -> Duration {
    Duration::from_secs(900)
}

pub fn load<P: AsRef<std::path::Path>, T: DeserializeOwned>(path: P) -> Result<T> {
    let path = path.as_ref();
    debug!("Reading config from {:?}", path);
    Ok(serde_yaml::from_reader(
        std::fs::File::open(path).context(format!("cannot open {:?}", path))?,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_source(vars: &[(&str, &str)]) -> EnvPolicyInputs {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvPolicyInputs::with_lookup("file_enrichment", move |name| vars.get(name).cloned())
    }

    #[test]
    fn truthy_values() {
        for value in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(is_truthy(value), "{value}");
        }
        for value in ["", "0", "false", "no", "off", "enabled"] {
            assert!(!is_truthy(value), "{value}");
        }
    }

    #[test]
    fn env_source_reads_service_specific_flag() {
        let source = env_source(&[
            ("THROUGHPUT_POLICY_PRESET", "aggressive"),
            ("FILE_ENRICHMENT_POLICY_TELEMETRY_STALE", "yes"),
            ("DOCUMENTCONVERSION_POLICY_TELEMETRY_STALE", "no"),
        ]);
        assert_eq!(source.stale_var(), "FILE_ENRICHMENT_POLICY_TELEMETRY_STALE");
        assert_eq!(
            source.policy_inputs(),
            PolicyInputs::new(Some("aggressive"), true)
        );
    }

    #[test]
    fn env_source_defaults_when_unset() {
        assert_eq!(env_source(&[]).policy_inputs(), PolicyInputs::default());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let workflow: WorkflowGateConfig =
            serde_yaml::from_str("max-parallel-workflows: 8").unwrap();
        assert_eq!(workflow.max_parallel_workflows, 8);
        assert_eq!(workflow.max_workflow_execution_secs, Duration::from_secs(300));
        assert_eq!(workflow.monitor_poll_interval_ms, Duration::from_millis(300));

        let observability: ObservabilityConfig = serde_yaml::from_str("cooldown-secs: 60").unwrap();
        assert_eq!(observability.cooldown_secs, Duration::from_secs(60));
        assert_eq!(observability.queue_backlog_critical, 200);
    }

    #[test]
    fn validation_rejects_zero_capacity() {
        let config = QueueGateConfig { worker_count: 0 };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity("worker-count"))
        );
        assert!(WorkflowGateConfig::default().validate().is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "preset: conservative\ntelemetry-stale: true").unwrap();
        let inputs: PolicyInputs = load(file.path()).unwrap();
        assert_eq!(inputs, PolicyInputs::new(Some("conservative"), true));

        assert!(load::<_, PolicyInputs>("/nonexistent/ingest-policy.yaml").is_err());
    }
}
