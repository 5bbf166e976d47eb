// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use ingest_policy::config::{
    EnvPolicyInputs, ObservabilityConfig, PolicyInputSource, PolicyInputs, QueueGateConfig,
    WorkflowGateConfig,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Alerts are POSTed here as JSON. Without it they are only logged.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    #[serde(default)]
    pub workflow_gate: WorkflowGateConfig,
    #[serde(default)]
    pub queue_gate: QueueGateConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Fixed policy inputs. When absent they are read from the environment
    /// on every evaluation.
    #[serde(default)]
    pub policy: Option<PolicyInputs>,
    #[serde(default = "default_policy_env_service")]
    pub policy_env_service: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            alert_webhook_url: None,
            workflow_gate: WorkflowGateConfig::default(),
            queue_gate: QueueGateConfig::default(),
            observability: ObservabilityConfig::default(),
            policy: None,
            policy_env_service: default_policy_env_service(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.workflow_gate.validate()?;
        self.queue_gate.validate()?;
        self.observability.validate();
        Ok(())
    }

    pub fn policy_inputs(&self) -> Arc<dyn PolicyInputSource> {
        match &self.policy {
            Some(inputs) => Arc::new(inputs.clone()),
            None => Arc::new(EnvPolicyInputs::new(&self.policy_env_service)),
        }
    }
}

fn default_listen_address() -> SocketAddr {
    "0.0.0.0:9190".parse().unwrap()
}

fn default_policy_env_service() -> String {
    "FILE_ENRICHMENT".to_string()
}
