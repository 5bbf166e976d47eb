// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ingest_policy::alerts::{AlertCondition, AlertPublisher, OperationalAlert};
use ingest_policy::Severity;
use std::time::Duration;
use tracing::{error, warn};

/// Posts alerts as JSON to a webhook.
#[derive(Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertPublisher for WebhookPublisher {
    async fn publish(&self, condition: AlertCondition, severity: Severity, message: &str) -> bool {
        let alert = OperationalAlert::new(condition, severity, message);
        let response = match self.client.post(&self.url).json(&alert).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(%condition, "Failed to publish operational alert: {e}");
                return false;
            }
        };
        if let Err(e) = response.error_for_status() {
            error!(%condition, "Alert webhook rejected operational alert: {e}");
            return false;
        }
        true
    }
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPublisher;

#[async_trait]
impl AlertPublisher for LogPublisher {
    async fn publish(&self, condition: AlertCondition, severity: Severity, message: &str) -> bool {
        let alert = OperationalAlert::new(condition, severity, message);
        warn!(
            title = %alert.title,
            severity = alert.severity,
            category = %alert.category,
            "{}",
            alert.body
        );
        true
    }
}
