// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::WorkItem;
use crate::clock::Clock;
use crate::config::{PolicyInputSource, WorkflowGateConfig};
use crate::error::AdmissionError;
use crate::metrics::PolicyMetrics;
use crate::policy::{WorkflowSnapshot, WorkflowThroughputPolicy};
use crate::preset::PresetName;
use crate::severity::Severity;
use crate::workload::{ExtensionClassifier, WorkloadClass};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum WorkflowStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Terminated,
    Error,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Terminated
                | WorkflowStatus::Error
        )
    }
}

/// The workflow runtime the gate schedules into.
#[async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    /// Records the item and returns the workflow instance id to schedule it under.
    async fn register(&self, item: &WorkItem) -> Result<String>;

    async fn schedule(&self, instance_id: &str, item: &WorkItem) -> Result<()>;

    /// `None` when the runtime does not know the instance (yet).
    async fn status(&self, instance_id: &str) -> Result<Option<WorkflowStatus>>;

    async fn terminate(&self, instance_id: &str) -> Result<()>;
}

/// Bookkeeping for a workflow holding a concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveWorkflow {
    pub object_id: String,
    pub file_name: String,
    pub started_at: DateTime<Utc>,
    pub pressure_level: Severity,
    pub preset: PresetName,
    pub expensive: bool,
}

struct Inner<E> {
    engine: E,
    policy: Arc<WorkflowThroughputPolicy>,
    inputs: Arc<dyn PolicyInputSource>,
    classifier: ExtensionClassifier,
    clock: Arc<dyn Clock>,
    config: WorkflowGateConfig,
    semaphore: Arc<Semaphore>,
    active: Mutex<Admitted>,
    metrics: Option<Arc<PolicyMetrics>>,
}

/// Workflows holding a slot, plus admissions still being registered.
#[derive(Default)]
struct Admitted {
    workflows: HashMap<String, ActiveWorkflow>,
    pending: usize,
}

impl Admitted {
    fn count(&self) -> usize {
        self.workflows.len() + self.pending
    }
}

impl<E> Inner<E> {
    fn update_in_flight(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics
                .in_flight
                .with_label_values(&[self.policy.name()])
                .set(count as i64);
        }
    }
}

/// Owns one concurrency slot. Dropping it forgets the workflow and returns
/// the permit, whichever way the owner exits.
struct Slot<E> {
    inner: Arc<Inner<E>>,
    instance_id: String,
    _permit: OwnedSemaphorePermit,
}

impl<E> Drop for Slot<E> {
    fn drop(&mut self) {
        let count = {
            let mut active = self.inner.active.lock();
            active.workflows.remove(&self.instance_id);
            active.workflows.len()
        };
        self.inner.update_in_flight(count);
        debug!(
            instance_id = %self.instance_id,
            active_count = count,
            "Released workflow slot"
        );
    }
}

/// Counts an admitted item against the policy limit until it is either
/// registered or abandoned.
struct Reservation<E> {
    inner: Arc<Inner<E>>,
    committed: bool,
}

impl<E> Reservation<E> {
    fn commit(
        mut self,
        instance_id: String,
        workflow: ActiveWorkflow,
        permit: OwnedSemaphorePermit,
    ) -> Slot<E> {
        let count = {
            let mut active = self.inner.active.lock();
            active.pending -= 1;
            active.workflows.insert(instance_id.clone(), workflow);
            active.workflows.len()
        };
        self.committed = true;
        self.inner.update_in_flight(count);
        Slot {
            inner: self.inner.clone(),
            instance_id,
            _permit: permit,
        }
    }
}

impl<E> Drop for Reservation<E> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.active.lock().pending -= 1;
        }
    }
}

/// Starts workflows under the workflow-count throughput policy.
pub struct WorkflowGate<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for WorkflowGate<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: WorkflowEngine> WorkflowGate<E> {
    pub fn new(
        engine: E,
        policy: Arc<WorkflowThroughputPolicy>,
        inputs: Arc<dyn PolicyInputSource>,
        classifier: ExtensionClassifier,
        clock: Arc<dyn Clock>,
        config: WorkflowGateConfig,
        metrics: Option<Arc<PolicyMetrics>>,
    ) -> Self {
        info!(
            max_parallel_workflows = config.max_parallel_workflows,
            "Starting workflow admission gate"
        );
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_workflows));
        Self {
            inner: Arc::new(Inner {
                engine,
                policy,
                inputs,
                classifier,
                clock,
                config,
                semaphore,
                active: Mutex::new(Admitted::default()),
                metrics,
            }),
        }
    }

    pub fn policy(&self) -> &Arc<WorkflowThroughputPolicy> {
        &self.inner.policy
    }

    /// Running workflows plus admissions still being registered.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().count()
    }

    pub fn active_workflows(&self) -> HashMap<String, ActiveWorkflow> {
        self.inner.active.lock().workflows.clone()
    }

    pub fn available_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Waits until the policy admits `item`, takes a slot, registers and
    /// schedules the workflow and hands the slot to a completion monitor.
    /// Returns the workflow instance id.
    pub async fn start(&self, item: WorkItem) -> Result<String, AdmissionError> {
        let class = self.inner.classifier.classify(&item.file_name);
        let (snapshot, reservation) = self.wait_for_capacity(&item, class).await;

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        let instance_id = match self.inner.engine.register(&item).await {
            Ok(instance_id) => instance_id,
            Err(source) => {
                error!(object_id = %item.object_id, "Failed to register workflow: {source:?}");
                return Err(AdmissionError::Register {
                    object_id: item.object_id,
                    source,
                });
            }
        };

        let workflow = ActiveWorkflow {
            object_id: item.object_id.clone(),
            file_name: item.file_name.clone(),
            started_at: self.inner.clock.now(),
            pressure_level: snapshot.pressure_level,
            preset: snapshot.active_preset,
            expensive: class == WorkloadClass::Expensive,
        };
        let slot = reservation.commit(instance_id.clone(), workflow, permit);

        debug!(
            instance_id = %instance_id,
            object_id = %item.object_id,
            file_name = %item.file_name,
            active_count = self.active_count(),
            "Scheduling workflow"
        );
        if let Err(source) = self.inner.engine.schedule(&instance_id, &item).await {
            error!(instance_id = %instance_id, "Failed to schedule workflow: {source:?}");
            return Err(AdmissionError::Schedule {
                instance_id,
                source,
            });
        }

        tokio::spawn(monitor_completion(slot));
        Ok(instance_id)
    }

    /// Evaluates the policy and reserves a place under the limit in one step,
    /// so concurrent callers cannot all pass on the same count.
    async fn wait_for_capacity(
        &self,
        item: &WorkItem,
        class: WorkloadClass,
    ) -> (WorkflowSnapshot, Reservation<E>) {
        loop {
            let inputs = self.inner.inputs.policy_inputs();
            let (snapshot, active_count, effective_limit) = {
                let mut active = self.inner.active.lock();
                let active_count = active.count();
                let snapshot = self
                    .inner
                    .policy
                    .evaluate(active_count as u64, &inputs, self.inner.clock.now());
                let effective_limit = snapshot.effective_limit(class);
                if active_count < effective_limit {
                    active.pending += 1;
                    let reservation = Reservation {
                        inner: self.inner.clone(),
                        committed: false,
                    };
                    return (snapshot, reservation);
                }
                (snapshot, active_count, effective_limit)
            };

            debug!(
                object_id = %item.object_id,
                active_count,
                effective_limit,
                pressure_level = %snapshot.pressure_level,
                preset = %snapshot.active_preset,
                fail_safe = snapshot.fail_safe,
                workload_class = %class,
                "Deferring workflow scheduling under throughput policy"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics
                    .admission_deferrals
                    .with_label_values(&[self.inner.policy.name(), class.to_string().as_str()])
                    .inc();
            }
            sleep(snapshot.limits.throttle_sleep).await;
        }
    }
}

async fn monitor_completion<E: WorkflowEngine>(slot: Slot<E>) {
    let inner = slot.inner.clone();
    let instance_id = slot.instance_id.as_str();
    let config = &inner.config;
    let status_timeout = config
        .monitor_poll_interval_ms
        .max(config.status_error_backoff_ms);
    let started = Instant::now();

    loop {
        let status = match timeout(status_timeout, inner.engine.status(instance_id)).await {
            Ok(status) => status,
            Err(_) => Err(anyhow!("status check timed out after {status_timeout:?}")),
        };
        let wait = match status {
            Ok(Some(status)) if status.is_terminal() => {
                info!(
                    instance_id,
                    %status,
                    elapsed = ?started.elapsed(),
                    "Workflow finished"
                );
                break;
            }
            Ok(_) => config.monitor_poll_interval_ms,
            Err(err) => {
                warn!(instance_id, "Error checking workflow status: {err:?}");
                config.status_error_backoff_ms
            }
        };

        if started.elapsed() > config.max_workflow_execution_secs {
            warn!(
                instance_id,
                max_execution_time = ?config.max_workflow_execution_secs,
                "Workflow timed out"
            );
            if let Some(metrics) = &inner.metrics {
                metrics
                    .workflow_timeouts
                    .with_label_values(&[inner.policy.name()])
                    .inc();
            }
            if let Err(err) = inner.engine.terminate(instance_id).await {
                error!(instance_id, "Failed to terminate workflow: {err:?}");
            }
            break;
        }

        sleep(wait).await;
    }
    drop(slot);
}
