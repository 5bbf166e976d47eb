// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Adaptive admission control for the ingestion pipeline.
//!
//! The building blocks, leaves first: [`preset`] tables, the [`severity`]
//! classifier, the sustained/cooldown [`tracker`], the preset-driven
//! [`policy`] evaluator, the [`admission`] gates that apply it, and the
//! [`alerts`] evaluator that runs the same tracker over aggregated signals.

pub mod admission;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod preset;
pub mod severity;
pub mod status;
pub mod tracker;
pub mod workload;

pub use admission::{QueueGate, WorkItem, Worker, WorkflowEngine, WorkflowGate, WorkflowStatus};
pub use alerts::{AlertCondition, AlertEvaluation, AlertEvaluator, AlertPublisher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EnvPolicyInputs, PolicyInputSource, PolicyInputs};
pub use error::{AdmissionError, ConfigError};
pub use metrics::PolicyMetrics;
pub use policy::{
    PolicySnapshot, QueueSnapshot, QueueThroughputPolicy, WorkflowSnapshot,
    WorkflowThroughputPolicy,
};
pub use preset::PresetName;
pub use severity::Severity;
pub use status::ThroughputStatus;
pub use workload::{ExtensionClassifier, WorkloadClass};
