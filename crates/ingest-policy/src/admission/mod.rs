// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Admission gates in front of the two ingestion stages.
//!
//! The gates only ever delay work. Hard capacity is enforced by a semaphore
//! (workflow stage) or a bounded channel (queue stage); the throughput policy
//! decides how much of that capacity is handed out.

mod queue;
mod workflow;

pub use queue::{QueueGate, Worker};
pub use workflow::{ActiveWorkflow, WorkflowEngine, WorkflowGate, WorkflowStatus};

use serde::{Deserialize, Serialize};

/// A unit of work submitted to a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub object_id: String,
    /// File name or path; its extension selects the workload class.
    pub file_name: String,
}

impl WorkItem {
    pub fn new(object_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            file_name: file_name.into(),
        }
    }
}
