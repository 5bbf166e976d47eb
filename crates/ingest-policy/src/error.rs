// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Failed to register work item `{object_id}`: {source}")]
    Register {
        object_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to schedule workflow `{instance_id}`: {source}")]
    Schedule {
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Admission gate is not running")]
    Closed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` must be at least 1")]
    ZeroCapacity(&'static str),

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
}
