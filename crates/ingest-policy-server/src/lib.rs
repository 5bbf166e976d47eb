// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP status and administration surface for the ingest throughput policies.

pub mod admin;
pub mod config;
pub mod handlers;
pub mod publisher;
