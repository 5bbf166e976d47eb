// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumString};

/// Admission class of a unit of work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkloadClass {
    Expensive,
    Baseline,
}

impl WorkloadClass {
    pub const ALL: [WorkloadClass; 2] = [WorkloadClass::Expensive, WorkloadClass::Baseline];
}

/// Extensions that are expensive to convert into documents.
pub const DOCUMENT_CONVERSION_EXPENSIVE: &[&str] = &[
    "zip", "7z", "rar", "iso", "vhd", "vhdx", "pdf", "docx", "xls", "xlsx",
];

/// Extensions that are expensive to enrich.
pub const FILE_ENRICHMENT_EXPENSIVE: &[&str] =
    &["zip", "7z", "rar", "iso", "vhd", "vhdx", "dll", "exe"];

/// Classifies files by their final extension against an allow-list of
/// expensive extensions.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionClassifier {
    expensive: &'static [&'static str],
}

impl ExtensionClassifier {
    pub const fn new(expensive: &'static [&'static str]) -> Self {
        Self { expensive }
    }

    pub const fn document_conversion() -> Self {
        Self::new(DOCUMENT_CONVERSION_EXPENSIVE)
    }

    pub const fn file_enrichment() -> Self {
        Self::new(FILE_ENRICHMENT_EXPENSIVE)
    }

    pub fn classify(&self, file_name: &str) -> WorkloadClass {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension {
            Some(ext) if self.expensive.contains(&ext.as_str()) => WorkloadClass::Expensive,
            _ => WorkloadClass::Baseline,
        }
    }
}
