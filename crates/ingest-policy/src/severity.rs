// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Pressure level derived from a raw load signal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn is_elevated(self) -> bool {
        self != Severity::Normal
    }

    /// Numeric severity attached to published operational alerts.
    pub fn alert_value(self) -> u8 {
        match self {
            Severity::Critical => 9,
            Severity::Warning => 5,
            Severity::Normal => 1,
        }
    }

    /// Gauge encoding used by the metrics module.
    pub(crate) fn as_gauge(self) -> i64 {
        match self {
            Severity::Normal => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

/// Maps a load value onto a severity. `warning <= critical` is assumed but not
/// enforced: when the two are equal the result degenerates to normal/critical.
pub fn classify(value: u64, warning_threshold: u64, critical_threshold: u64) -> Severity {
    if value >= critical_threshold {
        Severity::Critical
    } else if value >= warning_threshold {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0, 18, 35), Severity::Normal);
        assert_eq!(classify(17, 18, 35), Severity::Normal);
        assert_eq!(classify(18, 18, 35), Severity::Warning);
        assert_eq!(classify(34, 18, 35), Severity::Warning);
        assert_eq!(classify(35, 18, 35), Severity::Critical);
        assert_eq!(classify(u64::MAX, 18, 35), Severity::Critical);
    }

    #[test]
    fn classify_holds_across_ranges() {
        let (warning, critical) = (10, 20);
        for value in 0..warning {
            assert_eq!(classify(value, warning, critical), Severity::Normal);
        }
        for value in warning..critical {
            assert_eq!(classify(value, warning, critical), Severity::Warning);
        }
        for value in critical..critical * 4 {
            assert_eq!(classify(value, warning, critical), Severity::Critical);
        }
    }

    #[test]
    fn equal_thresholds_are_binary() {
        assert_eq!(classify(2, 3, 3), Severity::Normal);
        assert_eq!(classify(3, 3, 3), Severity::Critical);
    }

    #[test]
    fn zero_thresholds_are_always_critical() {
        assert_eq!(classify(0, 0, 0), Severity::Critical);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(Severity::Critical.to_string(), "critical");
        assert_eq!(Severity::Warning.alert_value(), 5);
    }
}
