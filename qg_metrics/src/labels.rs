//! ABOUTME: Label names, operation status, and label merging
//! ABOUTME: Builds the label sets attached to query counters and pool gauges

use std::collections::BTreeMap;
use std::fmt;

pub const LABEL_STATUS: &str = "status";
pub const LABEL_DATABASE: &str = "database";
pub const LABEL_DRIVER: &str = "driver";

/// Label schema for query counters and duration histograms
pub const QUERY_LABELS: &[&str] = &[LABEL_DATABASE, LABEL_DRIVER, LABEL_STATUS];
/// Label schema for connection gauges
pub const GAUGE_LABELS: &[&str] = &[LABEL_DATABASE, LABEL_DRIVER];

/// Label name to value. Ordered so encoded label sets are stable.
pub type Labels = BTreeMap<String, String>;

/// Outcome of an instrumented operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Fail,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Fail => "fail",
        }
    }

    /// Classify from the result of the live connection accessor.
    ///
    /// Only connection-level failure counts as `Fail`; an operation whose
    /// connection was obtained is a `Success` even if the statement itself
    /// returned an error.
    pub fn from_connection<T, E>(connection: &Result<T, E>) -> Self {
        if connection.is_ok() {
            Status::Success
        } else {
            Status::Fail
        }
    }

    pub fn labels(self) -> Labels {
        Labels::from([(LABEL_STATUS.to_string(), self.as_str().to_string())])
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels fixed for the lifetime of one instrumented handle
pub fn default_labels(db_name: &str, driver_name: &str) -> Labels {
    Labels::from([
        (LABEL_DATABASE.to_string(), db_name.to_string()),
        (LABEL_DRIVER.to_string(), driver_name.to_string()),
    ])
}

/// Merges `defaults` into `overrides`. Keys already present in `overrides`
/// keep their value.
pub fn merge_labels(mut overrides: Labels, defaults: &Labels) -> Labels {
    for (key, value) in defaults {
        overrides
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_override_wins_on_collision() {
        let merged = merge_labels(
            labels(&[("status", "fail"), ("driver", "mysql")]),
            &labels(&[("status", "success"), ("driver", "pg"), ("database", "main")]),
        );

        assert_eq!(
            merged,
            labels(&[("status", "fail"), ("driver", "mysql"), ("database", "main")])
        );
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let merged = merge_labels(Status::Success.labels(), &default_labels("main", "pg"));

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[LABEL_STATUS], "success");
        assert_eq!(merged[LABEL_DATABASE], "main");
        assert_eq!(merged[LABEL_DRIVER], "pg");
    }

    #[test]
    fn test_merge_with_empty_sides() {
        let defaults = default_labels("main", "pg");
        assert_eq!(merge_labels(Labels::new(), &defaults), defaults);
        assert_eq!(
            merge_labels(Status::Fail.labels(), &Labels::new()),
            Status::Fail.labels()
        );
    }

    #[test]
    fn test_status_from_connection() {
        let ok: Result<(), String> = Ok(());
        let err: Result<(), String> = Err("connection refused".to_string());

        assert_eq!(Status::from_connection(&ok), Status::Success);
        assert_eq!(Status::from_connection(&err), Status::Fail);
        assert_eq!(Status::Fail.to_string(), "fail");
    }
}
