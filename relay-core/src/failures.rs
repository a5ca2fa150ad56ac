use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::persist;

/// Ceiling and warning threshold for consecutive target failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub ceiling: u32,
    pub warn_at: u32,
}

impl FailurePolicy {
    pub fn new(ceiling: u32, warn_fraction: f64) -> Self {
        Self {
            ceiling,
            warn_at: warn_threshold(ceiling, warn_fraction),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ceiling > 0
    }
}

/// `floor(ceiling * fraction)`, retried at half the ceiling when that would
/// reach the ceiling itself. `0` means no warning is sent.
pub fn warn_threshold(ceiling: u32, fraction: f64) -> u32 {
    let scaled = (f64::from(ceiling) * fraction).floor() as u32;
    if scaled < ceiling {
        return scaled;
    }
    let half = ceiling / 2;
    if half < ceiling {
        half
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum FailureRecord {
    Failing { count: u32 },
    Disabled { count: u32, disabled_at: DateTime<Utc> },
}

impl FailureRecord {
    pub fn count(&self) -> u32 {
        match self {
            FailureRecord::Failing { count } | FailureRecord::Disabled { count, .. } => *count,
        }
    }
}

/// What a single outcome did to a target's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Failure accounting is turned off.
    Ignored,
    Counted { count: u32 },
    /// The streak hit the warning threshold on this failure.
    Warned { count: u32 },
    Disabled { count: u32, at: DateTime<Utc> },
    /// A success cleared an existing record.
    Recovered { previous: u32 },
    Unchanged,
}

impl FailureTransition {
    /// Whether the transition warrants a failure notice.
    pub fn is_notable(&self) -> bool {
        matches!(
            self,
            FailureTransition::Warned { .. } | FailureTransition::Disabled { .. }
        )
    }
}

/// Consecutive failure counters keyed by target URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureTable {
    records: HashMap<String, FailureRecord>,
}

impl FailureTable {
    pub async fn load(path: &Path) -> Self {
        persist::read_json_or_default(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<(), StorageError> {
        persist::write_json_atomic(path, self).await
    }

    pub fn get(&self, target: &str) -> Option<&FailureRecord> {
        self.records.get(target)
    }

    pub fn count(&self, target: &str) -> u32 {
        self.records.get(target).map_or(0, FailureRecord::count)
    }

    pub fn is_disabled(&self, target: &str) -> bool {
        matches!(self.records.get(target), Some(FailureRecord::Disabled { .. }))
    }

    pub fn record_failure(&mut self, target: &str, policy: &FailurePolicy) -> FailureTransition {
        if !policy.is_enabled() {
            return FailureTransition::Ignored;
        }
        let count = match self.records.get(target) {
            Some(FailureRecord::Disabled { .. }) => return FailureTransition::Unchanged,
            Some(FailureRecord::Failing { count }) => count + 1,
            None => 1,
        };

        if count >= policy.ceiling {
            let at = Utc::now();
            self.records.insert(
                target.to_owned(),
                FailureRecord::Disabled {
                    count,
                    disabled_at: at,
                },
            );
            return FailureTransition::Disabled { count, at };
        }

        self.records
            .insert(target.to_owned(), FailureRecord::Failing { count });
        if policy.warn_at > 0 && count == policy.warn_at {
            FailureTransition::Warned { count }
        } else {
            FailureTransition::Counted { count }
        }
    }

    pub fn record_success(&mut self, target: &str) -> FailureTransition {
        match self.records.remove(target) {
            Some(record) => FailureTransition::Recovered {
                previous: record.count(),
            },
            None => FailureTransition::Unchanged,
        }
    }

    /// Clears a target's record, including a disablement.
    pub fn reset(&mut self, target: &str) -> bool {
        self.records.remove(target).is_some()
    }

    /// Takes over every record present in `other`.
    pub fn merge(&mut self, other: FailureTable) {
        self.records.extend(other.records);
    }

    pub fn disabled_targets(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| matches!(r, FailureRecord::Disabled { .. }))
            .map(|(target, _)| target.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: &str = "https://example.com/feed";

    #[test]
    fn warn_threshold_never_reaches_ceiling() {
        assert_eq!(warn_threshold(18, 0.75), 13);
        assert_eq!(warn_threshold(4, 1.0), 2);
        assert_eq!(warn_threshold(1, 0.75), 0);
        assert_eq!(warn_threshold(0, 0.75), 0);
    }

    #[test]
    fn ceiling_disables_and_one_less_does_not() {
        let policy = FailurePolicy::new(3, 0.75);
        let mut table = FailureTable::default();
        table.record_failure(T, &policy);
        table.record_failure(T, &policy);
        assert!(!table.is_disabled(T));
        assert!(matches!(
            table.record_failure(T, &policy),
            FailureTransition::Disabled { count: 3, .. }
        ));
        assert!(table.is_disabled(T));
        assert_eq!(table.record_failure(T, &policy), FailureTransition::Unchanged);
    }

    #[test]
    fn warning_fires_once() {
        let policy = FailurePolicy::new(8, 0.75);
        let mut table = FailureTable::default();
        let transitions: Vec<_> = (0..7).map(|_| table.record_failure(T, &policy)).collect();
        let warned = transitions
            .iter()
            .filter(|t| matches!(t, FailureTransition::Warned { .. }))
            .count();
        assert_eq!(warned, 1);
        assert_eq!(transitions[5], FailureTransition::Warned { count: 6 });
    }

    #[test]
    fn success_resets_streak() {
        let policy = FailurePolicy::new(10, 0.75);
        let mut table = FailureTable::default();
        for _ in 0..9 {
            table.record_failure(T, &policy);
        }
        assert_eq!(
            table.record_success(T),
            FailureTransition::Recovered { previous: 9 }
        );
        assert_eq!(table.count(T), 0);
    }

    #[test]
    fn zero_ceiling_ignores_failures() {
        let policy = FailurePolicy::new(0, 0.75);
        let mut table = FailureTable::default();
        assert_eq!(table.record_failure(T, &policy), FailureTransition::Ignored);
        assert_eq!(table.count(T), 0);
    }
}
