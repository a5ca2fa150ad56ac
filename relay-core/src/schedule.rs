use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::feed::Source;

pub const DEFAULT_SCHEDULE: &str = "default";

/// A named refresh policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    pub refresh_interval: Duration,
    /// Substrings matched against target URLs.
    pub keywords: Vec<String>,
    /// Sources pinned to this schedule regardless of their target.
    pub source_ids: Vec<String>,
}

impl Schedule {
    pub fn default_with_interval(refresh_interval: Duration) -> Self {
        Self {
            name: DEFAULT_SCHEDULE.to_owned(),
            refresh_interval,
            keywords: Vec::new(),
            source_ids: Vec::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_SCHEDULE
    }

    pub fn matches_keywords(&self, target: &str) -> bool {
        self.keywords
            .iter()
            .any(|word| !word.is_empty() && target.contains(word.as_str()))
    }

    pub fn lists_source(&self, source_id: &str) -> bool {
        self.source_ids.iter().any(|id| id == source_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Already assigned to the asking schedule.
    Owned,
    /// Assigned to the asking schedule by this call.
    Assigned,
    /// Belongs, or is reserved, elsewhere.
    NotOwned,
}

impl Claim {
    pub fn is_included(self) -> bool {
        !matches!(self, Claim::NotOwned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceAssignment {
    schedule: String,
    /// Target the source had when it was assigned.
    target: String,
}

/// Which schedule owns each source, and through it each target.
///
/// Entries are written the first time a source is evaluated and stay put
/// while the source keeps its target. A target inherits the owner of the
/// first of its sources to be assigned, so every later source of that target
/// lands on the same schedule. A source moved to another target is evaluated
/// again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentTable {
    by_source: HashMap<String, SourceAssignment>,
    by_target: HashMap<String, String>,
}

impl AssignmentTable {
    pub fn owner_of_source(&self, source_id: &str) -> Option<&str> {
        self.by_source.get(source_id).map(|a| a.schedule.as_str())
    }

    pub fn owner_of_target(&self, target: &str) -> Option<&str> {
        self.by_target.get(target).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    fn assign(&mut self, source: &Source, schedule: &str) {
        self.by_source.insert(
            source.id.clone(),
            SourceAssignment {
                schedule: schedule.to_owned(),
                target: source.target.clone(),
            },
        );
        self.by_target
            .entry(source.target.clone())
            .or_insert_with(|| schedule.to_owned());
    }

    /// Decides whether `schedule` fetches `source` this cycle, recording a new
    /// assignment when the source had none. `all` is every known schedule.
    pub fn claim(&mut self, schedule: &Schedule, all: &[Schedule], source: &Source) -> Claim {
        match self.by_source.get(&source.id) {
            Some(entry) if entry.target == source.target => {
                return if entry.schedule == schedule.name {
                    Claim::Owned
                } else {
                    Claim::NotOwned
                };
            }
            Some(entry) => {
                info!(
                    source = %source.id,
                    from = %entry.target,
                    to = %source.target,
                    "source target changed, re-evaluating its schedule"
                );
                self.by_source.remove(&source.id);
            }
            None => {}
        }

        if let Some(owner) = self.by_target.get(&source.target).cloned() {
            self.assign(source, &owner);
            return if owner == schedule.name {
                Claim::Assigned
            } else {
                Claim::NotOwned
            };
        }

        let pinned_elsewhere = all
            .iter()
            .any(|s| s.name != schedule.name && s.lists_source(&source.id));

        if !schedule.is_default() {
            let wanted = schedule.lists_source(&source.id)
                || (!pinned_elsewhere && schedule.matches_keywords(&source.target));
            if wanted {
                self.assign(source, &schedule.name);
                info!(
                    source = %source.id,
                    url = %source.target,
                    schedule = %schedule.name,
                    "undelegated source delegated to custom schedule"
                );
                return Claim::Assigned;
            }
            return Claim::NotOwned;
        }

        let reserved = all.iter().filter(|s| !s.is_default()).any(|s| {
            s.lists_source(&source.id) || s.matches_keywords(&source.target)
        });
        if reserved {
            // A custom schedule will pick it up on its own cycle.
            return Claim::NotOwned;
        }
        self.assign(source, DEFAULT_SCHEDULE);
        Claim::Assigned
    }
}
