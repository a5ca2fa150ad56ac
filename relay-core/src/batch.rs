//! Turns a cycle's claimed sources into fetch batches.

use std::collections::HashMap;

use tracing::debug;

use crate::feed::{AdvancedOptions, Source};

/// One fetch: a target and every source that reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    pub target: String,
    pub sources: Vec<Source>,
    pub options: Option<AdvancedOptions>,
}

impl TargetGroup {
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }
}

pub type Batch = Vec<TargetGroup>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub regular: Vec<Batch>,
    /// Single-source batches for sources with request options, fetched after
    /// the regular sequence.
    pub advanced: Vec<Batch>,
}

impl BatchPlan {
    pub fn target_count(&self) -> usize {
        self.regular.iter().chain(&self.advanced).map(Vec::len).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.regular.len() + self.advanced.len()
    }

    /// Regular batches first, then the advanced sequence.
    pub fn into_batches(self) -> Vec<Batch> {
        let mut batches = self.regular;
        batches.extend(self.advanced);
        batches
    }
}

/// Strips cookies from sources whose owner is not on `allowlist`.
pub fn apply_cookie_allowlist(sources: &mut [Source], allowlist: &[String]) {
    for source in sources.iter_mut() {
        let Some(options) = source.advanced.as_mut() else {
            continue;
        };
        if options.cookies.is_empty() || allowlist.iter().any(|id| *id == source.owner_id) {
            continue;
        }
        debug!(source = %source.id, owner = %source.owner_id, "dropping cookies for owner not on allowlist");
        options.cookies.clear();
        if options.is_empty() {
            source.advanced = None;
        }
    }
}

/// Groups sources by target, in order of first appearance, and splits the
/// groups into batches of at most `batch_size` targets.
pub fn plan(sources: Vec<Source>, batch_size: usize) -> BatchPlan {
    let batch_size = batch_size.max(1);
    let mut groups: Vec<TargetGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut advanced: Vec<Batch> = Vec::new();

    for source in sources {
        if source.has_advanced_options() {
            advanced.push(vec![TargetGroup {
                target: source.target.clone(),
                options: source.advanced.clone(),
                sources: vec![source],
            }]);
            continue;
        }
        match index.get(&source.target) {
            Some(&i) => groups[i].sources.push(source),
            None => {
                index.insert(source.target.clone(), groups.len());
                groups.push(TargetGroup {
                    target: source.target.clone(),
                    sources: vec![source],
                    options: None,
                });
            }
        }
    }

    let mut regular: Vec<Batch> = Vec::new();
    let mut groups = groups.into_iter().peekable();
    while groups.peek().is_some() {
        regular.push(groups.by_ref().take(batch_size).collect());
    }

    BatchPlan { regular, advanced }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, target: &str) -> Source {
        Source::new(id, target)
    }

    #[test]
    fn groups_shared_targets_into_one_fetch() {
        let plan = plan(
            vec![
                source("a", "https://x.test/1"),
                source("b", "https://x.test/2"),
                source("c", "https://x.test/1"),
            ],
            400,
        );
        assert_eq!(plan.regular.len(), 1);
        assert_eq!(plan.target_count(), 2);
        assert_eq!(plan.regular[0][0].source_ids(), vec!["a", "c"]);
    }

    #[test]
    fn splits_into_fixed_size_batches() {
        let sources = (0..5)
            .map(|i| source(&i.to_string(), &format!("https://x.test/{i}")))
            .collect();
        let plan = plan(sources, 2);
        let sizes: Vec<usize> = plan.regular.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn advanced_sources_are_fetched_alone() {
        let mut special = source("s", "https://x.test/1");
        special.owner_id = "owner".into();
        special.advanced = Some(AdvancedOptions {
            cookies: vec![("session".into(), "abc".into())],
            headers: vec![],
        });
        let mut sources = vec![source("a", "https://x.test/1"), special];

        apply_cookie_allowlist(&mut sources, &["owner".into()]);
        let plan = plan(sources.clone(), 400);
        assert_eq!(plan.advanced.len(), 1);
        assert_eq!(plan.regular[0].len(), 1);

        apply_cookie_allowlist(&mut sources, &[]);
        assert!(sources[1].advanced.is_none());
        let plan = super::plan(sources, 400);
        assert!(plan.advanced.is_empty());
        assert_eq!(plan.regular[0][0].sources.len(), 2);
    }
}
