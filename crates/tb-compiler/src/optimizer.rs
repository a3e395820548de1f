use std::collections::HashSet;

use tb_core::types::ContentBlockerRule;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

impl DedupeStats {
    pub fn merge(&mut self, other: DedupeStats) {
        self.before += other.before;
        self.after += other.after;
        self.deduped += other.deduped;
    }
}

/// Remove repeated rules, keeping the first occurrence of each.
///
/// Rule order is significant (`ignore-previous-rules` only affects rules
/// before it), so only use this on a run of rules that belong together.
pub fn dedupe_rules(rules: &mut Vec<ContentBlockerRule>) -> DedupeStats {
    let before = rules.len();
    let mut seen: HashSet<ContentBlockerRule> = HashSet::with_capacity(before);
    let mut deduped = 0usize;

    rules.retain(|rule| {
        if seen.contains(rule) {
            deduped += 1;
            false
        } else {
            seen.insert(rule.clone());
            true
        }
    });

    DedupeStats {
        before,
        after: rules.len(),
        deduped,
    }
}
