//! Published rules and the events announcing them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tb_compiler::RuleListHandle;
use tb_core::identifier::{Difference, RulesIdentifier};
use tb_core::tds::TrackerData;

/// Opaque value a caller attaches to a compilation request; handed back in the
/// update event that satisfies it.
pub type CompletionToken = String;

/// Exception domains that made it into a compiled rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedExceptions {
    pub temp_list: Vec<String>,
    pub allow_list: Vec<String>,
    pub unprotected_sites: Vec<String>,
}

/// Latest compiled rules for one rule list name. Immutable once published.
#[derive(Debug, Clone)]
pub struct RulesSnapshot {
    pub name: String,
    pub rules_list: RuleListHandle,
    pub tracker_data: Arc<TrackerData>,
    pub encoded_tracker_data: Arc<str>,
    /// Etag of the dataset actually compiled, live or embedded.
    pub etag: String,
    pub identifier: RulesIdentifier,
    pub exceptions: Arc<AppliedExceptions>,
}

#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// Increases by one with every event a manager publishes.
    pub sequence: u64,
    /// Current snapshot of every rule list, ordered by name.
    pub rules: Vec<RulesSnapshot>,
    /// Rule lists that changed in this event and which of their inputs changed.
    pub changes: BTreeMap<String, Difference>,
    pub completion_tokens: Vec<CompletionToken>,
}

impl UpdateEvent {
    pub fn rules_named(&self, name: &str) -> Option<&RulesSnapshot> {
        self.rules.iter().find(|snapshot| snapshot.name == name)
    }
}
