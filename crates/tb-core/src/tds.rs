//! Tracker dataset (TDS) model
//!
//! Only the fields needed to build blocking rules are modelled; everything
//! else in the published dataset is ignored on decode. Maps are ordered so
//! that rule building over the same dataset is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default action for a known tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerAction {
    Block,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Page domains and resource types a tracker rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RuleMatching {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackerRule {
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surrogate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TrackerAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RuleMatching>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<RuleMatching>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownTracker {
    pub domain: String,
    #[serde(rename = "default", default = "default_tracker_action")]
    pub default_action: TrackerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevalence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<TrackerRule>>,
}

fn default_tracker_action() -> TrackerAction {
    TrackerAction::Block
}

impl KnownTracker {
    /// Clone this tracker under another domain, used for CNAME cloaked trackers.
    pub fn with_domain(&self, domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevalence: Option<f64>,
}

/// Decoded tracker dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackerData {
    #[serde(default)]
    pub trackers: BTreeMap<String, KnownTracker>,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub domains: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnames: Option<BTreeMap<String, String>>,
}

impl TrackerData {
    /// Domains owned by the same entity as `owner`.
    pub fn related_domains(&self, owner: Option<&Owner>) -> Option<&[String]> {
        let owner = owner?;
        self.entities
            .get(&owner.name)
            .map(|entity| entity.domains.as_slice())
    }

    /// Find the tracker a CNAME target resolves to, walking up parent domains.
    pub fn find_tracker_by_cname(&self, cname: &str) -> Option<&KnownTracker> {
        let mut host = cname.trim_end_matches('.');
        loop {
            if let Some(tracker) = self.trackers.get(host) {
                return Some(tracker);
            }
            match host.find('.') {
                Some(idx) if idx + 1 < host.len() => host = &host[idx + 1..],
                _ => return None,
            }
        }
    }
}

/// Raw tracker dataset together with its version token, as supplied by a rules source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerDataSet {
    pub etag: String,
    pub encoded: String,
}

impl TrackerDataSet {
    pub fn new(etag: impl Into<String>, encoded: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            encoded: encoded.into(),
        }
    }
}

/// A remotely versioned domain list.
///
/// `etag == None` means the list was never fetched. A fetched list keeps its
/// etag even when it holds no domains.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListInput {
    pub etag: Option<String>,
    pub domains: Vec<String>,
}

impl ListInput {
    pub fn new(etag: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            etag: Some(etag.into()),
            domains,
        }
    }

    pub fn never_fetched() -> Self {
        Self::default()
    }
}
