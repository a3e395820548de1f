//! Content blocker rule definitions
//!
//! These types serialize directly to the JSON rule list vocabulary understood
//! by the rendering engine's rule compiler.

use serde::{Deserialize, Serialize};

// =============================================================================
// Resource Types
// =============================================================================

/// Resource type a trigger is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Document,
    Image,
    #[serde(rename = "style-sheet")]
    Stylesheet,
    Script,
    Font,
    Raw,
    #[serde(rename = "svg-document")]
    Svg,
    Media,
    Popup,
}

impl ResourceType {
    /// Map a tracker dataset option type to an engine resource type.
    pub fn from_tds_type(s: &str) -> Option<Self> {
        match s {
            "script" => Some(Self::Script),
            "xmlhttprequest" => Some(Self::Raw),
            "subdocument" => Some(Self::Document),
            "image" => Some(Self::Image),
            "stylesheet" => Some(Self::Stylesheet),
            _ => None,
        }
    }
}

/// Load type restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoadType {
    #[serde(rename = "third-party")]
    ThirdParty,
}

// =============================================================================
// Trigger
// =============================================================================

/// Condition under which a rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "url-filter")]
    pub url_filter: String,
    #[serde(rename = "unless-domain", default, skip_serializing_if = "Option::is_none")]
    pub unless_domain: Option<Vec<String>>,
    #[serde(rename = "if-domain", default, skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
    #[serde(rename = "resource-type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<ResourceType>>,
    #[serde(rename = "load-type", default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<Vec<LoadType>>,
}

impl Trigger {
    /// Third-party trigger that does not fire on the given first-party domains.
    pub fn unless_domain(url_filter: impl Into<String>, domains: Option<Vec<String>>) -> Self {
        Self {
            url_filter: url_filter.into(),
            unless_domain: domains,
            if_domain: None,
            resource_type: None,
            load_type: Some(vec![LoadType::ThirdParty]),
        }
    }

    /// Third-party trigger restricted to pages on the given domains.
    pub fn if_domain(
        url_filter: impl Into<String>,
        domains: Option<Vec<String>>,
        resource_type: Option<Vec<ResourceType>>,
    ) -> Self {
        Self {
            url_filter: url_filter.into(),
            unless_domain: None,
            if_domain: domains,
            resource_type,
            load_type: Some(vec![LoadType::ThirdParty]),
        }
    }
}

// =============================================================================
// Action
// =============================================================================

/// Action kind for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Block,
    IgnorePreviousRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
}

impl Action {
    pub const fn block() -> Self {
        Self { kind: ActionType::Block }
    }

    pub const fn ignore_previous_rules() -> Self {
        Self { kind: ActionType::IgnorePreviousRules }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A single content blocker rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentBlockerRule {
    pub trigger: Trigger,
    pub action: Action,
}

impl ContentBlockerRule {
    pub fn new(trigger: Trigger, action: Action) -> Self {
        Self { trigger, action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_serializes_engine_keys() {
        let rule = ContentBlockerRule::new(
            Trigger::if_domain(".*", Some(vec!["*example.com".into()]), None),
            Action::ignore_previous_rules(),
        );
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["trigger"]["url-filter"], ".*");
        assert_eq!(json["trigger"]["if-domain"][0], "*example.com");
        assert_eq!(json["trigger"]["load-type"][0], "third-party");
        assert!(json["trigger"].get("unless-domain").is_none());
        assert_eq!(json["action"]["type"], "ignore-previous-rules");
    }

    #[test]
    fn test_resource_type_names() {
        let json = serde_json::to_string(&vec![ResourceType::Stylesheet, ResourceType::Raw]).unwrap();
        assert_eq!(json, "[\"style-sheet\",\"raw\"]");
        assert_eq!(ResourceType::from_tds_type("subdocument"), Some(ResourceType::Document));
        assert_eq!(ResourceType::from_tds_type("websocket"), None);
    }
}
