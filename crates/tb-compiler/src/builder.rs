use std::ops::Range;

use tb_core::identifier::Component;
use tb_core::tds::{KnownTracker, Owner, RuleMatching, TrackerAction, TrackerData, TrackerRule};
use tb_core::types::{Action, ContentBlockerRule, ResourceType, Trigger};

use crate::optimizer::{dedupe_rules, DedupeStats};

/// Matches any scheme we block on plus any number of subdomains.
/// A bare `.*` over-matches and alternation is not supported by the engine.
pub const SUBDOMAIN_PREFIX: &str = "^(https?)?(wss?)?://([a-z0-9-]+\\.)*";
pub const DOMAIN_MATCH_SUFFIX: &str = "(:?[0-9]+)?/.*";

/// Exception lists folded into a rule list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionLists<'a> {
    pub temp_list: &'a [String],
    pub allow_list: &'a [String],
    pub unprotected_sites: &'a [String],
}

/// Contiguous run of rules contributed by one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSegment {
    pub component: Component,
    pub range: Range<usize>,
}

/// Rules built for one rule list, with the input each rule came from.
#[derive(Debug, Clone, Default)]
pub struct BuiltRules {
    pub rules: Vec<ContentBlockerRule>,
    pub segments: Vec<RuleSegment>,
    pub stats: DedupeStats,
}

impl BuiltRules {
    /// The input that contributed the rule at `index`.
    pub fn component_for(&self, index: usize) -> Option<Component> {
        self.segments
            .iter()
            .find(|segment| segment.range.contains(&index))
            .map(|segment| segment.component)
    }

    fn push_segment(&mut self, component: Component, rules: Vec<ContentBlockerRule>) {
        if rules.is_empty() {
            return;
        }
        let start = self.rules.len();
        self.rules.extend(rules);
        self.segments.push(RuleSegment {
            component,
            range: start..self.rules.len(),
        });
    }
}

/// Builds content blocker rules from a tracker dataset.
pub struct RulesBuilder<'a> {
    tracker_data: &'a TrackerData,
}

impl<'a> RulesBuilder<'a> {
    pub fn new(tracker_data: &'a TrackerData) -> Self {
        Self { tracker_data }
    }

    /// Build all rules for the dataset followed by one exception rule per non-empty list.
    pub fn build(&self, exceptions: ExceptionLists<'_>) -> BuiltRules {
        let mut built = BuiltRules::default();

        let mut tracker_rules = Vec::new();
        for tracker in self.tracker_data.trackers.values() {
            let (rules, stats) = self.build_tracker_rules(tracker);
            built.stats.merge(stats);
            tracker_rules.extend(rules);
        }

        if let Some(cnames) = &self.tracker_data.cnames {
            for (cloaked, target) in cnames {
                let Some(tracker) = self.tracker_data.find_tracker_by_cname(target) else {
                    continue;
                };
                let (rules, stats) = self.build_tracker_rules(&tracker.with_domain(cloaked));
                built.stats.merge(stats);
                tracker_rules.extend(rules);
            }
        }

        built.push_segment(Component::TrackerData, tracker_rules);
        built.push_segment(Component::TempList, exception_rule(exceptions.temp_list));
        built.push_segment(Component::ExceptionList, exception_rule(exceptions.allow_list));
        built.push_segment(
            Component::UnprotectedSites,
            exception_rule(exceptions.unprotected_sites),
        );

        built
    }

    /// Build the rules for a single tracker: its default blocking rule followed by
    /// its special rules, most specific groups first.
    pub fn build_tracker_rules(&self, tracker: &KnownTracker) -> (Vec<ContentBlockerRule>, DedupeStats) {
        let blocking = self.build_blocking_rules(tracker);

        let mut groups: Vec<Vec<ContentBlockerRule>> = tracker
            .rules
            .iter()
            .flatten()
            .map(|rule| self.build_special_rules(rule, tracker))
            .collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut special: Vec<ContentBlockerRule> = groups.into_iter().flatten().collect();
        let stats = dedupe_rules(&mut special);

        let mut rules = blocking;
        rules.extend(special);
        (rules, stats)
    }

    fn build_blocking_rules(&self, tracker: &KnownTracker) -> Vec<ContentBlockerRule> {
        if tracker.default_action != TrackerAction::Block || tracker.domain.is_empty() {
            return Vec::new();
        }
        let url_filter = format!(
            "{}{}{}",
            SUBDOMAIN_PREFIX,
            regex_escape(&tracker.domain),
            DOMAIN_MATCH_SUFFIX
        );
        vec![ContentBlockerRule::new(
            Trigger::unless_domain(url_filter, self.owner_domains(tracker.owner.as_ref())),
            Action::block(),
        )]
    }

    fn build_special_rules(&self, rule: &TrackerRule, tracker: &KnownTracker) -> Vec<ContentBlockerRule> {
        match tracker.default_action {
            TrackerAction::Block => self.rules_for_blocking_tracker(rule, tracker),
            TrackerAction::Ignore => self.rules_for_ignoring_tracker(rule, tracker),
        }
    }

    fn rules_for_ignoring_tracker(&self, r: &TrackerRule, tracker: &KnownTracker) -> Vec<ContentBlockerRule> {
        let owner = tracker.owner.as_ref();
        if r.action == Some(TrackerAction::Ignore) {
            return vec![self.block(r, owner, None), ignore_previous(r, r.options.as_ref())];
        }
        match (&r.options, &r.exceptions) {
            (None, None) => vec![self.block(r, owner, None)],
            (Some(options), Some(exceptions)) => vec![
                self.block(r, owner, Some(options)),
                ignore_previous(r, Some(exceptions)),
            ],
            (Some(options), None) => vec![self.block(r, owner, Some(options))],
            (None, Some(exceptions)) => vec![
                self.block(r, owner, None),
                ignore_previous(r, Some(exceptions)),
            ],
        }
    }

    fn rules_for_blocking_tracker(&self, r: &TrackerRule, tracker: &KnownTracker) -> Vec<ContentBlockerRule> {
        let owner = tracker.owner.as_ref();
        if let (Some(options), Some(exceptions)) = (&r.options, &r.exceptions) {
            return vec![
                ignore_previous(r, None),
                self.block(r, owner, Some(options)),
                ignore_previous(r, Some(exceptions)),
            ];
        }
        if r.action == Some(TrackerAction::Ignore) {
            return vec![ignore_previous(r, r.options.as_ref())];
        }
        match (&r.options, &r.exceptions) {
            (Some(options), _) => vec![ignore_previous(r, None), self.block(r, owner, Some(options))],
            (None, Some(exceptions)) => vec![ignore_previous(r, Some(exceptions))],
            (None, None) => vec![self.block(r, owner, None)],
        }
    }

    fn block(&self, rule: &TrackerRule, owner: Option<&Owner>, matching: Option<&RuleMatching>) -> ContentBlockerRule {
        let trigger = match matching {
            Some(matching) => Trigger::if_domain(
                normalized_rule(rule),
                matching.domains.as_deref().and_then(wildcards),
                matching.types.as_deref().map(map_resources),
            ),
            None => Trigger::unless_domain(normalized_rule(rule), self.owner_domains(owner)),
        };
        ContentBlockerRule::new(trigger, Action::block())
    }

    fn owner_domains(&self, owner: Option<&Owner>) -> Option<Vec<String>> {
        self.tracker_data.related_domains(owner).and_then(wildcards)
    }
}

fn ignore_previous(rule: &TrackerRule, matching: Option<&RuleMatching>) -> ContentBlockerRule {
    ContentBlockerRule::new(
        Trigger::if_domain(
            normalized_rule(rule),
            matching.and_then(|m| m.domains.as_deref()).and_then(wildcards),
            matching.and_then(|m| m.types.as_deref()).map(map_resources),
        ),
        Action::ignore_previous_rules(),
    )
}

fn exception_rule(domains: &[String]) -> Vec<ContentBlockerRule> {
    match wildcards(domains) {
        Some(domains) => vec![ContentBlockerRule::new(
            Trigger::if_domain(".*", Some(domains), None),
            Action::ignore_previous_rules(),
        )],
        None => Vec::new(),
    }
}

/// Prefix every domain with `*` so it also matches subdomains. Empty lists yield `None`.
fn wildcards(domains: &[String]) -> Option<Vec<String>> {
    if domains.is_empty() {
        return None;
    }
    Some(domains.iter().map(|d| format!("*{d}")).collect())
}

fn map_resources(types: &[String]) -> Vec<ResourceType> {
    types
        .iter()
        .filter_map(|t| ResourceType::from_tds_type(t))
        .collect()
}

fn normalized_rule(rule: &TrackerRule) -> String {
    if rule.rule.starts_with("http") {
        rule.rule.clone()
    } else {
        format!("{}{}", SUBDOMAIN_PREFIX, rule.rule)
    }
}

fn regex_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('.', "\\.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_tracker_data;
    use tb_core::types::ActionType;

    const TDS: &str = r#"{
      "trackers": {
        "tracker.com": {
          "domain": "tracker.com",
          "default": "block",
          "owner": { "name": "Tracker Inc", "displayName": "Tracker Inc" },
          "rules": [
            { "rule": "tracker\\.com/allowed\\.js", "action": "ignore" },
            { "rule": "tracker\\.com/scoped\\.js", "options": { "domains": ["news.com"], "types": ["script"] } }
          ]
        },
        "analytics.net": {
          "domain": "analytics.net",
          "default": "ignore",
          "owner": { "name": "Analytics LLC" },
          "rules": [
            { "rule": "analytics\\.net/collect", "exceptions": { "domains": ["shop.com"] } }
          ]
        }
      },
      "entities": {
        "Tracker Inc": { "domains": ["tracker.com", "tracker-cdn.com"] },
        "Analytics LLC": { "domains": [] }
      },
      "domains": { "tracker.com": "Tracker Inc", "analytics.net": "Analytics LLC" },
      "cnames": { "metrics.site.com": "edge.tracker.com" }
    }"#;

    fn tds() -> TrackerData {
        parse_tracker_data(TDS).unwrap()
    }

    #[test]
    fn blocking_tracker_gets_default_rule_with_owner_exemption() {
        let tds = tds();
        let builder = RulesBuilder::new(&tds);
        let (rules, _) = builder.build_tracker_rules(&tds.trackers["tracker.com"]);

        let first = &rules[0];
        assert_eq!(first.action.kind, ActionType::Block);
        assert_eq!(
            first.trigger.url_filter,
            format!("{}tracker\\.com{}", SUBDOMAIN_PREFIX, DOMAIN_MATCH_SUFFIX)
        );
        assert_eq!(
            first.trigger.unless_domain,
            Some(vec!["*tracker.com".to_string(), "*tracker-cdn.com".to_string()])
        );
    }

    #[test]
    fn special_rules_for_blocking_tracker() {
        let tds = tds();
        let builder = RulesBuilder::new(&tds);
        let (rules, _) = builder.build_tracker_rules(&tds.trackers["tracker.com"]);

        // default block + (ignore, scoped block) + ignore for allowed.js
        assert_eq!(rules.len(), 4);
        let scoped = &rules[2];
        assert_eq!(scoped.action.kind, ActionType::Block);
        assert_eq!(scoped.trigger.if_domain, Some(vec!["*news.com".to_string()]));
        assert_eq!(scoped.trigger.resource_type, Some(vec![ResourceType::Script]));
        let allowed = &rules[3];
        assert_eq!(allowed.action.kind, ActionType::IgnorePreviousRules);
        assert!(allowed.trigger.url_filter.ends_with("tracker\\.com/allowed\\.js"));
    }

    #[test]
    fn ignoring_tracker_blocks_only_rules() {
        let tds = tds();
        let builder = RulesBuilder::new(&tds);
        let (rules, _) = builder.build_tracker_rules(&tds.trackers["analytics.net"]);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].action.kind, ActionType::Block);
        // Entity with no domains yields no unless-domain list.
        assert_eq!(rules[0].trigger.unless_domain, None);
        assert_eq!(rules[1].action.kind, ActionType::IgnorePreviousRules);
        assert_eq!(rules[1].trigger.if_domain, Some(vec!["*shop.com".to_string()]));
    }

    #[test]
    fn cname_cloaked_trackers_get_rules() {
        let tds = tds();
        let built = RulesBuilder::new(&tds).build(ExceptionLists::default());
        assert!(built
            .rules
            .iter()
            .any(|r| r.trigger.url_filter.contains("metrics\\.site\\.com")));
    }

    #[test]
    fn exception_lists_form_separate_segments() {
        let tds = tds();
        let temp = vec!["temp.com".to_string()];
        let allow = vec!["allowed.com".to_string(), "other.com".to_string()];
        let built = RulesBuilder::new(&tds).build(ExceptionLists {
            temp_list: &temp,
            allow_list: &allow,
            unprotected_sites: &[],
        });

        let tracker_count = built.segments[0].range.len();
        assert_eq!(built.segments.len(), 3);
        assert_eq!(built.component_for(0), Some(Component::TrackerData));
        assert_eq!(built.component_for(tracker_count), Some(Component::TempList));
        assert_eq!(built.component_for(tracker_count + 1), Some(Component::ExceptionList));
        assert_eq!(built.component_for(tracker_count + 2), None);

        let allow_rule = &built.rules[tracker_count + 1];
        assert_eq!(allow_rule.trigger.url_filter, ".*");
        assert_eq!(
            allow_rule.trigger.if_domain,
            Some(vec!["*allowed.com".to_string(), "*other.com".to_string()])
        );
    }

    #[test]
    fn build_is_deterministic() {
        let tds = tds();
        let a = RulesBuilder::new(&tds).build(ExceptionLists::default());
        let b = RulesBuilder::new(&tds).build(ExceptionLists::default());
        assert_eq!(a.rules, b.rules);
    }
}
