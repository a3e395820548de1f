//! Rule list compilation seam
//!
//! The rendering engine owns the real rule list compiler. `RuleListCompiler`
//! is the boundary to it: it may return a previously compiled list for an
//! identifier, or compile a fresh one and fail with a `RuleRejection` that
//! points at the offending rule when it can.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use tb_core::identifier::RulesIdentifier;
use tb_core::types::{ContentBlockerRule, Trigger};

use crate::parser::is_valid_domain;
use crate::store::RuleListStore;

/// The engine refused a rule list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}{}", rule_suffix(.index))]
pub struct RuleRejection {
    /// Index of the offending rule, when the compiler reports one.
    pub index: Option<usize>,
    pub reason: String,
}

fn rule_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" (rule {i})")).unwrap_or_default()
}

impl RuleRejection {
    pub fn new(index: Option<usize>, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

/// Failure to turn an input into a compiled rule list.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("tracker dataset could not be decoded: {0}")]
    DatasetDecode(#[from] serde_json::Error),
    #[error("rule list rejected: {0}")]
    Rejected(#[from] RuleRejection),
}

struct CompiledRuleList {
    identifier: RulesIdentifier,
    encoded: String,
    rule_count: usize,
}

/// Opaque handle to a compiled rule list.
///
/// Cloning is cheap. Equality is identity: two handles are equal only if they
/// refer to the same compiled list.
#[derive(Clone)]
pub struct RuleListHandle(Arc<CompiledRuleList>);

impl RuleListHandle {
    pub fn new(identifier: RulesIdentifier, encoded: String, rule_count: usize) -> Self {
        Self(Arc::new(CompiledRuleList {
            identifier,
            encoded,
            rule_count,
        }))
    }

    pub fn identifier(&self) -> &RulesIdentifier {
        &self.0.identifier
    }

    pub fn encoded(&self) -> &str {
        &self.0.encoded
    }

    pub fn rule_count(&self) -> usize {
        self.0.rule_count
    }

    pub fn ptr_eq(&self, other: &RuleListHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for RuleListHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for RuleListHandle {}

impl fmt::Debug for RuleListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleListHandle")
            .field("identifier", &self.0.identifier.to_string())
            .field("rule_count", &self.0.rule_count)
            .finish()
    }
}

/// Compiles rule lists into engine handles.
///
/// Implementations may block for a long time; callers run them off any
/// latency sensitive context.
pub trait RuleListCompiler: Send + Sync {
    /// Return a list compiled earlier for exactly this identifier.
    fn lookup(&self, _identifier: &RulesIdentifier) -> Option<RuleListHandle> {
        None
    }

    fn compile(
        &self,
        identifier: &RulesIdentifier,
        rules: &[ContentBlockerRule],
    ) -> Result<RuleListHandle, RuleRejection>;
}

/// Default compiler: validates every trigger and encodes the list as JSON,
/// optionally persisting the result in a `RuleListStore`.
#[derive(Debug, Default)]
pub struct EncodingCompiler {
    store: Option<RuleListStore>,
}

impl EncodingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: RuleListStore) -> Self {
        Self { store: Some(store) }
    }
}

impl RuleListCompiler for EncodingCompiler {
    fn lookup(&self, identifier: &RulesIdentifier) -> Option<RuleListHandle> {
        let store = self.store.as_ref()?;
        match store.load(identifier) {
            Ok(found) => found,
            Err(e) => {
                warn!("Ignoring unreadable cached rule list for {}: {}", identifier.name(), e);
                None
            }
        }
    }

    fn compile(
        &self,
        identifier: &RulesIdentifier,
        rules: &[ContentBlockerRule],
    ) -> Result<RuleListHandle, RuleRejection> {
        for (index, rule) in rules.iter().enumerate() {
            validate_trigger(&rule.trigger).map_err(|reason| RuleRejection::new(Some(index), reason))?;
        }

        let encoded = serde_json::to_string(rules)
            .map_err(|e| RuleRejection::new(None, format!("encoding failed: {e}")))?;
        let handle = RuleListHandle::new(identifier.clone(), encoded, rules.len());
        debug!("Compiled {} rules for {}", rules.len(), identifier);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&handle) {
                warn!("Failed to cache rule list {}: {}", identifier.name(), e);
            }
        }

        Ok(handle)
    }
}

/// Check a trigger the way the engine does before accepting a list.
pub fn validate_trigger(trigger: &Trigger) -> Result<(), String> {
    let filter = &trigger.url_filter;
    if filter.is_empty() {
        return Err("empty url-filter".to_string());
    }
    if !filter.is_ascii() || filter.chars().any(char::is_whitespace) {
        return Err(format!("url-filter {filter:?} is not a valid pattern"));
    }
    if !balanced_groups(filter) {
        return Err(format!("url-filter {filter:?} has unbalanced groups"));
    }

    if trigger.if_domain.is_some() && trigger.unless_domain.is_some() {
        return Err("if-domain and unless-domain are mutually exclusive".to_string());
    }

    for domains in [&trigger.if_domain, &trigger.unless_domain].into_iter().flatten() {
        if domains.is_empty() {
            return Err("domain list is empty".to_string());
        }
        for domain in domains {
            let bare = domain.strip_prefix('*').unwrap_or(domain);
            if !is_valid_domain(bare) {
                return Err(format!("domain {domain:?} is malformed"));
            }
        }
    }

    Ok(())
}

fn balanced_groups(pattern: &str) -> bool {
    let mut depth_paren = 0i32;
    let mut in_class = false;
    let mut escaped = false;

    for c in pattern.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth_paren += 1,
            ')' if !in_class => {
                depth_paren -= 1;
                if depth_paren < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth_paren == 0 && !in_class && !escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::types::Action;

    fn id() -> RulesIdentifier {
        RulesIdentifier::new("test", "etag", None, None, None)
    }

    #[test]
    fn compiles_valid_rules() {
        let rules = vec![
            ContentBlockerRule::new(
                Trigger::unless_domain("^https?://tracker\\.com/.*", Some(vec!["*tracker.com".into()])),
                Action::block(),
            ),
            ContentBlockerRule::new(
                Trigger::if_domain(".*", Some(vec!["*site.com".into()]), None),
                Action::ignore_previous_rules(),
            ),
        ];
        let handle = EncodingCompiler::new().compile(&id(), &rules).unwrap();
        assert_eq!(handle.rule_count(), 2);
        assert_eq!(handle.identifier(), &id());
        let decoded: Vec<ContentBlockerRule> = serde_json::from_str(handle.encoded()).unwrap();
        assert_eq!(decoded, rules);
    }

    #[test]
    fn rejection_points_at_offending_rule() {
        let rules = vec![
            ContentBlockerRule::new(Trigger::unless_domain("a\\.com", None), Action::block()),
            ContentBlockerRule::new(
                Trigger::if_domain(".*", Some(vec!["*bad domain".into()]), None),
                Action::ignore_previous_rules(),
            ),
        ];
        let err = EncodingCompiler::new().compile(&id(), &rules).unwrap_err();
        assert_eq!(err.index, Some(1));
        assert!(err.to_string().contains("rule 1"));
    }

    #[test]
    fn validates_patterns() {
        assert!(validate_trigger(&Trigger::unless_domain("(a|b", None)).is_err());
        assert!(validate_trigger(&Trigger::unless_domain("a)", None)).is_err());
        assert!(validate_trigger(&Trigger::unless_domain("[(]x", None)).is_ok());
        assert!(validate_trigger(&Trigger::unless_domain("", None)).is_err());
        assert!(validate_trigger(&Trigger::unless_domain("a b", None)).is_err());
        assert!(validate_trigger(&Trigger::if_domain("x", Some(vec![]), None)).is_err());
    }

    #[test]
    fn handles_compare_by_identity() {
        let a = RuleListHandle::new(id(), "[]".into(), 0);
        let b = RuleListHandle::new(id(), "[]".into(), 0);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
