//! Compilation with fallback.
//!
//! Each failed attempt is blamed on one component. That component's version is
//! recorded in the failure memory and the next attempt runs without it: the
//! embedded dataset replaces broken tracker data, a broken list is left out.
//! Every retry removes something, so the loop ends once the embedded dataset
//! compiles on its own or fails with nothing left to remove.

use std::sync::Arc;

use log::{debug, warn};

use tb_compiler::{parse_tracker_data, CompileError, ExceptionLists, RuleListCompiler, RulesBuilder};
use tb_core::identifier::Component;

use crate::error::RulesError;
use crate::failure::{FailureMemory, SourceModel};
use crate::snapshot::{AppliedExceptions, RulesSnapshot};
use crate::source::CompilationInput;

struct AttemptFailure {
    /// Component the failing rule came from, if known.
    component: Option<Component>,
    error: CompileError,
}

/// Compile `input`, recording every component that fails in `memory`.
pub fn compile_with_fallback(
    compiler: &dyn RuleListCompiler,
    input: &CompilationInput,
    memory: &mut FailureMemory,
) -> Result<RulesSnapshot, RulesError> {
    memory.refresh(input);

    loop {
        let model = SourceModel::make(input, memory);
        let failure = match attempt(compiler, &model) {
            Ok(snapshot) => return Ok(snapshot),
            Err(failure) => failure,
        };

        let blamed = match failure.component {
            Some(component) => Some(component).filter(|&c| model.can_drop(c)),
            None => model.first_droppable(),
        };

        let Some(component) = blamed else {
            return Err(RulesError::FallbackCompileFailure {
                name: input.name.clone(),
                source: Arc::new(failure.error),
            });
        };

        let version = model.version(component).unwrap_or_default().to_string();
        warn!(
            "Compiling {} failed, dropping {} {}: {}",
            input.name, component, version, failure.error
        );
        memory.record(component, &version);
    }
}

fn attempt(compiler: &dyn RuleListCompiler, model: &SourceModel) -> Result<RulesSnapshot, AttemptFailure> {
    let tracker_data = parse_tracker_data(&model.tracker_data.encoded).map_err(|e| AttemptFailure {
        component: Some(Component::TrackerData),
        error: e.into(),
    })?;

    let identifier = model.identifier();
    let exceptions = AppliedExceptions {
        temp_list: model.domains(Component::TempList).to_vec(),
        allow_list: model.domains(Component::ExceptionList).to_vec(),
        unprotected_sites: model.domains(Component::UnprotectedSites).to_vec(),
    };

    let rules_list = match compiler.lookup(&identifier) {
        Some(cached) => {
            debug!("Reusing compiled rule list {}", identifier);
            cached
        }
        None => {
            let built = RulesBuilder::new(&tracker_data).build(ExceptionLists {
                temp_list: &exceptions.temp_list,
                allow_list: &exceptions.allow_list,
                unprotected_sites: &exceptions.unprotected_sites,
            });
            if built.stats.deduped > 0 {
                debug!("Removed {} duplicate rules for {}", built.stats.deduped, model.name);
            }
            compiler
                .compile(&identifier, &built.rules)
                .map_err(|rejection| AttemptFailure {
                    component: rejection.index.and_then(|i| built.component_for(i)),
                    error: rejection.into(),
                })?
        }
    };

    Ok(RulesSnapshot {
        name: model.name.clone(),
        rules_list,
        tracker_data: Arc::new(tracker_data),
        encoded_tracker_data: Arc::from(model.tracker_data.encoded.as_str()),
        etag: model.tracker_data.etag.clone(),
        identifier,
        exceptions: Arc::new(exceptions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tb_compiler::{EncodingCompiler, RuleListHandle, RuleRejection};
    use tb_core::identifier::RulesIdentifier;
    use tb_core::tds::{ListInput, TrackerDataSet};
    use tb_core::types::ContentBlockerRule;

    const TDS: &str = r#"{
        "trackers": {
            "tracker.com": { "domain": "tracker.com", "default": "block", "owner": { "name": "Tracker Inc" } }
        },
        "entities": { "Tracker Inc": { "domains": ["tracker.com", "tracker-cdn.com"] } },
        "domains": { "tracker.com": "Tracker Inc" }
    }"#;

    const BROKEN_TDS: &str = r#"{
        "trackers": {
            "broken.com": { "domain": "broken.com", "default": "block" }
        }
    }"#;

    /// Rejects any rule mentioning "broken".
    struct PickyCompiler {
        report_index: bool,
        compiles: AtomicUsize,
    }

    impl PickyCompiler {
        fn new(report_index: bool) -> Self {
            Self {
                report_index,
                compiles: AtomicUsize::new(0),
            }
        }
    }

    impl RuleListCompiler for PickyCompiler {
        fn compile(
            &self,
            identifier: &RulesIdentifier,
            rules: &[ContentBlockerRule],
        ) -> Result<RuleListHandle, RuleRejection> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            let encoded = serde_json::to_string(rules).unwrap();
            for (i, rule) in rules.iter().enumerate() {
                if serde_json::to_string(rule).unwrap().contains("broken") {
                    let index = self.report_index.then_some(i);
                    return Err(RuleRejection::new(index, "unsupported pattern"));
                }
            }
            Ok(RuleListHandle::new(identifier.clone(), encoded, rules.len()))
        }
    }

    fn input() -> CompilationInput {
        CompilationInput {
            name: "TrackerDataSet".into(),
            tracker_data: Some(TrackerDataSet::new("A", TDS)),
            embedded: TrackerDataSet::new("E", TDS),
            temp_list: ListInput::new("B", vec!["temp.com".into()]),
            allow_list: ListInput::new("C", vec!["allowed.com".into()]),
            unprotected_sites: vec!["mine.com".into()],
        }
    }

    #[test]
    fn clean_input_compiles_once() {
        let compiler = PickyCompiler::new(true);
        let mut memory = FailureMemory::default();
        let snapshot = compile_with_fallback(&compiler, &input(), &mut memory).unwrap();

        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 1);
        assert!(memory.is_empty());
        assert_eq!(snapshot.etag, "A");
        assert_eq!(snapshot.identifier.temp_list_etag(), "\"B\"");
        assert_eq!(snapshot.exceptions.allow_list, vec!["allowed.com".to_string()]);
        // tracker block rule plus one rule per exception list
        assert_eq!(snapshot.rules_list.rule_count(), 4);
    }

    #[test]
    fn broken_list_is_attributed_by_rule_index() {
        let compiler = PickyCompiler::new(true);
        let mut raw = input();
        raw.allow_list = ListInput::new("C", vec!["broken.org".into()]);
        let mut memory = FailureMemory::default();

        let snapshot = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(memory.get(Component::ExceptionList), Some("C"));
        assert_eq!(memory.get(Component::TrackerData), None);
        assert_eq!(snapshot.etag, "A");
        assert_eq!(snapshot.identifier.allow_list_etag(), "\"\"");
        assert_eq!(snapshot.identifier.temp_list_etag(), "\"B\"");
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn without_index_blame_follows_priority_order() {
        let compiler = PickyCompiler::new(false);
        let mut raw = input();
        raw.allow_list = ListInput::new("C", vec!["broken.org".into()]);
        let mut memory = FailureMemory::default();

        let snapshot = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        // live tracker data, then the temp list, then the allow list
        assert_eq!(memory.get(Component::TrackerData), Some("A"));
        assert_eq!(memory.get(Component::TempList), Some("B"));
        assert_eq!(memory.get(Component::ExceptionList), Some("C"));
        assert_eq!(snapshot.etag, "E");
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn broken_live_dataset_falls_back_to_embedded() {
        let compiler = PickyCompiler::new(true);
        let mut raw = input();
        raw.tracker_data = Some(TrackerDataSet::new("A", BROKEN_TDS));
        let mut memory = FailureMemory::default();

        let snapshot = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(memory.get(Component::TrackerData), Some("A"));
        assert_eq!(snapshot.etag, "E");
        assert_eq!(snapshot.identifier.tds_etag(), "\"E\"");
        assert_eq!(snapshot.identifier.temp_list_etag(), "\"B\"");
    }

    #[test]
    fn undecodable_live_dataset_falls_back_to_embedded() {
        let mut raw = input();
        raw.tracker_data = Some(TrackerDataSet::new("A", "{ not json"));
        let mut memory = FailureMemory::default();

        let snapshot = compile_with_fallback(&EncodingCompiler::new(), &raw, &mut memory).unwrap();
        assert_eq!(memory.get(Component::TrackerData), Some("A"));
        assert_eq!(snapshot.etag, "E");
    }

    #[test]
    fn broken_embedded_dataset_is_fatal() {
        let compiler = PickyCompiler::new(true);
        let raw = CompilationInput::embedded_only("TrackerDataSet", TrackerDataSet::new("E", BROKEN_TDS));
        let mut memory = FailureMemory::default();

        let err = compile_with_fallback(&compiler, &raw, &mut memory).unwrap_err();
        assert!(matches!(err, RulesError::FallbackCompileFailure { .. }));
        assert_eq!(err.name(), "TrackerDataSet");
    }

    #[test]
    fn known_broken_versions_are_not_retried() {
        let compiler = PickyCompiler::new(true);
        let mut raw = input();
        raw.temp_list = ListInput::new("B", vec!["broken.org".into()]);
        let mut memory = FailureMemory::default();

        compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);

        compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(compiler.compiles.load(Ordering::SeqCst), 3);

        raw.temp_list = ListInput::new("B2", vec!["fixed.org".into()]);
        let snapshot = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(snapshot.identifier.temp_list_etag(), "\"B2\"");
        assert_eq!(memory.get(Component::TempList), None);
    }

    #[test]
    fn unattributed_failure_recovers_live_dataset_once_culprit_changes() {
        let compiler = PickyCompiler::new(false);
        let mut raw = input();
        raw.temp_list = ListInput::new("B", vec!["broken.org".into()]);
        let mut memory = FailureMemory::default();

        let first = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(first.etag, "E");
        assert_eq!(memory.get(Component::TrackerData), Some("A"));
        assert_eq!(memory.get(Component::TempList), Some("B"));

        raw.temp_list = ListInput::new("B2", vec!["fixed.org".into()]);
        let second = compile_with_fallback(&compiler, &raw, &mut memory).unwrap();
        assert_eq!(second.etag, "A");
        assert_eq!(second.identifier.tds_etag(), "\"A\"");
        assert_eq!(second.identifier.temp_list_etag(), "\"B2\"");
        assert!(memory.is_empty());
    }
}
