//! Inputs to the pipeline: the rules source collaborator and app settings.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use tb_core::tds::{ListInput, TrackerDataSet};

/// Everything needed to compile one named rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationInput {
    pub name: String,
    /// Latest downloaded dataset, if any.
    pub tracker_data: Option<TrackerDataSet>,
    /// Dataset bundled with the app. Always present.
    pub embedded: TrackerDataSet,
    pub temp_list: ListInput,
    pub allow_list: ListInput,
    pub unprotected_sites: Vec<String>,
}

impl CompilationInput {
    /// Input with only the embedded dataset and no exceptions.
    pub fn embedded_only(name: impl Into<String>, embedded: TrackerDataSet) -> Self {
        Self {
            name: name.into(),
            tracker_data: None,
            embedded,
            temp_list: ListInput::never_fetched(),
            allow_list: ListInput::never_fetched(),
            unprotected_sites: Vec::new(),
        }
    }
}

/// Datasets for one named rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleListSource {
    pub name: String,
    pub tracker_data: Option<TrackerDataSet>,
    pub embedded: TrackerDataSet,
}

/// Supplies the current inputs. Exceptions are shared by every rule list.
pub trait RulesSource: Send + Sync {
    fn rule_lists(&self) -> Vec<RuleListSource>;

    fn temp_list(&self) -> ListInput;

    fn allow_list(&self) -> ListInput;

    fn unprotected_sites(&self) -> Vec<String>;

    /// One compilation input per rule list, sampled at the same moment.
    fn inputs(&self) -> Vec<CompilationInput> {
        let temp_list = self.temp_list();
        let allow_list = self.allow_list();
        let unprotected_sites = self.unprotected_sites();

        self.rule_lists()
            .into_iter()
            .map(|list| CompilationInput {
                name: list.name,
                tracker_data: list.tracker_data,
                embedded: list.embedded,
                temp_list: temp_list.clone(),
                allow_list: allow_list.clone(),
                unprotected_sites: unprotected_sites.clone(),
            })
            .collect()
    }
}

/// User settings that shape generated page scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub send_do_not_sell: bool,
    pub text_size_percentage: u16,
    pub autofill_enabled: bool,
    pub login_detection_enabled: bool,
    pub internal_user: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            send_do_not_sell: true,
            text_size_percentage: 100,
            autofill_enabled: true,
            login_detection_enabled: false,
            internal_user: false,
        }
    }
}

pub trait SettingsSource: Send + Sync {
    fn current(&self) -> AppSettings;
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<AppSettings>,
}

impl SharedSettings {
    pub fn new(settings: AppSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut AppSettings)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl SettingsSource for SharedSettings {
    fn current(&self) -> AppSettings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
