//! Failure memory and the compilation model derived from it.
//!
//! A component version that made compilation fail is remembered per rule list
//! and left out of later models until the source supplies a different version.

use log::{debug, warn};

use tb_compiler::sanitize_domains;
use tb_core::hash::hash_domains;
use tb_core::identifier::{Component, RulesIdentifier};
use tb_core::tds::{ListInput, TrackerDataSet};

use crate::source::CompilationInput;

/// Versions known to break compilation for one rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureMemory {
    pub tds_etag: Option<String>,
    pub temp_list_etag: Option<String>,
    pub allow_list_etag: Option<String>,
    pub unprotected_sites_hash: Option<String>,
}

impl FailureMemory {
    pub fn is_empty(&self) -> bool {
        self.tds_etag.is_none()
            && self.temp_list_etag.is_none()
            && self.allow_list_etag.is_none()
            && self.unprotected_sites_hash.is_none()
    }

    pub fn get(&self, component: Component) -> Option<&str> {
        match component {
            Component::TrackerData => self.tds_etag.as_deref(),
            Component::TempList => self.temp_list_etag.as_deref(),
            Component::ExceptionList => self.allow_list_etag.as_deref(),
            Component::UnprotectedSites => self.unprotected_sites_hash.as_deref(),
        }
    }

    pub fn record(&mut self, component: Component, version: &str) {
        let slot = self.slot(component);
        *slot = Some(version.to_string());
    }

    /// Forget every recorded failure, tracker data included, once the source
    /// replaces any input recorded as broken.
    pub fn refresh(&mut self, input: &CompilationInput) {
        if self.is_empty() {
            return;
        }
        let current = [
            (Component::TrackerData, input.tracker_data.as_ref().map(|t| t.etag.clone())),
            (Component::TempList, input.temp_list.etag.clone()),
            (Component::ExceptionList, input.allow_list.etag.clone()),
            (Component::UnprotectedSites, unprotected_sites_version(&input.unprotected_sites)),
        ];
        let changed = current.into_iter().find(|(component, version)| {
            let recorded = self.get(*component);
            recorded.is_some() && recorded != version.as_deref()
        });
        if let Some((component, _)) = changed {
            debug!("{} changed since it failed, retrying all inputs for {}", component, input.name);
            *self = Self::default();
        }
    }

    fn slot(&mut self, component: Component) -> &mut Option<String> {
        match component {
            Component::TrackerData => &mut self.tds_etag,
            Component::TempList => &mut self.temp_list_etag,
            Component::ExceptionList => &mut self.allow_list_etag,
            Component::UnprotectedSites => &mut self.unprotected_sites_hash,
        }
    }
}

/// A versioned list of domains that takes part in compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDomains {
    pub version: String,
    pub domains: Vec<String>,
}

/// What will actually be compiled for one rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceModel {
    pub name: String,
    pub tracker_data: TrackerDataSet,
    /// Whether `tracker_data` is the embedded dataset.
    pub uses_embedded: bool,
    pub temp_list: Option<VersionedDomains>,
    pub allow_list: Option<VersionedDomains>,
    pub unprotected_sites: Option<VersionedDomains>,
}

impl SourceModel {
    /// Apply failure memory to an input.
    ///
    /// Lists the source never fetched take no part in compilation.
    pub fn make(input: &CompilationInput, memory: &FailureMemory) -> Self {
        let (tracker_data, uses_embedded) = match &input.tracker_data {
            Some(live) if memory.tds_etag.as_deref() != Some(live.etag.as_str()) => {
                (live.clone(), live.etag == input.embedded.etag)
            }
            Some(live) => {
                debug!("Skipping broken tracker data {} for {}", live.etag, input.name);
                (input.embedded.clone(), true)
            }
            None => (input.embedded.clone(), true),
        };

        let sites = sanitized(&input.name, Component::UnprotectedSites, &input.unprotected_sites);
        let unprotected_sites = hash_domains(&sites).map(|hash| VersionedDomains {
            version: hash,
            domains: sites,
        });

        Self {
            name: input.name.clone(),
            tracker_data,
            uses_embedded,
            temp_list: versioned(&input.name, Component::TempList, &input.temp_list),
            allow_list: versioned(&input.name, Component::ExceptionList, &input.allow_list),
            unprotected_sites,
        }
        .without_broken(memory)
    }

    fn without_broken(mut self, memory: &FailureMemory) -> Self {
        for component in [Component::TempList, Component::ExceptionList, Component::UnprotectedSites] {
            let broken = match (self.list(component), memory.get(component)) {
                (Some(list), Some(bad)) => list.version == bad,
                _ => false,
            };
            if broken {
                debug!("Dropping broken {} for {}", component, self.name);
                *self.list_mut(component) = None;
            }
        }
        self
    }

    pub fn identifier(&self) -> RulesIdentifier {
        RulesIdentifier::new(
            &self.name,
            &self.tracker_data.etag,
            self.temp_list.as_ref().map(|l| l.version.as_str()),
            self.allow_list.as_ref().map(|l| l.version.as_str()),
            self.unprotected_sites.as_ref().map(|l| l.version.as_str()),
        )
    }

    /// Version of `component` in this model, if it takes part.
    pub fn version(&self, component: Component) -> Option<&str> {
        match component {
            Component::TrackerData => Some(self.tracker_data.etag.as_str()),
            other => self.list(other).map(|l| l.version.as_str()),
        }
    }

    /// Whether dropping `component` leaves something different to compile.
    pub fn can_drop(&self, component: Component) -> bool {
        match component {
            Component::TrackerData => !self.uses_embedded,
            other => self.list(other).is_some(),
        }
    }

    /// Component blamed when the compiler gives no rule index:
    /// live tracker data first, then each exception list in turn.
    pub fn first_droppable(&self) -> Option<Component> {
        Component::ALL.into_iter().find(|&c| self.can_drop(c))
    }

    pub fn domains(&self, component: Component) -> &[String] {
        self.list(component).map(|l| l.domains.as_slice()).unwrap_or(&[])
    }

    fn list(&self, component: Component) -> Option<&VersionedDomains> {
        match component {
            Component::TrackerData => None,
            Component::TempList => self.temp_list.as_ref(),
            Component::ExceptionList => self.allow_list.as_ref(),
            Component::UnprotectedSites => self.unprotected_sites.as_ref(),
        }
    }

    fn list_mut(&mut self, component: Component) -> &mut Option<VersionedDomains> {
        match component {
            Component::TempList => &mut self.temp_list,
            Component::ExceptionList => &mut self.allow_list,
            _ => &mut self.unprotected_sites,
        }
    }
}

fn versioned(name: &str, component: Component, list: &ListInput) -> Option<VersionedDomains> {
    let version = list.etag.clone()?;
    Some(VersionedDomains {
        version,
        domains: sanitized(name, component, &list.domains),
    })
}

/// Version token of the unprotected sites that will actually be compiled.
fn unprotected_sites_version(sites: &[String]) -> Option<String> {
    hash_domains(&sanitize_domains(sites).domains)
}

fn sanitized(name: &str, component: Component, domains: &[String]) -> Vec<String> {
    let result = sanitize_domains(domains);
    if !result.rejected.is_empty() {
        warn!(
            "Ignored {} malformed {} entries for {}",
            result.rejected.len(),
            component,
            name
        );
    }
    result.domains
}
