//! Artifacts derived from the rules and settings, such as page script configuration.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::snapshot::UpdateEvent;
use crate::source::AppSettings;

pub const CONTENT_BLOCKER_SCRIPT: &str = "content-blocker";
pub const PRIVACY_SIGNALS_SCRIPT: &str = "privacy-signals";
pub const TEXT_SIZE_SCRIPT: &str = "text-size";
pub const AUTOFILL_SCRIPT: &str = "autofill";
pub const LOGIN_DETECTION_SCRIPT: &str = "login-detection";

/// Configuration for each page script, keyed by script name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependentArtifacts {
    pub scripts: BTreeMap<String, Value>,
}

impl DependentArtifacts {
    pub fn script(&self, name: &str) -> Option<&Value> {
        self.scripts.get(name)
    }
}

pub trait ArtifactBuilder: Send + Sync {
    fn build(&self, rules: &UpdateEvent, settings: &AppSettings) -> DependentArtifacts;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultArtifactBuilder;

impl ArtifactBuilder for DefaultArtifactBuilder {
    fn build(&self, rules: &UpdateEvent, settings: &AppSettings) -> DependentArtifacts {
        let lists: Vec<Value> = rules
            .rules
            .iter()
            .map(|snapshot| {
                let tracker_data: Value =
                    serde_json::from_str(&snapshot.encoded_tracker_data).unwrap_or(Value::Null);
                json!({
                    "name": snapshot.name,
                    "identifier": snapshot.identifier.to_string(),
                    "etag": snapshot.etag,
                    "trackerData": tracker_data,
                    "tempUnprotectedDomains": snapshot.exceptions.temp_list,
                    "exceptionDomains": snapshot.exceptions.allow_list,
                    "userUnprotectedDomains": snapshot.exceptions.unprotected_sites,
                })
            })
            .collect();

        let mut scripts = BTreeMap::new();
        scripts.insert(
            CONTENT_BLOCKER_SCRIPT.to_string(),
            json!({ "ruleLists": lists, "sequence": rules.sequence }),
        );
        scripts.insert(
            PRIVACY_SIGNALS_SCRIPT.to_string(),
            json!({ "globalPrivacyControl": settings.send_do_not_sell }),
        );
        scripts.insert(
            TEXT_SIZE_SCRIPT.to_string(),
            json!({ "percentage": settings.text_size_percentage }),
        );
        scripts.insert(
            AUTOFILL_SCRIPT.to_string(),
            json!({ "enabled": settings.autofill_enabled, "internalUser": settings.internal_user }),
        );
        scripts.insert(
            LOGIN_DETECTION_SCRIPT.to_string(),
            json!({ "enabled": settings.login_detection_enabled }),
        );

        DependentArtifacts { scripts }
    }
}
