use std::fs;
use std::path::Path;

use tb_core::content_digest;
use tb_core::tds::{ListInput, TrackerDataSet};
use tb_rules::{RuleListSource, RulesSource};

/// Rules source backed by files read once at startup.
#[derive(Debug, Clone)]
pub struct FileRulesSource {
    pub name: String,
    pub tracker_data: Option<TrackerDataSet>,
    pub embedded: TrackerDataSet,
    pub temp_list: ListInput,
    pub allow_list: ListInput,
    pub unprotected_sites: Vec<String>,
}

impl RulesSource for FileRulesSource {
    fn rule_lists(&self) -> Vec<RuleListSource> {
        vec![RuleListSource {
            name: self.name.clone(),
            tracker_data: self.tracker_data.clone(),
            embedded: self.embedded.clone(),
        }]
    }

    fn temp_list(&self) -> ListInput {
        self.temp_list.clone()
    }

    fn allow_list(&self) -> ListInput {
        self.allow_list.clone()
    }

    fn unprotected_sites(&self) -> Vec<String> {
        self.unprotected_sites.clone()
    }
}

pub fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

/// Version token for file content when none is given.
pub fn content_etag(content: &str) -> String {
    content_digest(content.as_bytes())
}

pub fn load_dataset(path: &Path, etag: Option<String>) -> Result<TrackerDataSet, String> {
    let encoded = read_text(path)?;
    let etag = etag.unwrap_or_else(|| content_etag(&encoded));
    Ok(TrackerDataSet::new(etag, encoded))
}

pub fn load_list(path: Option<&Path>, etag: Option<String>) -> Result<ListInput, String> {
    let Some(path) = path else {
        return Ok(ListInput::never_fetched());
    };
    let content = read_text(path)?;
    let etag = etag.unwrap_or_else(|| content_etag(&content));
    Ok(ListInput::new(etag, parse_domain_lines(&content)))
}

/// One domain per line; blank lines and `#` comments are skipped.
pub fn parse_domain_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_lines_skip_comments() {
        let content = "# temp list\nexample.com\n\n  other.org  # trailing\n#last\n";
        assert_eq!(parse_domain_lines(content), vec!["example.com", "other.org"]);
    }

    #[test]
    fn missing_list_is_never_fetched() {
        assert_eq!(load_list(None, None).unwrap(), ListInput::never_fetched());
    }

    #[test]
    fn list_etag_defaults_to_content_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.txt");
        fs::write(&path, "example.com\n").unwrap();

        let list = load_list(Some(&path), None).unwrap();
        assert_eq!(list.etag, Some(content_etag("example.com\n")));
        assert_eq!(list.domains, vec!["example.com".to_string()]);

        assert_eq!(list.etag.as_deref().map(str::len), Some(64));

        fs::write(&path, "example.org\n").unwrap();
        let changed = load_list(Some(&path), None).unwrap();
        assert_ne!(changed.etag, list.etag);

        let pinned = load_list(Some(&path), Some("v1".into())).unwrap();
        assert_eq!(pinned.etag.as_deref(), Some("v1"));
    }

    #[test]
    fn dataset_read_errors_name_the_file() {
        let err = load_dataset(Path::new("/nonexistent/tds.json"), None).unwrap_err();
        assert!(err.contains("/nonexistent/tds.json"));
    }
}
