use log::debug;

use tb_core::hash::normalize_domain;
use tb_core::tds::TrackerData;

/// Maximum length of a full domain name.
const MAX_DOMAIN_LEN: usize = 253;
/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// Decode a tracker dataset from its JSON encoding.
pub fn parse_tracker_data(encoded: &str) -> Result<TrackerData, serde_json::Error> {
    serde_json::from_str(encoded)
}

/// Domain list with malformed entries filtered out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedDomains {
    pub domains: Vec<String>,
    pub rejected: Vec<String>,
}

/// Normalize a domain list, dropping malformed entries and duplicates.
///
/// A bad entry never fails the list; it is only logged.
pub fn sanitize_domains<S: AsRef<str>>(entries: &[S]) -> SanitizedDomains {
    let mut result = SanitizedDomains::default();

    for raw in entries {
        let raw = raw.as_ref();
        let domain = normalize_domain(raw);
        if domain.is_empty() {
            continue;
        }

        if !is_valid_domain(&domain) {
            debug!("Dropping malformed domain entry {:?}", raw);
            result.rejected.push(raw.to_string());
            continue;
        }

        if !result.domains.contains(&domain) {
            result.domains.push(domain);
        }
    }

    result
}

/// Check domain syntax: dot separated LDH labels, ASCII only.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }

    domain.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}
