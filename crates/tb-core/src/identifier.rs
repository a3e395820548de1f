//! Rule list identifiers
//!
//! A `RulesIdentifier` names one compiled rule list and summarizes which
//! version of every input went into it. Two configurations that compile to the
//! same rule list have the same identifier; comparing two identifiers yields the
//! set of inputs that differ.
//!
//! # String form
//!
//! ```text
//! <name>"<tds etag>""<temp list etag>""<allow list etag>""<unprotected sites hash>"
//! ```
//!
//! Missing components render as the empty token `""`. The parser also accepts
//! the legacy layouts that predate the allow list component:
//! `"tds""temp"` and `"tds""temp"hash`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash::hash_domains;

/// Token used for any component that is absent.
pub const EMPTY_TOKEN: &str = "\"\"";

/// Error returned when parsing an identifier string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierParseError {
    #[error("identifier has no version tokens")]
    MissingTokens,
    #[error("unterminated version token at byte {0}")]
    UnterminatedToken(usize),
    #[error("expected 2 to 4 version tokens, found {0}")]
    TokenCount(usize),
}

/// One input contributing to a compiled rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    TrackerData,
    TempList,
    ExceptionList,
    UnprotectedSites,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::TrackerData,
        Component::TempList,
        Component::ExceptionList,
        Component::UnprotectedSites,
    ];

    #[inline]
    pub const fn flag(self) -> Difference {
        match self {
            Component::TrackerData => Difference::TRACKER_DATA,
            Component::TempList => Difference::TEMP_LIST,
            Component::ExceptionList => Difference::EXCEPTION_LIST,
            Component::UnprotectedSites => Difference::UNPROTECTED_SITES,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::TrackerData => "tracker-data",
            Component::TempList => "temp-list",
            Component::ExceptionList => "exception-list",
            Component::UnprotectedSites => "unprotected-sites",
        };
        f.write_str(s)
    }
}

bitflags::bitflags! {
    /// Set of components that differ between two identifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Difference: u8 {
        const TRACKER_DATA = 1 << 0;
        const TEMP_LIST = 1 << 1;
        const EXCEPTION_LIST = 1 << 2;
        const UNPROTECTED_SITES = 1 << 3;
    }
}

impl Difference {
    /// Iterate the components contained in this set.
    pub fn components(self) -> impl Iterator<Item = Component> {
        Component::ALL
            .into_iter()
            .filter(move |c| self.contains(c.flag()))
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for component in self.components() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

/// Versioned identity of a compiled rule list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RulesIdentifier {
    name: String,
    tds_etag: String,
    temp_list_etag: String,
    allow_list_etag: String,
    unprotected_sites_hash: String,
}

impl RulesIdentifier {
    /// Build an identifier from already summarized components.
    pub fn new(
        name: &str,
        tds_etag: &str,
        temp_list_etag: Option<&str>,
        allow_list_etag: Option<&str>,
        unprotected_sites_hash: Option<&str>,
    ) -> Self {
        Self {
            name: name.chars().filter(|&c| c != '"').collect(),
            tds_etag: normalize(Some(tds_etag)),
            temp_list_etag: normalize(temp_list_etag),
            allow_list_etag: normalize(allow_list_etag),
            unprotected_sites_hash: normalize(unprotected_sites_hash),
        }
    }

    /// Build an identifier, hashing the unprotected sites list.
    pub fn make<S: AsRef<str>>(
        name: &str,
        tds_etag: &str,
        temp_list_etag: Option<&str>,
        allow_list_etag: Option<&str>,
        unprotected_sites: &[S],
    ) -> Self {
        let hash = hash_domains(unprotected_sites);
        Self::new(name, tds_etag, temp_list_etag, allow_list_etag, hash.as_deref())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tds_etag(&self) -> &str {
        &self.tds_etag
    }

    pub fn temp_list_etag(&self) -> &str {
        &self.temp_list_etag
    }

    pub fn allow_list_etag(&self) -> &str {
        &self.allow_list_etag
    }

    pub fn unprotected_sites_hash(&self) -> &str {
        &self.unprotected_sites_hash
    }

    /// Components whose version differs from `other`. The name is not compared.
    pub fn compare(&self, other: &RulesIdentifier) -> Difference {
        let mut diff = Difference::empty();
        if self.tds_etag != other.tds_etag {
            diff |= Difference::TRACKER_DATA;
        }
        if self.temp_list_etag != other.temp_list_etag {
            diff |= Difference::TEMP_LIST;
        }
        if self.allow_list_etag != other.allow_list_etag {
            diff |= Difference::EXCEPTION_LIST;
        }
        if self.unprotected_sites_hash != other.unprotected_sites_hash {
            diff |= Difference::UNPROTECTED_SITES;
        }
        diff
    }

    /// Version tokens without the name, as used in cache file names and logs.
    pub fn version_string(&self) -> String {
        format!(
            "{}{}{}{}",
            self.tds_etag, self.temp_list_etag, self.allow_list_etag, self.unprotected_sites_hash
        )
    }
}

/// Wrap a version token in quotes, dropping any quotes it already carries.
fn normalize(token: Option<&str>) -> String {
    match token {
        None => EMPTY_TOKEN.to_string(),
        Some(token) => {
            let inner: String = token.chars().filter(|&c| c != '"').collect();
            format!("\"{inner}\"")
        }
    }
}

impl fmt::Display for RulesIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.version_string())
    }
}

impl FromStr for RulesIdentifier {
    type Err = IdentifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let start = s.find('"').ok_or(IdentifierParseError::MissingTokens)?;
        let name = &s[..start];

        let mut tokens: Vec<String> = Vec::with_capacity(4);
        let mut pos = start;
        while pos < s.len() {
            let rest = &s[pos..];
            if let Some(body) = rest.strip_prefix('"') {
                let close = body
                    .find('"')
                    .ok_or(IdentifierParseError::UnterminatedToken(pos))?;
                tokens.push(rest[..close + 2].to_string());
                pos += close + 2;
            } else {
                // Legacy identifiers stored the unprotected sites hash unquoted.
                tokens.push(normalize(Some(rest)));
                pos = s.len();
            }
        }

        let mut tokens = tokens.into_iter();
        let (tds, temp, allow, unprotected) = match tokens.len() {
            2 => (tokens.next(), tokens.next(), None, None),
            3 => (tokens.next(), tokens.next(), None, tokens.next()),
            4 => (tokens.next(), tokens.next(), tokens.next(), tokens.next()),
            0 => return Err(IdentifierParseError::MissingTokens),
            n => return Err(IdentifierParseError::TokenCount(n)),
        };

        Ok(Self {
            name: name.to_string(),
            tds_etag: tds.unwrap_or_else(|| EMPTY_TOKEN.to_string()),
            temp_list_etag: temp.unwrap_or_else(|| EMPTY_TOKEN.to_string()),
            allow_list_etag: allow.unwrap_or_else(|| EMPTY_TOKEN.to_string()),
            unprotected_sites_hash: unprotected.unwrap_or_else(|| EMPTY_TOKEN.to_string()),
        })
    }
}

impl Serialize for RulesIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RulesIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
