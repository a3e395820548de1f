//! trackerblock Core Library
//!
//! Shared data model for the content blocking rule pipeline: the versioned
//! identifier of a compiled rule list, the tracker dataset and rule models,
//! and the on-disk cache format for compiled rule lists.
//!
//! # Modules
//!
//! - `identifier`: Versioned rule list identifiers and their comparison
//! - `hash`: Domain list digests and CRC32
//! - `tds`: Tracker dataset model
//! - `types`: Content blocker rule model
//! - `cache`: Compiled rule list cache format and loader

pub mod cache;
pub mod hash;
pub mod identifier;
pub mod tds;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheError, CachedRuleList};
pub use hash::{content_digest, crc32, hash_domains};
pub use identifier::{Component, Difference, IdentifierParseError, RulesIdentifier};
pub use tds::{ListInput, TrackerData, TrackerDataSet};
pub use types::{Action, ActionType, ContentBlockerRule, ResourceType, Trigger};
