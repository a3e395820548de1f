//! trackerblock Rule Compiler
//!
//! Turns a tracker dataset plus exception lists into a compiled rule list.
//! Decoding and entry validation happen here; the final compilation step sits
//! behind the `RuleListCompiler` trait so the engine's compiler can be plugged in.

pub mod builder;
pub mod compiler;
pub mod optimizer;
pub mod parser;
pub mod store;

pub use builder::{BuiltRules, ExceptionLists, RulesBuilder};
pub use compiler::{CompileError, EncodingCompiler, RuleListCompiler, RuleListHandle, RuleRejection};
pub use optimizer::{dedupe_rules, DedupeStats};
pub use parser::{parse_tracker_data, sanitize_domains, SanitizedDomains};
pub use store::{RuleListStore, StoreError};
