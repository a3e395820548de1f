//! trackerblock rule pipeline
//!
//! `RulesManager` compiles rule lists from a `RulesSource`, falling back to the
//! embedded dataset and dropping broken exception lists as needed, and
//! publishes `UpdateEvent`s. `ContentBlockingUpdater` pairs each update with
//! settings-derived artifacts and replays the latest bundle to new subscribers.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod fallback;
pub mod failure;
pub mod manager;
pub mod snapshot;
pub mod source;
pub mod updater;

pub use artifacts::{ArtifactBuilder, DefaultArtifactBuilder, DependentArtifacts};
pub use config::{ConfigError, ManagerConfig, PipelineConfig, UpdaterConfig};
pub use error::RulesError;
pub use failure::{FailureMemory, SourceModel};
pub use manager::{RulesManager, ScheduleOutcome};
pub use snapshot::{AppliedExceptions, CompletionToken, RulesSnapshot, UpdateEvent};
pub use source::{AppSettings, CompilationInput, RuleListSource, RulesSource, SettingsSource, SharedSettings};
pub use updater::{AssetsSubscription, ContentBlockingAssets, ContentBlockingUpdater, SoftRebuildTrigger, UpdateReason};
