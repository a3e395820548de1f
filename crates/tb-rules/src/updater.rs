//! Content blocking updater
//!
//! Combines the manager's rule updates with artifacts derived from app
//! settings into `ContentBlockingAssets` bundles. Settings changes trigger a
//! soft rebuild: new artifacts around the very same rules update. New
//! subscribers first receive the latest bundle, then every later one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::artifacts::{ArtifactBuilder, DependentArtifacts};
use crate::config::UpdaterConfig;
use crate::manager::RulesManager;
use crate::snapshot::UpdateEvent;
use crate::source::SettingsSource;

/// Setting changes that rebuild artifacts without recompiling rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftRebuildTrigger {
    DoNotSellChanged,
    LoginDetectionChanged,
    AutofillEnabledChanged,
    TextSizeChanged,
    InternalUserVerified,
    TrackerDependenciesUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateReason {
    RulesUpdated,
    /// Triggers handled together in one rebuild.
    SoftRebuild(Vec<SoftRebuildTrigger>),
}

#[derive(Debug, Clone)]
pub struct ContentBlockingAssets {
    pub rules_update: Arc<UpdateEvent>,
    pub artifacts: Arc<DependentArtifacts>,
    pub reason: UpdateReason,
}

struct Shared {
    current: Mutex<Option<Arc<ContentBlockingAssets>>>,
    sender: broadcast::Sender<Arc<ContentBlockingAssets>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<ContentBlockingAssets>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, assets: ContentBlockingAssets) {
        let assets = Arc::new(assets);
        let mut current = self.lock();
        *current = Some(assets.clone());
        let _ = self.sender.send(assets);
    }
}

/// Stream of bundles: the latest one at subscription time, then every later one.
pub struct AssetsSubscription {
    replay: Option<Arc<ContentBlockingAssets>>,
    receiver: broadcast::Receiver<Arc<ContentBlockingAssets>>,
}

impl AssetsSubscription {
    /// `None` once the updater is gone.
    pub async fn recv(&mut self) -> Option<Arc<ContentBlockingAssets>> {
        if let Some(replayed) = self.replay.take() {
            return Some(replayed);
        }
        loop {
            match self.receiver.recv().await {
                Ok(assets) => return Some(assets),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Assets subscriber lagged, skipped {} bundles", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub struct ContentBlockingUpdater {
    shared: Arc<Shared>,
    triggers: mpsc::UnboundedSender<SoftRebuildTrigger>,
    task: JoinHandle<()>,
}

impl ContentBlockingUpdater {
    /// Start following `manager`. Must be called from within a Tokio runtime.
    pub fn spawn(
        manager: &RulesManager,
        settings: Arc<dyn SettingsSource>,
        builder: Arc<dyn ArtifactBuilder>,
        config: UpdaterConfig,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.bundle_capacity.max(1));
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            sender,
        });
        let (triggers, trigger_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            shared: shared.clone(),
            settings,
            builder,
            latest: None,
        };
        let task = tokio::spawn(worker.run(manager.clone(), trigger_rx));

        Self {
            shared,
            triggers,
            task,
        }
    }

    /// Queue a soft rebuild. Ignored until the first rules update arrives.
    pub fn trigger(&self, reason: SoftRebuildTrigger) {
        if self.triggers.send(reason).is_err() {
            debug!("Updater stopped, dropping {:?}", reason);
        }
    }

    pub fn subscribe(&self) -> AssetsSubscription {
        let current = self.shared.lock();
        AssetsSubscription {
            replay: current.clone(),
            receiver: self.shared.sender.subscribe(),
        }
    }

    pub fn current(&self) -> Option<Arc<ContentBlockingAssets>> {
        self.shared.lock().clone()
    }
}

impl Drop for ContentBlockingUpdater {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker {
    shared: Arc<Shared>,
    settings: Arc<dyn SettingsSource>,
    builder: Arc<dyn ArtifactBuilder>,
    latest: Option<Arc<UpdateEvent>>,
}

impl Worker {
    async fn run(mut self, manager: RulesManager, mut triggers: mpsc::UnboundedReceiver<SoftRebuildTrigger>) {
        let (initial, mut updates) = manager.subscribe_with_current();
        if let Some(initial) = initial {
            self.rules_updated(initial);
        }

        loop {
            tokio::select! {
                biased;
                update = updates.recv() => match update {
                    Ok(event) => self.rules_updated(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Updater lagged behind {} rule updates", skipped);
                        if let Some(latest) = manager.current_update() {
                            self.rules_updated(latest);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                trigger = triggers.recv() => match trigger {
                    Some(first) => {
                        let mut reasons = vec![first];
                        while let Ok(more) = triggers.try_recv() {
                            if !reasons.contains(&more) {
                                reasons.push(more);
                            }
                        }
                        self.soft_rebuild(reasons);
                    }
                    None => break,
                },
            }
        }
    }

    fn rules_updated(&mut self, event: Arc<UpdateEvent>) {
        if let Some(latest) = &self.latest {
            if latest.sequence >= event.sequence {
                debug!("Already handled rules update {}", event.sequence);
                return;
            }
        }
        info!("Rebuilding assets for rules update {}", event.sequence);
        self.latest = Some(event.clone());
        self.emit(event, UpdateReason::RulesUpdated);
    }

    fn soft_rebuild(&mut self, reasons: Vec<SoftRebuildTrigger>) {
        let Some(latest) = self.latest.clone() else {
            debug!("Ignoring {:?} before the first rules update", reasons);
            return;
        };
        debug!("Soft rebuild for {:?}", reasons);
        self.emit(latest, UpdateReason::SoftRebuild(reasons));
    }

    fn emit(&self, rules_update: Arc<UpdateEvent>, reason: UpdateReason) {
        let settings = self.settings.current();
        let artifacts = Arc::new(self.builder.build(&rules_update, &settings));
        self.shared.emit(ContentBlockingAssets {
            rules_update,
            artifacts,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tb_compiler::EncodingCompiler;
    use tb_core::tds::{ListInput, TrackerDataSet};
    use tokio::time::{sleep, timeout};

    use serde_json::{json, Value};

    use crate::artifacts::{
        DefaultArtifactBuilder, AUTOFILL_SCRIPT, CONTENT_BLOCKER_SCRIPT, LOGIN_DETECTION_SCRIPT,
        PRIVACY_SIGNALS_SCRIPT, TEXT_SIZE_SCRIPT,
    };
    use crate::config::ManagerConfig;
    use crate::source::{AppSettings, CompilationInput, SharedSettings};

    const TDS: &str = r#"{ "trackers": { "tracker.com": { "domain": "tracker.com" } } }"#;

    fn input(temp_etag: &str) -> CompilationInput {
        CompilationInput {
            name: "TrackerDataSet".into(),
            tracker_data: Some(TrackerDataSet::new("A", TDS)),
            embedded: TrackerDataSet::new("E", TDS),
            temp_list: ListInput::new(temp_etag, vec!["temp.com".into()]),
            allow_list: ListInput::never_fetched(),
            unprotected_sites: Vec::new(),
        }
    }

    fn setup() -> (RulesManager, Arc<SharedSettings>, ContentBlockingUpdater) {
        let manager = RulesManager::new(Arc::new(EncodingCompiler::new()), ManagerConfig::default());
        let settings = Arc::new(SharedSettings::default());
        let updater = ContentBlockingUpdater::spawn(
            &manager,
            settings.clone(),
            Arc::new(DefaultArtifactBuilder),
            UpdaterConfig::default(),
        );
        (manager, settings, updater)
    }

    async fn next(subscription: &mut AssetsSubscription) -> Arc<ContentBlockingAssets> {
        timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for assets")
            .expect("updater stopped")
    }

    #[tokio::test]
    async fn nothing_is_emitted_before_rules() {
        let (_manager, _settings, updater) = setup();
        updater.trigger(SoftRebuildTrigger::TextSizeChanged);
        sleep(Duration::from_millis(50)).await;
        assert!(updater.current().is_none());
    }

    #[tokio::test]
    async fn late_subscriber_receives_latest_bundle() {
        let (manager, _settings, updater) = setup();
        let mut early = updater.subscribe();
        manager.submit(input("B"), None);
        let first = next(&mut early).await;
        assert_eq!(first.reason, UpdateReason::RulesUpdated);

        let mut late = updater.subscribe();
        let replayed = next(&mut late).await;
        assert!(Arc::ptr_eq(&first, &replayed));

        manager.submit(input("C"), None);
        let second = next(&mut late).await;
        assert_eq!(second.rules_update.sequence, 2);
        assert!(Arc::ptr_eq(&second, &next(&mut early).await));
    }

    #[tokio::test]
    async fn soft_rebuild_reuses_rules_update() {
        let (manager, settings, updater) = setup();
        let mut subscription = updater.subscribe();
        manager.submit(input("B"), None);
        let first = next(&mut subscription).await;

        settings.update(|s| s.send_do_not_sell = false);
        updater.trigger(SoftRebuildTrigger::DoNotSellChanged);
        let rebuilt = next(&mut subscription).await;

        assert_eq!(
            rebuilt.reason,
            UpdateReason::SoftRebuild(vec![SoftRebuildTrigger::DoNotSellChanged])
        );
        assert!(Arc::ptr_eq(&first.rules_update, &rebuilt.rules_update));
        assert!(!Arc::ptr_eq(&first.artifacts, &rebuilt.artifacts));
        assert_eq!(
            rebuilt.artifacts.script(PRIVACY_SIGNALS_SCRIPT).unwrap()["globalPrivacyControl"],
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn every_trigger_rebuilds_around_the_same_rules() {
        let cases: [(SoftRebuildTrigger, fn(&mut AppSettings), &str, &str, Value); 6] = [
            (
                SoftRebuildTrigger::DoNotSellChanged,
                |s| s.send_do_not_sell = false,
                PRIVACY_SIGNALS_SCRIPT,
                "globalPrivacyControl",
                json!(false),
            ),
            (
                SoftRebuildTrigger::LoginDetectionChanged,
                |s| s.login_detection_enabled = true,
                LOGIN_DETECTION_SCRIPT,
                "enabled",
                json!(true),
            ),
            (
                SoftRebuildTrigger::AutofillEnabledChanged,
                |s| s.autofill_enabled = false,
                AUTOFILL_SCRIPT,
                "enabled",
                json!(false),
            ),
            (
                SoftRebuildTrigger::TextSizeChanged,
                |s| s.text_size_percentage = 150,
                TEXT_SIZE_SCRIPT,
                "percentage",
                json!(150),
            ),
            (
                SoftRebuildTrigger::InternalUserVerified,
                |s| s.internal_user = true,
                AUTOFILL_SCRIPT,
                "internalUser",
                json!(true),
            ),
            (
                SoftRebuildTrigger::TrackerDependenciesUpdated,
                |_| {},
                CONTENT_BLOCKER_SCRIPT,
                "sequence",
                json!(1),
            ),
        ];

        let (manager, settings, updater) = setup();
        let mut subscription = updater.subscribe();
        manager.submit(input("B"), None);
        let first = next(&mut subscription).await;

        for (trigger, change, script, key, expected) in cases {
            settings.update(change);
            updater.trigger(trigger);
            let rebuilt = next(&mut subscription).await;

            assert_eq!(rebuilt.reason, UpdateReason::SoftRebuild(vec![trigger]), "{:?}", trigger);
            assert!(Arc::ptr_eq(&first.rules_update, &rebuilt.rules_update), "{:?}", trigger);
            assert_eq!(rebuilt.artifacts.script(script).unwrap()[key], expected, "{:?}", trigger);
        }
    }

    #[tokio::test]
    async fn queued_triggers_coalesce_into_one_bundle() {
        let (manager, settings, updater) = setup();
        let mut subscription = updater.subscribe();
        manager.submit(input("B"), None);
        let first = next(&mut subscription).await;

        settings.update(|s| {
            s.autofill_enabled = false;
            s.text_size_percentage = 120;
        });
        updater.trigger(SoftRebuildTrigger::AutofillEnabledChanged);
        updater.trigger(SoftRebuildTrigger::TextSizeChanged);
        updater.trigger(SoftRebuildTrigger::AutofillEnabledChanged);

        let rebuilt = next(&mut subscription).await;
        assert_eq!(
            rebuilt.reason,
            UpdateReason::SoftRebuild(vec![
                SoftRebuildTrigger::AutofillEnabledChanged,
                SoftRebuildTrigger::TextSizeChanged,
            ])
        );
        assert!(Arc::ptr_eq(&first.rules_update, &rebuilt.rules_update));
        assert_eq!(rebuilt.artifacts.script(TEXT_SIZE_SCRIPT).unwrap()["percentage"], json!(120));

        updater.trigger(SoftRebuildTrigger::LoginDetectionChanged);
        let following = next(&mut subscription).await;
        assert_eq!(
            following.reason,
            UpdateReason::SoftRebuild(vec![SoftRebuildTrigger::LoginDetectionChanged])
        );
    }

    #[tokio::test]
    async fn initial_settings_shape_first_bundle() {
        let manager = RulesManager::new(Arc::new(EncodingCompiler::new()), ManagerConfig::default());
        let settings = SharedSettings::new(AppSettings {
            text_size_percentage: 90,
            ..AppSettings::default()
        });
        let updater = ContentBlockingUpdater::spawn(
            &manager,
            Arc::new(settings),
            Arc::new(DefaultArtifactBuilder),
            UpdaterConfig::default(),
        );
        let mut subscription = updater.subscribe();
        manager.submit(input("B"), None);

        let assets = next(&mut subscription).await;
        assert_eq!(assets.artifacts.script(TEXT_SIZE_SCRIPT).unwrap()["percentage"], json!(90));
    }

    #[tokio::test]
    async fn updater_started_after_rules_replays_them() {
        let manager = RulesManager::new(Arc::new(EncodingCompiler::new()), ManagerConfig::default());
        let mut rx = manager.subscribe();
        manager.submit(input("B"), None);
        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();

        let updater = ContentBlockingUpdater::spawn(
            &manager,
            Arc::new(SharedSettings::default()),
            Arc::new(DefaultArtifactBuilder),
            UpdaterConfig::default(),
        );
        let mut subscription = updater.subscribe();
        let assets = next(&mut subscription).await;
        assert!(Arc::ptr_eq(&assets.rules_update, &event));
    }
}
