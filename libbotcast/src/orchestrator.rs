//! Multi-destination posting orchestration
//!
//! An [`Orchestrator`] owns a bot's destinations and its history. Every public
//! operation fans out to the active destinations one at a time in
//! registration order, gathers their records into a single
//! [`IterationRecord`], appends it to the history and persists the history
//! before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::{Config, DEFAULT_DELAY_SECS};
use crate::destinations::{ClientFactory, Destination, DestinationKind, ReplyCallback};
use crate::error::{BotcastError, ConfigError, Result};
use crate::history::RecordStore;
use crate::rate_limiter::{Clock, RateLimiter};
use crate::types::{ExtraKeys, IterationRecord};

/// Largest lookback accepted by [`Orchestrator::perform_batch_reply`]
pub const LOOKBACK_CEILING: usize = 50;

/// A destination slot in the registry
///
/// Inactive entries keep their place so the registry lists every known
/// destination, configured or not.
pub struct DestinationEntry {
    pub name: String,
    pub active: bool,
    destination: Option<Box<dyn Destination>>,
}

impl DestinationEntry {
    fn active(destination: Box<dyn Destination>) -> Self {
        Self {
            name: destination.name().to_string(),
            active: true,
            destination: Some(destination),
        }
    }

    fn inactive(name: &str) -> Self {
        Self {
            name: name.to_string(),
            active: false,
            destination: None,
        }
    }

    pub fn destination(&self) -> Option<&dyn Destination> {
        self.destination.as_deref()
    }
}

impl std::fmt::Debug for DestinationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationEntry")
            .field("name", &self.name)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

pub struct Orchestrator {
    bot_name: String,
    destinations: Vec<DestinationEntry>,
    store: RecordStore,
    extra_keys: ExtraKeys,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

impl Orchestrator {
    /// An orchestrator with no destinations
    ///
    /// Destinations are added with [`Orchestrator::register`].
    pub fn new(bot_name: impl Into<String>, store: RecordStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            bot_name: bot_name.into(),
            destinations: Vec::new(),
            store,
            extra_keys: ExtraKeys::new(),
            clock,
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
        }
    }

    /// Build an orchestrator from a bot's configuration
    ///
    /// Every [`DestinationKind`] gets an entry. A kind is active when its
    /// credential directory exists and its client can be set up; setup
    /// failures are logged and leave that destination inactive.
    ///
    /// # Errors
    ///
    /// Fails if the config has no secrets directory or the history file can't
    /// be read.
    pub fn from_config(
        config: &Config,
        factory: &dyn ClientFactory,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let secrets_dir = config.secrets_path()?;
        let store = RecordStore::open(config.history_path()?)?;

        let mut orchestrator = Self::new(&config.bot_name, store, limiter.clock());
        orchestrator.delay = config.delay();

        for kind in DestinationKind::ALL {
            let entry = match Self::setup(config, &secrets_dir, kind, factory, &limiter) {
                Ok(Some(destination)) => {
                    info!(bot = %config.bot_name, "Destination {} is active", kind);
                    DestinationEntry::active(destination)
                }
                Ok(None) => {
                    info!(
                        bot = %config.bot_name,
                        "No credentials for {} in {}, destination inactive",
                        kind,
                        secrets_dir.display()
                    );
                    DestinationEntry::inactive(kind.name())
                }
                Err(e) => {
                    error!(
                        bot = %config.bot_name,
                        "Could not set up {}, destination inactive: {}", kind, e
                    );
                    DestinationEntry::inactive(kind.name())
                }
            };
            orchestrator.destinations.push(entry);
        }

        Ok(orchestrator)
    }

    fn setup(
        config: &Config,
        secrets_dir: &Path,
        kind: DestinationKind,
        factory: &dyn ClientFactory,
        limiter: &Arc<RateLimiter>,
    ) -> std::result::Result<Option<Box<dyn Destination>>, ConfigError> {
        let Some(dir) = kind.locate_credentials(secrets_dir) else {
            return Ok(None);
        };

        let credentials = kind.load_credentials(&dir)?;
        let client = factory.create(kind, &credentials)?;
        let destination = kind.initialize(
            &credentials,
            &config.bot_name,
            client,
            Arc::clone(limiter),
            config.rate_limit(kind.name()),
        )?;
        Ok(Some(destination))
    }

    /// Add a destination, replacing any registered under the same name
    pub fn register(&mut self, destination: Box<dyn Destination>) {
        let entry = DestinationEntry::active(destination);
        match self.destinations.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.destinations.push(entry),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn destinations(&self) -> &[DestinationEntry] {
        &self.destinations
    }

    pub fn history(&self) -> &[IterationRecord] {
        self.store.records()
    }

    pub fn history_path(&self) -> &Path {
        self.store.path()
    }

    pub fn extra_keys(&self) -> &ExtraKeys {
        &self.extra_keys
    }

    /// Set one metadata key for all following records
    pub fn store_extra_info(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra_keys.insert(key.into(), value.into());
    }

    /// Merge metadata keys for all following records; later values win
    pub fn store_extra_keys<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in keys {
            self.extra_keys.insert(key.into(), value);
        }
    }

    /// Post text to every active destination
    pub async fn send(&mut self, text: &str) -> Result<IterationRecord> {
        let mut record = self.new_record();
        for (name, destination) in self.active() {
            record.insert_records(name, destination.send(text).await);
        }
        self.commit(record)
    }

    /// Post text with one media file; an empty caption means none
    pub async fn send_with_one_media(
        &mut self,
        text: &str,
        file: &Path,
        caption: &str,
    ) -> Result<IterationRecord> {
        let captions = if caption.is_empty() {
            Vec::new()
        } else {
            vec![caption.to_string()]
        };
        self.send_with_media(text, &[file.to_path_buf()], &captions)
            .await
    }

    /// Post text with media to every active destination
    ///
    /// # Errors
    ///
    /// Returns `BotcastError::InvalidArgument` without creating a record if
    /// `files` is empty.
    pub async fn send_with_media(
        &mut self,
        text: &str,
        files: &[PathBuf],
        captions: &[String],
    ) -> Result<IterationRecord> {
        if files.is_empty() {
            return Err(BotcastError::InvalidArgument(
                "send_with_media needs at least one file".to_string(),
            ));
        }

        let mut record = self.new_record();
        for (name, destination) in self.active() {
            let records = destination.send_with_media(text, files, captions).await;
            record.insert_records(name, records);
        }
        self.commit(record)
    }

    /// Reply to recent posts of a target account on each destination
    ///
    /// `target_handles` maps destination names to the account to reply to;
    /// destinations without a non-empty handle are left out. The lookback for
    /// a destination is its entry in `per_destination_lookback`, falling back
    /// to `lookback_limit`.
    ///
    /// # Errors
    ///
    /// Returns `BotcastError::LimitExceeded` before any network call if
    /// `lookback_limit` is above [`LOOKBACK_CEILING`].
    pub async fn perform_batch_reply(
        &mut self,
        callback: &dyn ReplyCallback,
        target_handles: &HashMap<String, String>,
        lookback_limit: usize,
        per_destination_lookback: &HashMap<String, usize>,
    ) -> Result<IterationRecord> {
        if lookback_limit > LOOKBACK_CEILING {
            return Err(BotcastError::LimitExceeded {
                requested: lookback_limit,
                ceiling: LOOKBACK_CEILING,
            });
        }

        let mut record = self.new_record();
        for (name, destination) in self.active() {
            let Some(handle) = target_handles.get(name).filter(|h| !h.trim().is_empty()) else {
                debug!(bot = %self.bot_name, "No batch reply target for {}", name);
                continue;
            };

            let lookback = per_destination_lookback
                .get(name)
                .copied()
                .unwrap_or(lookback_limit);
            let records = destination
                .perform_batch_reply(callback, handle, lookback)
                .await;
            record.insert_records(name, records);
        }
        self.commit(record)
    }

    /// Sleep for the configured delay
    pub async fn nap(&self) {
        info!(bot = %self.bot_name, "Napping for {:?}", self.delay);
        self.clock.sleep(self.delay).await;
    }

    fn new_record(&self) -> IterationRecord {
        IterationRecord::new(self.extra_keys.clone())
    }

    /// Active destinations in registration order
    fn active(&self) -> impl Iterator<Item = (&str, &dyn Destination)> + '_ {
        self.destinations.iter().filter_map(move |entry| {
            match (entry.active, entry.destination.as_deref()) {
                (true, Some(destination)) => Some((entry.name.as_str(), destination)),
                _ => {
                    info!(bot = %self.bot_name, "Skipping inactive destination {}", entry.name);
                    None
                }
            }
        })
    }

    fn commit(&mut self, record: IterationRecord) -> Result<IterationRecord> {
        self.store.append(record.clone());
        self.store.persist()?;

        if record.all_succeeded() {
            debug!(bot = %self.bot_name, "Recorded iteration at {}", record.timestamp);
        } else {
            info!(
                bot = %self.bot_name,
                "Recorded iteration at {} with failures", record.timestamp
            );
        }
        Ok(record)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bot_name", &self.bot_name)
            .field("destinations", &self.destinations)
            .field("history", &self.store.path())
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialBundle;
    use crate::destinations::mock::MockClient;
    use crate::destinations::NetworkClient;
    use crate::rate_limiter::ManualClock;
    use crate::types::PostId;
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        clock: Arc<ManualClock>,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = RecordStore::new(temp.path().join("testbot-history.json"));
        let orchestrator = Orchestrator::new("testbot", store, clock.clone());
        Harness {
            _temp: temp,
            clock,
            orchestrator,
        }
    }

    fn mastodon(client: Arc<MockClient>, clock: Arc<ManualClock>) -> Box<dyn Destination> {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("ACCESS_TOKEN"), "token").unwrap();
        let credentials = DestinationKind::Mastodon.load_credentials(temp.path()).unwrap();

        DestinationKind::Mastodon
            .initialize(
                &credentials,
                "testbot",
                client as Arc<dyn NetworkClient>,
                Arc::new(RateLimiter::new(clock)),
                0,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_without_destinations_still_records() {
        let mut h = harness();

        let record = h.orchestrator.send("hello").await.unwrap();

        assert!(record.output_records.is_empty());
        assert_eq!(h.orchestrator.history().len(), 1);
        assert!(h.orchestrator.history_path().is_file());
    }

    #[tokio::test]
    async fn test_send_records_under_destination_name() {
        let mut h = harness();
        let client = Arc::new(MockClient::new());
        h.orchestrator.register(mastodon(client.clone(), h.clock.clone()));

        let record = h.orchestrator.send("hello").await.unwrap();

        let records = record.records_for("mastodon");
        assert_eq!(records.len(), 1);
        assert!(records[0].is_success());
        assert_eq!(client.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let mut h = harness();
        let first = Arc::new(MockClient::new());
        let second = Arc::new(MockClient::new());
        h.orchestrator.register(mastodon(first.clone(), h.clock.clone()));
        h.orchestrator.register(mastodon(second.clone(), h.clock.clone()));

        h.orchestrator.send("hello").await.unwrap();

        assert_eq!(h.orchestrator.destinations().len(), 1);
        assert_eq!(first.posted().len(), 0);
        assert_eq!(second.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_send_with_media_requires_files() {
        let mut h = harness();

        let result = h.orchestrator.send_with_media("hello", &[], &[]).await;

        assert!(matches!(result, Err(BotcastError::InvalidArgument(_))));
        assert!(h.orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_send_with_one_media_empty_caption_uses_default() {
        let mut h = harness();
        let client = Arc::new(MockClient::new());
        h.orchestrator.register(mastodon(client.clone(), h.clock.clone()));

        let record = h
            .orchestrator
            .send_with_one_media("pic", Path::new("cat.png"), "")
            .await
            .unwrap();

        let records = record.records_for("mastodon");
        assert_eq!(
            records[0].captions,
            vec![crate::types::DEFAULT_CAPTION.to_string()]
        );
        assert_eq!(client.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_lookback_ceiling_checked_before_io() {
        let mut h = harness();
        let client = Arc::new(MockClient::new());
        h.orchestrator.register(mastodon(client.clone(), h.clock.clone()));

        let handles = HashMap::from([("mastodon".to_string(), "@someone".to_string())]);
        let callback = |_: &PostId, _: &str, _: &ExtraKeys| "reply".to_string();
        let result = h
            .orchestrator
            .perform_batch_reply(&callback, &handles, LOOKBACK_CEILING + 1, &HashMap::new())
            .await;

        assert!(matches!(
            result,
            Err(BotcastError::LimitExceeded { requested: 51, ceiling: 50 })
        ));
        assert_eq!(client.call_count(), 0);
        assert!(h.orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_batch_reply_skips_destinations_without_handle() {
        let mut h = harness();
        let client = Arc::new(MockClient::new());
        h.orchestrator.register(mastodon(client.clone(), h.clock.clone()));

        let handles = HashMap::from([("mastodon".to_string(), "  ".to_string())]);
        let callback = |_: &PostId, _: &str, _: &ExtraKeys| "reply".to_string();
        let record = h
            .orchestrator
            .perform_batch_reply(&callback, &handles, 5, &HashMap::new())
            .await
            .unwrap();

        assert!(record.output_records.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extra_keys_snapshot() {
        let mut h = harness();

        h.orchestrator.store_extra_info("seed", 1);
        let first = h.orchestrator.send("one").await.unwrap();

        h.orchestrator
            .store_extra_keys([("seed", json!(2)), ("source", json!("corpus"))]);
        let second = h.orchestrator.send("two").await.unwrap();

        assert_eq!(first.extra_keys, ExtraKeys::from([("seed".to_string(), json!(1))]));
        assert_eq!(second.extra_keys.get("seed"), Some(&json!(2)));
        assert_eq!(second.extra_keys.get("source"), Some(&json!("corpus")));
        assert_eq!(h.orchestrator.history()[0].extra_keys.get("seed"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_nap_sleeps_on_clock() {
        let h = harness();
        let orchestrator = h.orchestrator.with_delay(Duration::from_secs(90));

        orchestrator.nap().await;

        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(90)]);
    }

    struct MockFactory(Arc<MockClient>);

    impl ClientFactory for MockFactory {
        fn create(
            &self,
            _kind: DestinationKind,
            _credentials: &CredentialBundle,
        ) -> std::result::Result<Arc<dyn NetworkClient>, ConfigError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_from_config_activates_configured_destinations() {
        let temp = TempDir::new().unwrap();
        let mastodon_dir = temp.path().join("credentials_mastodon");
        std::fs::create_dir(&mastodon_dir).unwrap();
        std::fs::write(mastodon_dir.join("ACCESS_TOKEN"), "token\n").unwrap();

        let config = Config::new("testbot", temp.path().to_string_lossy());
        let client = Arc::new(MockClient::new());
        let limiter = Arc::new(RateLimiter::new(Arc::new(ManualClock::default())));

        let mut orchestrator =
            Orchestrator::from_config(&config, &MockFactory(client.clone()), limiter).unwrap();

        let states: Vec<(&str, bool)> = orchestrator
            .destinations()
            .iter()
            .map(|e| (e.name.as_str(), e.active))
            .collect();
        assert_eq!(states, vec![("birdsite", false), ("mastodon", true)]);

        let record = orchestrator.send("hello").await.unwrap();
        assert_eq!(record.output_records.len(), 1);
        assert!(temp.path().join("testbot-history.json").is_file());
    }

    #[tokio::test]
    async fn test_from_config_incomplete_credentials_inactive() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("credentials_birdsite")).unwrap();

        let config = Config::new("testbot", temp.path().to_string_lossy());
        let limiter = Arc::new(RateLimiter::new(Arc::new(ManualClock::default())));

        let orchestrator = Orchestrator::from_config(
            &config,
            &MockFactory(Arc::new(MockClient::new())),
            limiter,
        )
        .unwrap();

        assert!(orchestrator.destinations().iter().all(|e| !e.active));
    }
}
