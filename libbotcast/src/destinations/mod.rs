//! Posting destinations
//!
//! A destination is one social network account a bot posts to. Every
//! destination implements [`Destination`]; the set of kinds is fixed
//! ([`DestinationKind`]) and chosen at startup from the credential directories
//! present under the bot's secrets directory.
//!
//! Destinations never fail a call: network errors are captured as failure
//! records so that one broken destination cannot block the others.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libbotcast::destinations::{mock::MockClient, Destination, DestinationKind};
//! use libbotcast::credentials::CredentialBundle;
//! use libbotcast::rate_limiter::RateLimiter;
//!
//! # async fn example() -> libbotcast::error::Result<()> {
//! let credentials = CredentialBundle::load(
//!     "mastodon",
//!     std::path::Path::new("secrets/credentials_mastodon"),
//!     DestinationKind::Mastodon.required_credentials(),
//!     DestinationKind::Mastodon.optional_credentials(),
//! )?;
//!
//! let destination = DestinationKind::Mastodon.initialize(
//!     &credentials,
//!     "examplebot",
//!     Arc::new(MockClient::new()),
//!     Arc::new(RateLimiter::system()),
//!     300,
//! )?;
//!
//! let records = destination.send("Hello from botcast").await;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::{credentials_dir, CredentialBundle};
use crate::error::{ClientError, ConfigError};
use crate::rate_limiter::RateLimiter;
use crate::types::{DestinationRecord, ExtraKeys, PostId, RecordKind};

pub mod batch;
pub mod birdsite;
pub mod client;
pub mod mastodon;
pub mod megalodon_client;

// Available for all builds (not just tests) to support integration tests and dry runs
pub mod mock;

pub use birdsite::BirdsiteDestination;
pub use client::{ClientFactory, DefaultClientFactory, NetworkClient};
pub use mastodon::MastodonDestination;

/// Produces the reply text for one post during a batch reply
///
/// Receives the post id, the post's plain text, and a metadata map (currently
/// always empty). Any `Fn(&PostId, &str, &ExtraKeys) -> String` closure
/// implements it.
pub trait ReplyCallback: Send + Sync {
    fn reply(&self, post_id: &PostId, text: &str, extra: &ExtraKeys) -> String;
}

impl<F> ReplyCallback for F
where
    F: Fn(&PostId, &str, &ExtraKeys) -> String + Send + Sync,
{
    fn reply(&self, post_id: &PostId, text: &str, extra: &ExtraKeys) -> String {
        self(post_id, text, extra)
    }
}

/// One account on one social network
#[async_trait]
pub trait Destination: Send + Sync {
    /// Name the destination is registered and recorded under
    fn name(&self) -> &str;

    fn kind(&self) -> DestinationKind;

    /// Post plain text
    ///
    /// Returns a single success or failure record.
    async fn send(&self, text: &str) -> Vec<DestinationRecord>;

    /// Post text with attached media
    ///
    /// Every file is uploaded before posting. If any upload fails the result
    /// is a single failure record and nothing is posted. Missing captions are
    /// replaced by [`crate::types::DEFAULT_CAPTION`]; extra captions are
    /// ignored.
    async fn send_with_media(
        &self,
        text: &str,
        files: &[PathBuf],
        captions: &[String],
    ) -> Vec<DestinationRecord>;

    /// Reply once to each of the target's most recent posts
    ///
    /// Looks at the newest `lookback_limit` posts of `target_handle` and replies
    /// to those this account has not already replied to, using `callback` to
    /// produce each reply.
    async fn perform_batch_reply(
        &self,
        callback: &dyn ReplyCallback,
        target_handle: &str,
        lookback_limit: usize,
    ) -> Vec<DestinationRecord>;
}

/// Supported destination kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Birdsite,
    Mastodon,
}

impl DestinationKind {
    /// Registration order used by the orchestrator
    pub const ALL: [DestinationKind; 2] = [DestinationKind::Birdsite, DestinationKind::Mastodon];

    pub fn name(&self) -> &'static str {
        match self {
            DestinationKind::Birdsite => "birdsite",
            DestinationKind::Mastodon => "mastodon",
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            DestinationKind::Birdsite => RecordKind::TweetRecord,
            DestinationKind::Mastodon => RecordKind::TootRecord,
        }
    }

    pub fn required_credentials(&self) -> &'static [&'static str] {
        match self {
            DestinationKind::Birdsite => &birdsite::REQUIRED_CREDENTIALS,
            DestinationKind::Mastodon => &mastodon::REQUIRED_CREDENTIALS,
        }
    }

    pub fn optional_credentials(&self) -> &'static [&'static str] {
        match self {
            DestinationKind::Birdsite => &birdsite::OPTIONAL_CREDENTIALS,
            DestinationKind::Mastodon => &mastodon::OPTIONAL_CREDENTIALS,
        }
    }

    /// Credential directory for this kind, if it is configured
    ///
    /// Birdsite also accepts its credential files directly in `secrets_dir`,
    /// the layout used before other destinations existed.
    pub fn locate_credentials(&self, secrets_dir: &Path) -> Option<PathBuf> {
        let dir = credentials_dir(secrets_dir, self.name());
        if dir.is_dir() {
            return Some(dir);
        }

        match self {
            DestinationKind::Birdsite if secrets_dir.join("CONSUMER_KEY").is_file() => {
                Some(secrets_dir.to_path_buf())
            }
            _ => None,
        }
    }

    /// Load this kind's credentials from `dir`
    pub fn load_credentials(&self, dir: &Path) -> Result<CredentialBundle, ConfigError> {
        CredentialBundle::load(
            self.name(),
            dir,
            self.required_credentials(),
            self.optional_credentials(),
        )
    }

    /// Build a destination of this kind
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` if `credentials` lacks a
    /// required value.
    pub fn initialize(
        &self,
        credentials: &CredentialBundle,
        bot_name: &str,
        client: Arc<dyn NetworkClient>,
        limiter: Arc<RateLimiter>,
        max_per_hour: u32,
    ) -> Result<Box<dyn Destination>, ConfigError> {
        for key in self.required_credentials() {
            credentials.require(key)?;
        }

        let context = DestinationContext {
            name: self.name().to_string(),
            bot_name: bot_name.to_string(),
            client,
            limiter,
            max_per_hour,
        };

        let destination: Box<dyn Destination> = match self {
            DestinationKind::Birdsite => Box::new(BirdsiteDestination::new(
                context,
                credentials.expose(birdsite::OWNER_HANDLE).map(str::to_string),
            )),
            DestinationKind::Mastodon => Box::new(MastodonDestination::new(context)),
        };
        Ok(destination)
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DestinationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "birdsite" => Ok(DestinationKind::Birdsite),
            "mastodon" => Ok(DestinationKind::Mastodon),
            _ => Err(format!(
                "Unknown destination '{}'. Valid destinations: birdsite, mastodon",
                s
            )),
        }
    }
}

/// What every destination needs to reach its network
pub struct DestinationContext {
    pub name: String,
    pub bot_name: String,
    pub client: Arc<dyn NetworkClient>,
    pub limiter: Arc<RateLimiter>,
    /// Posting limit for this destination
    pub max_per_hour: u32,
}

impl DestinationContext {
    /// Publish a status through the rate limiter
    ///
    /// A post the network acknowledges without an id counts as failed.
    pub async fn post(
        &self,
        text: &str,
        options: &client::PostOptions,
    ) -> Result<PostId, ClientError> {
        let key = RateLimiter::key("post_status", &[&self.name, &self.bot_name]);
        let id = self
            .limiter
            .run(&key, self.max_per_hour, self.client.post_status(text, options))
            .await?;

        if id.is_empty() {
            return Err(ClientError::new("network returned an empty post id"));
        }
        Ok(id)
    }
}

impl fmt::Debug for DestinationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationContext")
            .field("name", &self.name)
            .field("bot_name", &self.bot_name)
            .field("max_per_hour", &self.max_per_hour)
            .finish_non_exhaustive()
    }
}

/// Pair each file with its caption, padding with the default caption
pub(crate) fn pad_captions(files: &[PathBuf], captions: &[String]) -> Vec<String> {
    (0..files.len())
        .map(|i| {
            captions
                .get(i)
                .cloned()
                .unwrap_or_else(|| crate::types::DEFAULT_CAPTION.to_string())
        })
        .collect()
}
