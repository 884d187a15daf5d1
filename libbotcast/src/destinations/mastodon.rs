//! Mastodon destination
//!
//! Posts to any instance speaking the Mastodon API. Records are tagged
//! `TootRecord`. Captions travel with the upload as the media description.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::destinations::batch::{normalize_handle, strip_html, BatchReply};
use crate::destinations::client::{AccountRef, PostOptions};
use crate::destinations::{
    pad_captions, Destination, DestinationContext, DestinationKind, ReplyCallback,
};
use crate::error::ClientError;
use crate::types::{DestinationRecord, PostId, RecordKind};

pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
pub const INSTANCE_BASE_URL: &str = "INSTANCE_BASE_URL";

pub const DEFAULT_INSTANCE_BASE_URL: &str = "https://mastodon.social";

pub const REQUIRED_CREDENTIALS: [&str; 1] = [ACCESS_TOKEN];
pub const OPTIONAL_CREDENTIALS: [&str; 1] = [INSTANCE_BASE_URL];

pub struct MastodonDestination {
    context: DestinationContext,
}

impl MastodonDestination {
    pub fn new(context: DestinationContext) -> Self {
        Self { context }
    }

    fn failure(&self, message: &str, e: &ClientError) -> DestinationRecord {
        error!(
            bot = %self.context.bot_name,
            destination = %self.context.name,
            "{}: {}", message, e
        );
        DestinationRecord::failed(RecordKind::TootRecord, e)
    }

    /// Account id whose username is exactly `handle`
    ///
    /// Account search also matches accounts that merely mention the handle,
    /// so results are filtered on the username.
    async fn resolve_target(&self, query: &str, handle: &str) -> Result<String, ClientError> {
        let candidates = self.context.client.resolve_account(query).await?;
        candidates
            .into_iter()
            .find(|account| account.username == handle)
            .map(|account| account.id)
            .ok_or_else(|| ClientError::new(format!("Could not find target handle {}", query)))
    }
}

#[async_trait]
impl Destination for MastodonDestination {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Mastodon
    }

    async fn send(&self, text: &str) -> Vec<DestinationRecord> {
        let record = match self.context.post(text, &PostOptions::default()).await {
            Ok(id) => {
                info!(
                    bot = %self.context.bot_name,
                    destination = %self.context.name,
                    "Posted toot {}", id
                );
                DestinationRecord::posted(RecordKind::TootRecord, id, text)
            }
            Err(e) => self
                .failure(&format!("Failed to post {:?} without media", text), &e)
                .with_text(text),
        };
        vec![record]
    }

    async fn send_with_media(
        &self,
        text: &str,
        files: &[PathBuf],
        captions: &[String],
    ) -> Vec<DestinationRecord> {
        let captions = pad_captions(files, captions);
        let file_names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();

        debug!(
            bot = %self.context.bot_name,
            destination = %self.context.name,
            "Uploading files {:?}", file_names
        );

        let mut media_ids = Vec::with_capacity(files.len());
        for (file, caption) in files.iter().zip(&captions) {
            match self.context.client.upload_media(file, Some(caption.as_str())).await {
                Ok(id) => media_ids.push(id),
                Err(e) => {
                    let record = self
                        .failure(&format!("Failed to upload {:?}", file_names), &e)
                        .with_text(text)
                        .with_media(file_names, Vec::new(), captions.clone());
                    return vec![record];
                }
            }
        }

        let echo: Vec<PostId> = media_ids.iter().cloned().map(PostId::from).collect();
        let record = match self
            .context
            .post(text, &PostOptions::with_media(media_ids))
            .await
        {
            Ok(id) => DestinationRecord::posted(RecordKind::TootRecord, id, text),
            Err(e) => self
                .failure(&format!("Failed to post {:?} with media {:?}", text, echo), &e)
                .with_text(text),
        };

        vec![record.with_media(file_names, echo, captions)]
    }

    async fn perform_batch_reply(
        &self,
        callback: &dyn ReplyCallback,
        target_handle: &str,
        lookback_limit: usize,
    ) -> Vec<DestinationRecord> {
        info!(
            bot = %self.context.bot_name,
            destination = %self.context.name,
            "Attempting to batch reply to mastodon user {}", target_handle
        );

        if let Err(e) = self.context.client.verify_credentials().await {
            return vec![self.failure("Batch reply credential check failed", &e)];
        }

        let handle = normalize_handle(target_handle);
        let account_id = match self.resolve_target(target_handle.trim(), &handle).await {
            Ok(id) => id,
            Err(e) => return vec![self.failure("Batch reply target lookup failed", &e)],
        };

        BatchReply {
            context: &self.context,
            kind: RecordKind::TootRecord,
            callback,
            handle: target_handle,
            account: AccountRef::Id(account_id),
            lookback_limit,
            clean: strip_html,
        }
        .run()
        .await
    }
}
