//! Birdsite destination
//!
//! The original destination of the framework. Records are tagged
//! `TweetRecord`, and captions are attached to media after upload.
//!
//! Failures are checked against a table of handled error codes. A failure
//! with no handler is reported to the bot's owner by direct message when an
//! `OWNER_HANDLE` credential is present.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::destinations::batch::{normalize_handle, unescape_html, BatchReply};
use crate::destinations::client::{AccountRef, PostOptions};
use crate::destinations::{
    pad_captions, Destination, DestinationContext, DestinationKind, ReplyCallback,
};
use crate::error::ClientError;
use crate::types::{DestinationRecord, PostId, RecordKind};

pub const CONSUMER_KEY: &str = "CONSUMER_KEY";
pub const CONSUMER_SECRET: &str = "CONSUMER_SECRET";
pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
pub const ACCESS_SECRET: &str = "ACCESS_SECRET";
pub const OWNER_HANDLE: &str = "OWNER_HANDLE";

pub const REQUIRED_CREDENTIALS: [&str; 4] =
    [CONSUMER_KEY, CONSUMER_SECRET, ACCESS_TOKEN, ACCESS_SECRET];
pub const OPTIONAL_CREDENTIALS: [&str; 1] = [OWNER_HANDLE];

/// Error code birdsite returns for a duplicate status
pub const DUPLICATE_STATUS: i64 = 187;

/// Reaction to a known error code
pub type ErrorHandler = Box<dyn Fn(&ClientError) + Send + Sync>;

fn default_duplicate_handler() -> ErrorHandler {
    Box::new(|_| info!("Duplicate handler: who cares about duplicate statuses."))
}

pub struct BirdsiteDestination {
    context: DestinationContext,
    owner_handle: Option<String>,
    handled_errors: HashMap<i64, ErrorHandler>,
}

impl BirdsiteDestination {
    pub fn new(context: DestinationContext, owner_handle: Option<String>) -> Self {
        if owner_handle.is_none() {
            debug!("No OWNER_HANDLE for {}, unable to DM", context.bot_name);
        }

        let mut handled_errors = HashMap::new();
        handled_errors.insert(DUPLICATE_STATUS, default_duplicate_handler());

        Self {
            context,
            owner_handle,
            handled_errors,
        }
    }

    /// Replace the reaction to duplicate-status errors
    pub fn set_duplicate_handler(&mut self, handler: ErrorHandler) {
        self.set_error_handler(DUPLICATE_STATUS, handler);
    }

    /// Handle errors with `code` with `handler` instead of an SOS message
    pub fn set_error_handler(&mut self, code: i64, handler: ErrorHandler) {
        self.handled_errors.insert(code, handler);
    }

    /// Log `e`, run its handler or send an SOS, and record it
    async fn handle_error(&self, message: String, e: &ClientError) -> DestinationRecord {
        error!(
            bot = %self.context.bot_name,
            destination = %self.context.name,
            "Got an error! {}", e
        );
        self.dispatch(message, e).await;
        DestinationRecord::failed(RecordKind::TweetRecord, e)
    }

    async fn dispatch(&self, message: String, e: &ClientError) {
        match e.code.and_then(|code| self.handled_errors.get(&code)) {
            Some(handler) => handler(e),
            None => self.send_dm_sos(&message).await,
        }
    }

    /// Tell the owner something went wrong
    async fn send_dm_sos(&self, message: &str) {
        let Some(owner) = &self.owner_handle else {
            error!(
                bot = %self.context.bot_name,
                "Can't send DM SOS, no owner handle."
            );
            return;
        };

        if let Err(de) = self.context.client.send_direct_message(owner, message).await {
            error!(
                bot = %self.context.bot_name,
                "Error trying to send DM about error!: {}", de
            );
        }
    }
}

#[async_trait]
impl Destination for BirdsiteDestination {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Birdsite
    }

    async fn send(&self, text: &str) -> Vec<DestinationRecord> {
        let record = match self.context.post(text, &PostOptions::default()).await {
            Ok(id) => {
                info!(
                    bot = %self.context.bot_name,
                    destination = %self.context.name,
                    "Posted tweet {}", id
                );
                DestinationRecord::posted(RecordKind::TweetRecord, id, text)
            }
            Err(e) => {
                let message = format!(
                    "Bot {} encountered an error when sending post {} without media:\n{}\n",
                    self.context.bot_name, text, e
                );
                self.handle_error(message, &e).await.with_text(text)
            }
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
        for file in files {
            match self.context.client.upload_media(file, None).await {
                Ok(id) => media_ids.push(id),
                Err(e) => {
                    let message = format!(
                        "Bot {} encountered an error when uploading {:?}:\n{}\n",
                        self.context.bot_name, file_names, e
                    );
                    let record = self
                        .handle_error(message, &e)
                        .await
                        .with_text(text)
                        .with_media(file_names, Vec::new(), captions);
                    return vec![record];
                }
            }
        }

        for (media_id, caption) in media_ids.iter().zip(&captions) {
            if let Err(e) = self.context.client.attach_caption(media_id, caption).await {
                warn!(
                    bot = %self.context.bot_name,
                    destination = %self.context.name,
                    "Failed to attach caption to {}: {}", media_id, e
                );
            }
        }

        let echo: Vec<PostId> = media_ids.iter().cloned().map(PostId::from).collect();
        let record = match self
            .context
            .post(text, &PostOptions::with_media(media_ids))
            .await
        {
            Ok(id) => DestinationRecord::posted(RecordKind::TweetRecord, id, text),
            Err(e) => {
                let message = format!(
                    "Bot {} encountered an error when sending post {} with media ids {:?}:\n{}\n",
                    self.context.bot_name, text, echo, e
                );
                self.handle_error(message, &e).await.with_text(text)
            }
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
            "Attempting to batch reply to birdsite user {}", target_handle
        );

        let handle = normalize_handle(target_handle);
        let records = BatchReply {
            context: &self.context,
            kind: RecordKind::TweetRecord,
            callback,
            handle: target_handle,
            account: AccountRef::Handle(handle),
            lookback_limit,
            clean: unescape_html,
        }
        .run()
        .await;

        for record in records.iter().filter(|r| r.is_failure()) {
            let e = ClientError {
                code: record.error_code,
                message: record.error_message.clone().unwrap_or_default(),
                details: None,
            };
            let message = format!(
                "Bot {} encountered an error during a batch reply to {}:\n{}\n",
                self.context.bot_name, target_handle, e
            );
            self.dispatch(message, &e).await;
        }

        records
    }
}
