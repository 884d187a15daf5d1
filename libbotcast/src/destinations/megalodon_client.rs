//! Mastodon-API network client
//!
//! Implements [`NetworkClient`] with the megalodon library, so it works with
//! Mastodon and the Fediverse servers that speak its API (Pleroma, Akkoma,
//! GoToSocial, ...).

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use megalodon::entities::{StatusVisibility, UploadMedia};
use megalodon::megalodon::{
    GetAccountStatusesInputOptions, PostStatusInputOptions, PostStatusOutput,
    SearchAccountInputOptions, UpdateMediaInputOptions, UploadMediaInputOptions,
};
use megalodon::{Megalodon, SNS};
use tracing::debug;

use crate::credentials::CredentialBundle;
use crate::destinations::client::{
    AccountRef, ListQuery, NetworkClient, PostOptions, RemoteAccount, RemotePost,
};
use crate::destinations::mastodon::{ACCESS_TOKEN, DEFAULT_INSTANCE_BASE_URL, INSTANCE_BASE_URL};
use crate::error::{ClientError, ConfigError};
use crate::types::PostId;

/// Mastodon-API client
pub struct MegalodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    /// Id of the authenticated account, looked up on first use
    own_id: Mutex<Option<String>>,
}

impl MegalodonClient {
    /// Create a client for `instance_url`
    ///
    /// A bare host name is given an `https://` scheme.
    pub fn new(instance_url: &str, access_token: &str) -> Result<Self, ConfigError> {
        let instance_url = normalize_instance_url(instance_url);

        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token.to_string()),
            None,
        )
        .map_err(|e| ConfigError::ClientSetup {
            destination: "mastodon".to_string(),
            reason: format!("{:?}", e),
        })?;

        Ok(Self {
            client,
            instance_url,
            own_id: Mutex::new(None),
        })
    }

    /// Create a client from a mastodon credential bundle
    ///
    /// Uses `INSTANCE_BASE_URL` when present, `https://mastodon.social`
    /// otherwise.
    pub fn from_credentials(credentials: &CredentialBundle) -> Result<Self, ConfigError> {
        let token = credentials.require(ACCESS_TOKEN)?;
        let instance_url = match credentials.expose(INSTANCE_BASE_URL) {
            Some(url) => url,
            None => {
                debug!("Couldn't find INSTANCE_BASE_URL, defaulting to mastodon.social.");
                DEFAULT_INSTANCE_BASE_URL
            }
        };

        Self::new(instance_url, token)
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn own_account_id(&self) -> Result<String, ClientError> {
        let cached = self
            .own_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(id) = cached {
            return Ok(id);
        }

        let response = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;
        let id = response.json.id;

        *self.own_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        Ok(id)
    }
}

fn normalize_instance_url(instance: &str) -> String {
    let instance = instance.trim().trim_end_matches('/');
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    }
}

fn remote_post(status: megalodon::entities::Status) -> RemotePost {
    RemotePost {
        id: PostId::Text(status.id),
        content: status.content,
        in_reply_to_id: status.in_reply_to_id.map(PostId::Text),
    }
}

#[async_trait]
impl NetworkClient for MegalodonClient {
    async fn verify_credentials(&self) -> Result<(), ClientError> {
        self.own_account_id().await.map(|_| ())
    }

    async fn post_status(&self, text: &str, options: &PostOptions) -> Result<PostId, ClientError> {
        let input = PostStatusInputOptions {
            media_ids: if options.media_ids.is_empty() {
                None
            } else {
                Some(options.media_ids.clone())
            },
            in_reply_to_id: options.in_reply_to_id.as_ref().map(|id| id.to_string()),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(text.to_string(), Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let id = match response.json {
            PostStatusOutput::Status(status) => status.id,
            PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(PostId::Text(id))
    }

    async fn upload_media(
        &self,
        file: &Path,
        description: Option<&str>,
    ) -> Result<String, ClientError> {
        let input = UploadMediaInputOptions {
            description: description.map(str::to_string),
            ..Default::default()
        };

        let response = self
            .client
            .upload_media(file.display().to_string(), Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        Ok(match response.json {
            UploadMedia::Attachment(attachment) => attachment.id,
            UploadMedia::AsyncAttachment(attachment) => attachment.id,
        })
    }

    async fn attach_caption(&self, media_id: &str, caption: &str) -> Result<(), ClientError> {
        let input = UpdateMediaInputOptions {
            description: Some(caption.to_string()),
            ..Default::default()
        };

        self.client
            .update_media(media_id.to_string(), Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "update media"))?;

        Ok(())
    }

    async fn list_user_posts(
        &self,
        account: &AccountRef,
        query: &ListQuery,
    ) -> Result<Vec<RemotePost>, ClientError> {
        let account_id = match account {
            AccountRef::Own => self.own_account_id().await?,
            AccountRef::Id(id) => id.clone(),
            AccountRef::Handle(handle) => {
                let accounts = self.resolve_account(handle).await?;
                accounts
                    .into_iter()
                    .find(|a| &a.username == handle)
                    .map(|a| a.id)
                    .ok_or_else(|| ClientError::new(format!("Unknown account {}", handle)))?
            }
        };

        let input = GetAccountStatusesInputOptions {
            limit: Some(u32::try_from(query.limit).unwrap_or(u32::MAX)),
            since_id: query.since_id.as_ref().map(|id| id.to_string()),
            ..Default::default()
        };

        let response = self
            .client
            .get_account_statuses(account_id, Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "list account statuses"))?;

        Ok(response.json.into_iter().map(remote_post).collect())
    }

    async fn get_post(&self, id: &PostId) -> Result<RemotePost, ClientError> {
        let response = self
            .client
            .get_status(id.to_string())
            .await
            .map_err(|e| map_megalodon_error(e, "get status"))?;

        Ok(remote_post(response.json))
    }

    async fn resolve_account(&self, handle: &str) -> Result<Vec<RemoteAccount>, ClientError> {
        let input = SearchAccountInputOptions {
            following: Some(true),
            ..Default::default()
        };

        let response = self
            .client
            .search_account(handle.to_string(), Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "search account"))?;

        Ok(response
            .json
            .into_iter()
            .map(|account| RemoteAccount {
                id: account.id,
                username: account.username,
            })
            .collect())
    }

    async fn send_direct_message(&self, handle: &str, text: &str) -> Result<(), ClientError> {
        let input = PostStatusInputOptions {
            visibility: Some(StatusVisibility::Direct),
            ..Default::default()
        };
        let mention = format!("@{} {}", handle.trim_start_matches('@'), text);

        self.client
            .post_status(mention, Some(&input))
            .await
            .map_err(|e| map_megalodon_error(e, "send direct message"))?;

        Ok(())
    }
}

/// Convert a megalodon error into a [`ClientError`]
///
/// The HTTP status, when one can be found in the error, becomes the code.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> ClientError {
    client_error(error.to_string(), context)
}

/// Wrap an upstream error message, keeping it verbatim as the details
fn client_error(error_str: String, context: &str) -> ClientError {
    let message = format!("Mastodon error ({}): {}", context, error_str);
    let error = match extract_http_status(&error_str) {
        Some(status) => ClientError::new(message).with_code(i64::from(status)),
        None => ClientError::new(message),
    };
    error.with_details(serde_json::Value::String(error_str))
}

/// Extract an HTTP status code from an error message
///
/// Looks for patterns like "HTTP 401", "status 403" or a standalone "401:".
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if !is_code {
            continue;
        }
        if let Some(code) = std::str::from_utf8(&window[..3])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            if (100..=599).contains(&code) {
                return Some(code);
            }
        }
    }

    None
}
