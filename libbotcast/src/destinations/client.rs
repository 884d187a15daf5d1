//! Network client abstraction
//!
//! Destinations never talk HTTP themselves. Every call to a social network goes
//! through a [`NetworkClient`], so a destination can be driven by a real API
//! client ([`super::megalodon_client::MegalodonClient`]) or by
//! [`super::mock::MockClient`] in tests and dry runs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::CredentialBundle;
use crate::destinations::DestinationKind;
use crate::error::{ClientError, ConfigError};
use crate::types::PostId;

/// Options for publishing a status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostOptions {
    /// Previously uploaded media to attach
    pub media_ids: Vec<String>,

    /// Post this status as a reply to the given post
    pub in_reply_to_id: Option<PostId>,
}

impl PostOptions {
    pub fn with_media(media_ids: Vec<String>) -> Self {
        Self {
            media_ids,
            in_reply_to_id: None,
        }
    }

    pub fn reply_to(post: PostId) -> Self {
        Self {
            media_ids: Vec::new(),
            in_reply_to_id: Some(post),
        }
    }
}

/// Whose posts to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    /// The authenticated account
    Own,
    /// An account id as returned by [`NetworkClient::resolve_account`]
    Id(String),
    /// A bare screen name, for networks that address accounts by handle
    Handle(String),
}

/// Paging for [`NetworkClient::list_user_posts`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Only return posts newer than this one
    pub since_id: Option<PostId>,
    pub limit: usize,
}

/// A post as seen on the network
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePost {
    pub id: PostId,
    /// Body as delivered by the network, possibly HTML
    pub content: String,
    pub in_reply_to_id: Option<PostId>,
}

impl RemotePost {
    pub fn new(id: impl Into<PostId>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            in_reply_to_id: None,
        }
    }

    pub fn replying_to(mut self, id: impl Into<PostId>) -> Self {
        self.in_reply_to_id = Some(id.into());
        self
    }
}

/// An account as returned by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccount {
    pub id: String,
    pub username: String,
}

/// Calls a destination makes against its social network
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Check that the stored credentials are accepted
    async fn verify_credentials(&self) -> Result<(), ClientError>;

    /// Publish a status and return its id
    async fn post_status(&self, text: &str, options: &PostOptions) -> Result<PostId, ClientError>;

    /// Upload one media file and return its media id
    ///
    /// Networks that accept alt text at upload time use `description`; others
    /// ignore it and rely on [`NetworkClient::attach_caption`].
    async fn upload_media(
        &self,
        file: &Path,
        description: Option<&str>,
    ) -> Result<String, ClientError>;

    /// Attach alt text to an uploaded media item
    async fn attach_caption(&self, media_id: &str, caption: &str) -> Result<(), ClientError>;

    /// Newest-first posts of an account
    async fn list_user_posts(
        &self,
        account: &AccountRef,
        query: &ListQuery,
    ) -> Result<Vec<RemotePost>, ClientError>;

    /// Fetch one post with its full text
    async fn get_post(&self, id: &PostId) -> Result<RemotePost, ClientError>;

    /// Search for accounts matching `handle`
    async fn resolve_account(&self, handle: &str) -> Result<Vec<RemoteAccount>, ClientError>;

    /// Send a private message to `handle`
    async fn send_direct_message(&self, handle: &str, text: &str) -> Result<(), ClientError> {
        let _ = (handle, text);
        Err(ClientError::new(
            "Direct messages are not supported by this client",
        ))
    }
}

/// Builds the network client a destination will use
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        kind: DestinationKind,
        credentials: &CredentialBundle,
    ) -> Result<Arc<dyn NetworkClient>, ConfigError>;
}

/// Factory for the clients bundled with this crate
///
/// Mastodon-API instances get a [`super::megalodon_client::MegalodonClient`]. There
/// is no bundled birdsite client; inject a custom factory to use one.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

impl ClientFactory for DefaultClientFactory {
    fn create(
        &self,
        kind: DestinationKind,
        credentials: &CredentialBundle,
    ) -> Result<Arc<dyn NetworkClient>, ConfigError> {
        match kind {
            DestinationKind::Mastodon => {
                let client =
                    super::megalodon_client::MegalodonClient::from_credentials(credentials)?;
                Ok(Arc::new(client))
            }
            DestinationKind::Birdsite => Err(ConfigError::NoClient(kind.name().to_string())),
        }
    }
}
