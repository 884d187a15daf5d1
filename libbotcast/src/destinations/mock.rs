//! In-memory network client
//!
//! `MockClient` simulates a social network well enough to drive destinations
//! through posting, media upload and batch replies. It records every call so
//! tests can assert on what a destination did, and can be told to fail any
//! operation. It is compiled for all builds so integration tests and dry runs
//! can use it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::destinations::client::{
    AccountRef, ListQuery, NetworkClient, PostOptions, RemoteAccount, RemotePost,
};
use crate::error::ClientError;
use crate::types::PostId;

/// Operations a [`MockClient`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    VerifyCredentials,
    PostStatus,
    UploadMedia,
    AttachCaption,
    /// `list_user_posts` for another account
    ListUserPosts,
    /// `list_user_posts` for [`AccountRef::Own`]
    ListOwnPosts,
    GetPost,
    ResolveAccount,
    SendDirectMessage,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockOperation>,
    failures: HashMap<MockOperation, ClientError>,
    accounts: Vec<RemoteAccount>,
    /// Newest first
    target_posts: Vec<RemotePost>,
    /// Newest first; successful posts are prepended
    own_posts: Vec<RemotePost>,
    posted: Vec<(String, PostOptions)>,
    uploads: Vec<(PathBuf, Option<String>)>,
    captions: Vec<(String, String)>,
    direct_messages: Vec<(String, String)>,
    next_id: u64,
    /// `post_status` succeeds but reports an empty id
    empty_ids: bool,
}

/// Scriptable [`NetworkClient`]
#[derive(Debug)]
pub struct MockClient {
    state: Mutex<MockState>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// A client on which every operation succeeds
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    /// Make `username` discoverable through `resolve_account`
    pub fn with_account(self, id: &str, username: &str) -> Self {
        self.state().accounts.push(RemoteAccount {
            id: id.to_string(),
            username: username.to_string(),
        });
        self
    }

    /// Posts returned when listing any account other than our own, newest first
    pub fn with_posts(self, posts: Vec<RemotePost>) -> Self {
        self.state().target_posts = posts;
        self
    }

    /// Posts already made by the authenticated account, newest first
    pub fn with_own_posts(self, posts: Vec<RemotePost>) -> Self {
        self.state().own_posts = posts;
        self
    }

    /// Fail every call of `operation` with `error`
    pub fn failing(self, operation: MockOperation, error: ClientError) -> Self {
        self.state().failures.insert(operation, error);
        self
    }

    /// Report an empty id for every post, as a misbehaving server might
    pub fn with_empty_ids(self) -> Self {
        self.state().empty_ids = true;
        self
    }

    /// Total number of calls made
    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of calls made of one operation
    pub fn calls_of(&self, operation: MockOperation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    /// Every successfully posted status with its options
    pub fn posted(&self) -> Vec<(String, PostOptions)> {
        self.state().posted.clone()
    }

    /// Every successful upload with the description it carried
    pub fn uploads(&self) -> Vec<(PathBuf, Option<String>)> {
        self.state().uploads.clone()
    }

    /// Every caption attached after upload, as `(media_id, caption)`
    pub fn captions(&self) -> Vec<(String, String)> {
        self.state().captions.clone()
    }

    /// Every direct message sent, as `(handle, text)`
    pub fn direct_messages(&self) -> Vec<(String, String)> {
        self.state().direct_messages.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log the call, then return the configured failure if there is one
    fn enter(&self, operation: MockOperation) -> Result<MutexGuard<'_, MockState>, ClientError> {
        let mut state = self.state();
        state.calls.push(operation);
        match state.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(state),
        }
    }
}

/// Order ids numerically when both are numeric, lexically otherwise
fn compare_ids(a: &PostId, b: &PostId) -> Ordering {
    fn as_number(id: &PostId) -> Option<i64> {
        match id {
            PostId::Number(n) => Some(*n),
            PostId::Text(s) => s.parse().ok(),
        }
    }

    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn page(posts: &[RemotePost], query: &ListQuery) -> Vec<RemotePost> {
    posts
        .iter()
        .filter(|post| match &query.since_id {
            Some(since) => compare_ids(&post.id, since) == Ordering::Greater,
            None => true,
        })
        .take(query.limit)
        .cloned()
        .collect()
}

#[async_trait]
impl NetworkClient for MockClient {
    async fn verify_credentials(&self) -> Result<(), ClientError> {
        let _state = self.enter(MockOperation::VerifyCredentials)?;
        Ok(())
    }

    async fn post_status(&self, text: &str, options: &PostOptions) -> Result<PostId, ClientError> {
        let mut state = self.enter(MockOperation::PostStatus)?;

        state.next_id += 1;
        let id = if state.empty_ids {
            PostId::Text(String::new())
        } else {
            PostId::Text(state.next_id.to_string())
        };

        state.posted.push((text.to_string(), options.clone()));
        state.own_posts.insert(
            0,
            RemotePost {
                id: id.clone(),
                content: text.to_string(),
                in_reply_to_id: options.in_reply_to_id.clone(),
            },
        );

        Ok(id)
    }

    async fn upload_media(
        &self,
        file: &Path,
        description: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut state = self.enter(MockOperation::UploadMedia)?;

        state.next_id += 1;
        let media_id = format!("media-{}", state.next_id);
        state
            .uploads
            .push((file.to_path_buf(), description.map(str::to_string)));

        Ok(media_id)
    }

    async fn attach_caption(&self, media_id: &str, caption: &str) -> Result<(), ClientError> {
        let mut state = self.enter(MockOperation::AttachCaption)?;
        state
            .captions
            .push((media_id.to_string(), caption.to_string()));
        Ok(())
    }

    async fn list_user_posts(
        &self,
        account: &AccountRef,
        query: &ListQuery,
    ) -> Result<Vec<RemotePost>, ClientError> {
        match account {
            AccountRef::Own => {
                let state = self.enter(MockOperation::ListOwnPosts)?;
                Ok(page(&state.own_posts, query))
            }
            AccountRef::Id(_) | AccountRef::Handle(_) => {
                let state = self.enter(MockOperation::ListUserPosts)?;
                Ok(page(&state.target_posts, query))
            }
        }
    }

    async fn get_post(&self, id: &PostId) -> Result<RemotePost, ClientError> {
        let state = self.enter(MockOperation::GetPost)?;
        state
            .target_posts
            .iter()
            .chain(state.own_posts.iter())
            .find(|post| &post.id == id)
            .cloned()
            .ok_or_else(|| ClientError::new(format!("Record not found: {}", id)).with_code(404))
    }

    async fn resolve_account(&self, handle: &str) -> Result<Vec<RemoteAccount>, ClientError> {
        let state = self.enter(MockOperation::ResolveAccount)?;
        // `@user@domain` searches match on `user`, like a server-side search
        let needle = handle
            .trim_start_matches('@')
            .split('@')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        Ok(state
            .accounts
            .iter()
            .filter(|account| account.username.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn send_direct_message(&self, handle: &str, text: &str) -> Result<(), ClientError> {
        let mut state = self.enter(MockOperation::SendDirectMessage)?;
        state
            .direct_messages
            .push((handle.to_string(), text.to_string()));
        Ok(())
    }
}
