//! Batch replies shared by every destination
//!
//! A batch reply walks the newest posts of a target account and replies to
//! each one we have not answered yet. "Already answered" is decided by
//! listing our own posts made after the target post and checking their
//! `in_reply_to_id`s; we look at ten times the lookback window of our own
//! posts, which is a heuristic and can miss replies on very busy accounts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::destinations::client::{AccountRef, ListQuery, PostOptions};
use crate::destinations::{DestinationContext, ReplyCallback};
use crate::error::ClientError;
use crate::types::{DestinationRecord, ExtraKeys, PostId, RecordKind};

/// How many of our own posts to scan per target post, per unit of lookback
pub const OWN_POST_SCAN_FACTOR: usize = 10;

/// Reduce `@user`, `user` or `@user@instance` to `user`
pub fn normalize_handle(handle: &str) -> String {
    handle
        .trim()
        .trim_start_matches('@')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Mention for a handle as the user gave it, domain included
///
/// A bare `@user` resolves to the local account on a federated instance, so
/// `@user@instance` must stay whole.
pub fn mention(handle: &str) -> String {
    format!("@{}", handle.trim().trim_start_matches('@'))
}

/// Remove HTML tags, then decode entities
pub fn strip_html(content: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<.*?>").expect("valid regex"));
    unescape_html(&tags.replace_all(content, ""))
}

/// Decode the HTML entities social networks put in post bodies
///
/// Handles the named entities that occur in practice plus decimal and hex
/// character references. Anything unrecognized is left as written.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];

        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[1..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "hellip" => Some('\u{2026}'),
        "mdash" => Some('\u{2014}'),
        "ndash" => Some('\u{2013}'),
        "lsquo" => Some('\u{2018}'),
        "rsquo" => Some('\u{2019}'),
        "ldquo" => Some('\u{201c}'),
        "rdquo" => Some('\u{201d}'),
        _ => None,
    }
}

/// One batch reply against an already-resolved target account
pub(crate) struct BatchReply<'a> {
    pub context: &'a DestinationContext,
    pub kind: RecordKind,
    pub callback: &'a dyn ReplyCallback,
    /// Target handle as given, used for the reply mention and `in_reply_to`
    pub handle: &'a str,
    pub account: AccountRef,
    pub lookback_limit: usize,
    /// Turns a fetched post body into plain text
    pub clean: fn(&str) -> String,
}

impl BatchReply<'_> {
    pub async fn run(&self) -> Vec<DestinationRecord> {
        let ctx = self.context;

        let targets = match ctx
            .client
            .list_user_posts(
                &self.account,
                &ListQuery {
                    since_id: None,
                    limit: self.lookback_limit,
                },
            )
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                warn!(
                    bot = %ctx.bot_name,
                    destination = %ctx.name,
                    "Failed to fetch posts of {}: {}", self.handle, e
                );
                return vec![DestinationRecord::failed(self.kind, &e)];
            }
        };

        info!(
            bot = %ctx.bot_name,
            destination = %ctx.name,
            "Checking {} posts of {} for replies", targets.len(), self.handle
        );

        let mut records = Vec::new();
        for post in targets {
            if let Some(record) = self.reply_once(&post.id).await {
                records.push(record);
            }
        }
        records
    }

    /// Reply to `post_id` unless we already have; `None` means skipped
    async fn reply_once(&self, post_id: &PostId) -> Option<DestinationRecord> {
        let ctx = self.context;

        let replied = match self.replied_ids(post_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    bot = %ctx.bot_name,
                    destination = %ctx.name,
                    "Failed to list own posts after {}: {}", post_id, e
                );
                return Some(
                    DestinationRecord::failed(self.kind, &e)
                        .replying_to(self.mention(), post_id.clone()),
                );
            }
        };

        if replied.contains(&post_id.to_string()) {
            debug!(
                bot = %ctx.bot_name,
                destination = %ctx.name,
                "Already replied to {}, skipping", post_id
            );
            return None;
        }

        let post = match ctx.client.get_post(post_id).await {
            Ok(post) => post,
            Err(e) => {
                return Some(
                    DestinationRecord::failed(self.kind, &e)
                        .replying_to(self.mention(), post_id.clone()),
                )
            }
        };

        let text = (self.clean)(&post.content);
        let reply = format!(
            "{} {}",
            self.mention(),
            self.callback.reply(post_id, &text, &ExtraKeys::new())
        );

        info!(
            bot = %ctx.bot_name,
            destination = %ctx.name,
            "Replying to {} of {}", post_id, self.handle
        );

        let record = match ctx
            .post(&reply, &PostOptions::reply_to(post_id.clone()))
            .await
        {
            Ok(id) => DestinationRecord::posted(self.kind, id, reply),
            Err(e) => {
                warn!(
                    bot = %ctx.bot_name,
                    destination = %ctx.name,
                    "Failed to reply to {}: {}", post_id, e
                );
                DestinationRecord::failed(self.kind, &e).with_text(reply)
            }
        };

        Some(record.replying_to(self.mention(), post_id.clone()))
    }

    fn mention(&self) -> String {
        mention(self.handle)
    }

    /// Ids of target posts our own recent posts reply to
    ///
    /// Compared as strings since a network may report the same id as a number
    /// in one place and a string in another.
    async fn replied_ids(&self, since: &PostId) -> Result<HashSet<String>, ClientError> {
        let own = self
            .context
            .client
            .list_user_posts(
                &AccountRef::Own,
                &ListQuery {
                    since_id: Some(since.clone()),
                    limit: self.lookback_limit * OWN_POST_SCAN_FACTOR,
                },
            )
            .await?;

        Ok(own
            .into_iter()
            .filter_map(|post| post.in_reply_to_id)
            .map(|id| id.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@user"), "user");
        assert_eq!(normalize_handle("user"), "user");
        assert_eq!(normalize_handle("@user@mastodon.social"), "user");
        assert_eq!(normalize_handle(" @user "), "user");
    }

    #[test]
    fn test_mention_keeps_instance() {
        assert_eq!(mention("@user@mastodon.social"), "@user@mastodon.social");
        assert_eq!(mention(" user "), "@user");
        assert_eq!(mention("@user"), "@user");
    }

    #[test]
    fn test_unescape_named_and_numeric_entities() {
        assert_eq!(unescape_html("Fish &amp; chips"), "Fish & chips");
        assert_eq!(unescape_html("&lt;3 &quot;hi&quot;"), "<3 \"hi\"");
        assert_eq!(unescape_html("it&#39;s"), "it's");
        assert_eq!(unescape_html("&#x1F600;"), "\u{1F600}");
    }

    #[test]
    fn test_unescape_leaves_unknown_entities() {
        assert_eq!(unescape_html("AT&T"), "AT&T");
        assert_eq!(unescape_html("&bogus; & more"), "&bogus; & more");
    }

    #[test]
    fn test_strip_html() {
        let content = r#"<p><span class="h-card"><a href="https://x/@bot">@<span>bot</span></a></span> is it &quot;good&quot;?</p>"#;
        assert_eq!(strip_html(content), "@bot is it \"good\"?");
    }
}
