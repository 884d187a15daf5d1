//! Core record types for Botcast
//!
//! These types are persisted verbatim in the history file, so their field
//! names follow the on-disk format rather than Rust naming.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Caller-supplied metadata attached to iteration records
pub type ExtraKeys = BTreeMap<String, Value>;

/// `_type` tag carried by every iteration record
pub const ITERATION_RECORD_TYPE: &str = "IterationRecord";

/// Destination that owned the history file before multi-destination support
pub const LEGACY_DESTINATION: &str = "birdsite";

/// Alt text used for uploaded media without a caption
pub const DEFAULT_CAPTION: &str = "No caption provided for image.";

/// Version string stamped on newly created iteration records
pub const RECORD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current local time in the ISO-8601 form used throughout the history file
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// Destination-assigned identifier
///
/// Older destinations hand out numeric ids, newer ones opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostId {
    Number(i64),
    Text(String),
}

impl PostId {
    pub fn is_empty(&self) -> bool {
        matches!(self, PostId::Text(s) if s.is_empty())
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Number(n) => write!(f, "{}", n),
            PostId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        PostId::Text(s.to_string())
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        PostId::Text(s)
    }
}

impl From<i64> for PostId {
    fn from(n: i64) -> Self {
        PostId::Number(n)
    }
}

/// Which destination produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    TweetRecord,
    TootRecord,
}

impl RecordKind {
    /// Destination-specific alias of `id` written alongside it
    pub fn native_id_key(&self) -> &'static str {
        match self {
            RecordKind::TweetRecord => "tweet_id",
            RecordKind::TootRecord => "toot_id",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::TweetRecord => write!(f, "TweetRecord"),
            RecordKind::TootRecord => write!(f, "TootRecord"),
        }
    }
}

/// Outcome of one attempt against one destination
///
/// A record is either a success (non-empty `id`, no `error`) or a failure
/// (`error` set). Use [`DestinationRecord::posted`] and
/// [`DestinationRecord::failed`] to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    #[serde(rename = "_type")]
    pub kind: RecordKind,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub id: Option<PostId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub media_ids: Vec<PostId>,
    #[serde(default)]
    pub captions: Vec<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub in_reply_to_id: Option<PostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Keys this build does not model, kept so rewrites are lossless
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DestinationRecord {
    fn blank(kind: RecordKind) -> Self {
        Self {
            kind,
            timestamp: Some(now_timestamp()),
            id: None,
            text: None,
            files: Vec::new(),
            media_ids: Vec::new(),
            captions: Vec::new(),
            in_reply_to: None,
            in_reply_to_id: None,
            error: None,
            error_code: None,
            error_message: None,
            extra: BTreeMap::new(),
        }
    }

    /// Record a successful post
    ///
    /// An empty id makes this a failure record carrying `text`.
    pub fn posted(kind: RecordKind, id: PostId, text: impl Into<String>) -> Self {
        if id.is_empty() {
            return Self::failed(kind, &ClientError::new("network returned an empty post id"))
                .with_text(text);
        }

        let mut record = Self::blank(kind);
        let alias = serde_json::to_value(&id).unwrap_or(Value::Null);
        record.extra.insert(kind.native_id_key().to_string(), alias);
        record.id = Some(id);
        record.text = Some(text.into());
        record
    }

    /// Record a failed attempt
    pub fn failed(kind: RecordKind, error: &ClientError) -> Self {
        let mut record = Self::blank(kind);
        record.error = Some(error.serialized());
        record.error_code = error.code;
        record.error_message = Some(error.message.clone());
        record
    }

    /// Keep the text that was attempted on a failed record
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attach the media echo of a post with uploads
    pub fn with_media(
        mut self,
        files: Vec<String>,
        media_ids: Vec<PostId>,
        captions: Vec<String>,
    ) -> Self {
        self.files = files;
        self.media_ids = media_ids;
        self.captions = captions;
        self
    }

    /// Mark the record as a reply
    pub fn replying_to(mut self, handle: impl Into<String>, post: PostId) -> Self {
        self.in_reply_to = Some(handle.into());
        self.in_reply_to_id = Some(post);
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.id.as_ref().is_some_and(|id| !id.is_empty())
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn post_id(&self) -> Option<&PostId> {
        self.id.as_ref()
    }
}

/// Value stored under one destination name in an iteration record
///
/// Current builds always write a list. Older files may hold a single record,
/// and a record whose shape is not understood is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    Records(Vec<DestinationRecord>),
    Record(DestinationRecord),
    Unrecognized(Value),
}

impl OutputEntry {
    /// Typed records held by this entry (empty for unrecognized shapes)
    pub fn records(&self) -> Vec<&DestinationRecord> {
        match self {
            OutputEntry::Records(records) => records.iter().collect(),
            OutputEntry::Record(record) => vec![record],
            OutputEntry::Unrecognized(_) => Vec::new(),
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, OutputEntry::Unrecognized(_))
    }
}

fn iteration_record_type() -> String {
    ITERATION_RECORD_TYPE.to_string()
}

/// Record of one orchestrator call across every destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    #[serde(rename = "_type", default = "iteration_record_type")]
    record_type: String,
    #[serde(rename = "_version", default)]
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub extra_keys: ExtraKeys,
    #[serde(default)]
    pub output_records: BTreeMap<String, OutputEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IterationRecord {
    pub fn new(extra_keys: ExtraKeys) -> Self {
        Self {
            record_type: iteration_record_type(),
            version: RECORD_VERSION.to_string(),
            timestamp: now_timestamp(),
            extra_keys,
            output_records: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Store the outcome of one destination
    pub fn insert_records(&mut self, destination: impl Into<String>, records: Vec<DestinationRecord>) {
        self.output_records
            .insert(destination.into(), OutputEntry::Records(records));
    }

    /// Typed records for one destination
    pub fn records_for(&self, destination: &str) -> Vec<&DestinationRecord> {
        self.output_records
            .get(destination)
            .map(OutputEntry::records)
            .unwrap_or_default()
    }

    /// True if no destination recorded a failure
    pub fn all_succeeded(&self) -> bool {
        self.output_records
            .values()
            .flat_map(OutputEntry::records)
            .all(DestinationRecord::is_success)
    }

    /// Equality that ignores the producing build's version
    pub fn same_content(&self, other: &IterationRecord) -> bool {
        self.timestamp == other.timestamp
            && self.extra_keys == other.extra_keys
            && self.output_records == other.output_records
            && self.extra == other.extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posted_record_is_success() {
        let record = DestinationRecord::posted(RecordKind::TootRecord, "109".into(), "hello");

        assert!(record.is_success());
        assert!(!record.is_failure());
        assert_eq!(record.post_id(), Some(&PostId::from("109")));
        assert_eq!(record.extra.get("toot_id"), Some(&Value::from("109")));
    }

    #[test]
    fn test_failed_record_is_failure() {
        let error = ClientError::new("Status is a duplicate.").with_code(187);
        let record = DestinationRecord::failed(RecordKind::TweetRecord, &error);

        assert!(record.is_failure());
        assert!(!record.is_success());
        assert!(record.id.is_none());
        assert_eq!(record.error_code, Some(187));
        assert_eq!(
            record.error_message.as_deref(),
            Some("Status is a duplicate.")
        );
    }

    #[test]
    fn test_empty_id_is_recorded_as_failure() {
        let record = DestinationRecord::posted(RecordKind::TootRecord, "".into(), "hello");

        assert!(record.is_success() ^ record.is_failure());
        assert!(record.is_failure());
        assert!(record.id.is_none());
        assert_eq!(record.text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_post_id_accepts_numbers_and_strings() {
        let numeric: PostId = serde_json::from_str("1234567890123").unwrap();
        assert_eq!(numeric, PostId::Number(1234567890123));

        let text: PostId = serde_json::from_str(r#""109876""#).unwrap();
        assert_eq!(text, PostId::Text("109876".to_string()));
        assert_eq!(text.to_string(), "109876");
    }

    #[test]
    fn test_record_serializes_failure_fields_only_when_failed() {
        let record = DestinationRecord::posted(RecordKind::TweetRecord, PostId::Number(7), "hi");
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["_type"], "TweetRecord");
        assert_eq!(value["tweet_id"], 7);
        assert!(value.get("error").is_none());
        assert!(value["in_reply_to"].is_null());
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let raw = serde_json::json!({
            "_type": "TootRecord",
            "id": "42",
            "text": "hello",
            "visibility": "unlisted"
        });
        let record: DestinationRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.extra.get("visibility"), Some(&Value::from("unlisted")));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["visibility"], "unlisted");
    }

    #[test]
    fn test_output_entry_single_and_list() {
        let single: OutputEntry =
            serde_json::from_value(serde_json::json!({"_type": "TweetRecord", "id": 1}))
                .unwrap();
        assert_eq!(single.records().len(), 1);

        let list: OutputEntry = serde_json::from_value(serde_json::json!([
            {"_type": "TootRecord", "id": "1"},
            {"_type": "TootRecord", "id": "2"}
        ]))
        .unwrap();
        assert_eq!(list.records().len(), 2);
    }

    #[test]
    fn test_output_entry_falls_back_to_unrecognized() {
        let nested = serde_json::json!({
            "_type": "IterationRecord",
            "output_records": {}
        });
        let entry: OutputEntry = serde_json::from_value(nested.clone()).unwrap();

        assert!(entry.is_unrecognized());
        assert!(entry.records().is_empty());
        assert_eq!(serde_json::to_value(&entry).unwrap(), nested);
    }

    #[test]
    fn test_iteration_record_new_defaults() {
        let mut extra = ExtraKeys::new();
        extra.insert("book".to_string(), Value::from("Dune"));
        let record = IterationRecord::new(extra.clone());

        assert_eq!(record.version, RECORD_VERSION);
        assert_eq!(record.extra_keys, extra);
        assert!(record.output_records.is_empty());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_type"], ITERATION_RECORD_TYPE);
    }

    #[test]
    fn test_same_content_ignores_version() {
        let mut a = IterationRecord::new(ExtraKeys::new());
        let mut b = a.clone();
        b.version = "9999".to_string();
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        a.insert_records("mastodon", Vec::new());
        assert!(!a.same_content(&b));
    }
}
