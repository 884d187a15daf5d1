//! Load-time migration of history entries
//!
//! Two kinds of old data are upgraded when a history file is read:
//!
//! - **Legacy records.** Before multiple destinations existed, each history
//!   entry was a bare birdsite record. Such an entry is wrapped in a fresh
//!   iteration record under `"birdsite"`.
//! - **Nested iteration records.** A past bug re-wrapped whole iteration
//!   records inside `output_records["birdsite"]`, sometimes several levels
//!   deep. The repair pass digs the real birdsite record out from the bottom.
//!
//! Both work on raw JSON so that shapes the typed model would reject can
//! still be fixed.

use serde_json::{Map, Value};
use tracing::warn;

use crate::types::{
    now_timestamp, DestinationRecord, ExtraKeys, IterationRecord, OutputEntry, RecordKind,
    ITERATION_RECORD_TYPE, LEGACY_DESTINATION,
};

/// Deepest nesting the repair pass will descend through
///
/// Each level costs two levels of JSON nesting, so deeper chains would hit
/// serde_json's recursion limit before reaching the repair pass anyway.
pub const MAX_REPAIR_DEPTH: usize = 32;

fn is_iteration_record(value: &Value) -> bool {
    value.get("_type").and_then(Value::as_str) == Some(ITERATION_RECORD_TYPE)
}

/// Turn one element of the history array into an iteration record
///
/// Returns a description of the problem if the element can't be used.
pub fn migrate_entry(entry: Value) -> Result<IterationRecord, String> {
    let object = match entry {
        Value::Object(object) => object,
        other => return Err(format!("history entry is not an object: {}", other)),
    };

    if object.get("_type").and_then(Value::as_str) == Some(ITERATION_RECORD_TYPE) {
        let repaired = repair(object);
        serde_json::from_value(Value::Object(repaired))
            .map_err(|e| format!("invalid iteration record: {}", e))
    } else {
        hoist_legacy(object)
    }
}

/// Flatten iteration records nested under `output_records["birdsite"]`
///
/// Records without the nesting are returned untouched. If the nesting is
/// broken (a level without `output_records` or `birdsite`, a bottom that is
/// not an object, or more than [`MAX_REPAIR_DEPTH`] levels) the record is
/// also returned untouched.
pub fn repair(mut record: Map<String, Value>) -> Map<String, Value> {
    let Some(mut current) = record
        .get("output_records")
        .and_then(|o| o.get(LEGACY_DESTINATION))
        .filter(|b| is_iteration_record(b))
        .cloned()
    else {
        return record;
    };

    let mut lifted: Vec<Map<String, Value>> = Vec::new();
    let mut depth = 0;

    while is_iteration_record(&current) {
        depth += 1;
        if depth > MAX_REPAIR_DEPTH {
            warn!(
                "Nested birdsite records exceed {} levels, leaving record unrepaired",
                MAX_REPAIR_DEPTH
            );
            return record;
        }

        if let Some(Value::Object(extra)) = current.get("extra_keys") {
            lifted.push(extra.clone());
        }

        let next = current
            .get_mut("output_records")
            .and_then(|o| o.get_mut(LEGACY_DESTINATION))
            .map(Value::take);

        match next {
            Some(next) => current = next,
            None => {
                warn!(
                    "Nested birdsite record is missing its output records, \
                     leaving record unrepaired"
                );
                return record;
            }
        }
    }

    let Value::Object(mut bottom) = current else {
        warn!("Nested birdsite record does not end in a record, leaving record unrepaired");
        return record;
    };

    bottom.insert(
        "_type".to_string(),
        Value::from(RecordKind::TweetRecord.to_string()),
    );
    if let Some(Value::Object(extra)) = bottom.remove("extra_keys") {
        lifted.push(extra);
    }

    let mut merged = match record.remove("extra_keys") {
        Some(Value::Object(extra)) => extra,
        _ => Map::new(),
    };
    for extra in lifted {
        for (key, value) in extra {
            merged.entry(key).or_insert(value);
        }
    }
    record.insert("extra_keys".to_string(), Value::Object(merged));

    if let Some(Value::Object(output_records)) = record.get_mut("output_records") {
        output_records.insert(LEGACY_DESTINATION.to_string(), Value::Object(bottom));
    }

    record
}

/// Wrap a bare birdsite record in an iteration record
///
/// The record's `extra_keys` and `timestamp` move up to the new iteration
/// record; a record without a timestamp gets the current time.
pub fn hoist_legacy(mut legacy: Map<String, Value>) -> Result<IterationRecord, String> {
    let extra_keys: ExtraKeys = match legacy.remove("extra_keys") {
        Some(Value::Object(extra)) => extra.into_iter().collect(),
        Some(Value::Null) | None => ExtraKeys::new(),
        Some(other) => return Err(format!("legacy extra_keys is not an object: {}", other)),
    };

    legacy
        .entry("_type")
        .or_insert_with(|| Value::from(RecordKind::TweetRecord.to_string()));

    let timestamp = legacy
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw = Value::Object(legacy);
    let entry = match serde_json::from_value::<DestinationRecord>(raw.clone()) {
        Ok(record) => OutputEntry::Record(record),
        Err(e) => {
            warn!("Keeping legacy record in its original form: {}", e);
            OutputEntry::Unrecognized(raw)
        }
    };

    let mut item = IterationRecord::new(extra_keys);
    item.timestamp = timestamp.unwrap_or_else(now_timestamp);
    item.output_records
        .insert(LEGACY_DESTINATION.to_string(), entry);

    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_repair_leaves_healthy_record_alone() {
        let record = object(json!({
            "_type": "IterationRecord",
            "extra_keys": {},
            "output_records": {"birdsite": {"_type": "TweetRecord", "id": 1}}
        }));

        assert_eq!(repair(record.clone()), record);
    }

    #[test]
    fn test_repair_nested_levels_lift_extra_keys() {
        let record = object(json!({
            "_type": "IterationRecord",
            "extra_keys": {"a": 1},
            "output_records": {
                "birdsite": {
                    "_type": "IterationRecord",
                    "extra_keys": {"a": 2, "b": 2},
                    "output_records": {
                        "birdsite": {
                            "_type": "IterationRecord",
                            "output_records": {
                                "birdsite": {"id": 7, "extra_keys": {"c": 3}}
                            }
                        }
                    }
                }
            }
        }));

        let repaired = repair(record);

        assert_eq!(repaired["extra_keys"], json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(
            repaired["output_records"]["birdsite"],
            json!({"_type": "TweetRecord", "id": 7})
        );
    }

    #[test]
    fn test_repair_gives_up_on_missing_birdsite() {
        let record = object(json!({
            "_type": "IterationRecord",
            "output_records": {
                "birdsite": {
                    "_type": "IterationRecord",
                    "output_records": {"mastodon": []}
                }
            }
        }));

        assert_eq!(repair(record.clone()), record);
    }

    #[test]
    fn test_repair_gives_up_on_non_object_bottom() {
        let record = object(json!({
            "_type": "IterationRecord",
            "output_records": {
                "birdsite": {
                    "_type": "IterationRecord",
                    "output_records": {"birdsite": [1, 2]}
                }
            }
        }));

        assert_eq!(repair(record.clone()), record);
    }

    #[test]
    fn test_repair_gives_up_past_depth_limit() {
        let mut nested = json!({"_type": "TweetRecord", "id": 1});
        for _ in 0..=MAX_REPAIR_DEPTH {
            nested = json!({
                "_type": "IterationRecord",
                "output_records": {"birdsite": nested}
            });
        }
        let record = object(json!({
            "_type": "IterationRecord",
            "output_records": {"birdsite": nested}
        }));

        assert_eq!(repair(record.clone()), record);
    }

    #[test]
    fn test_hoist_legacy_lifts_keys_and_timestamp() {
        let legacy = object(json!({
            "id": 12,
            "tweet_id": 12,
            "text": "old post",
            "timestamp": "2018-01-01T00:00:00.000000",
            "extra_keys": {"source": "corpus"}
        }));

        let item = hoist_legacy(legacy).unwrap();

        assert_eq!(item.timestamp, "2018-01-01T00:00:00.000000");
        assert_eq!(item.extra_keys.get("source"), Some(&json!("corpus")));

        let records = item.records_for("birdsite");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, RecordKind::TweetRecord);
        assert!(!records[0].extra.contains_key("extra_keys"));
    }

    #[test]
    fn test_hoist_legacy_without_timestamp_uses_now() {
        let item = hoist_legacy(object(json!({"id": 1, "text": "x"}))).unwrap();
        assert!(!item.timestamp.is_empty());
    }

    #[test]
    fn test_migrate_entry_rejects_non_objects() {
        assert!(migrate_entry(json!([1, 2])).is_err());
        assert!(migrate_entry(json!("record")).is_err());
    }
}
