//! On-disk layout of the history file
//!
//! The file is written with sorted keys, four-space indentation, non-ASCII
//! characters escaped as `\uXXXX` and a trailing newline, so a history written
//! by older bots and one written here diff cleanly.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};

/// Render `value` in the history file layout
pub fn to_history_string(value: &Value) -> Result<String, serde_json::Error> {
    let sorted = sort_keys(value);

    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    sorted.serialize(&mut serializer)?;

    // serde_json only ever emits valid UTF-8.
    let pretty = String::from_utf8_lossy(&buf);
    let mut out = escape_non_ascii(&pretty);
    out.push('\n');
    Ok(out)
}

/// Copy of `value` with every object's keys in sorted order
///
/// `serde_json::Map` keeps insertion order when the `preserve_order` feature
/// is enabled anywhere in the dependency graph, so keys are sorted here
/// explicitly.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (key, item) in entries {
                sorted.insert(key.clone(), sort_keys(item));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Replace every non-ASCII character with lowercase UTF-16 escapes
fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut units = [0u16; 2];

    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }

    out
}
