//! Schema-on-read access to loosely-typed Splunk result fields.
//!
//! Every accessor is total: absent or oddly-shaped values degrade to an empty
//! string, an empty list or `None`, and the problem is logged.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// One Splunk search result row, keyed by field name.
pub type RawResult = Map<String, Value>;

/// Timestamp layout emitted by the compliance searches. The trailing `.GMT` is
/// literal text rather than a zone designator.
pub const SPLUNK_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.GMT";

/// Typed field accessors over a [`RawResult`].
pub trait ResultFields {
    /// Render a scalar field as text. Missing fields become `""`.
    fn text(&self, field: &str) -> String;

    /// Read a list field, accepting a bare scalar as a one-element list.
    fn list(&self, field: &str) -> Vec<String>;

    /// Parse a [`SPLUNK_TIME_FORMAT`] timestamp field.
    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>>;
}

impl ResultFields for RawResult {
    fn text(&self, field: &str) -> String {
        match self.get(field) {
            Some(value) => render_scalar(value),
            None => {
                debug!(field = %field, "No such field in search result");
                String::new()
            }
        }
    }

    fn list(&self, field: &str) -> Vec<String> {
        let Some(value) = self.get(field) else {
            return Vec::new();
        };

        match value {
            Value::Null => Vec::new(),
            Value::String(s) => vec![s.clone()],
            Value::Number(_) | Value::Bool(_) => vec![render_scalar(value)],
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    let coerced = coerce_element(item);
                    if coerced.is_none() {
                        warn!(
                            field = %field,
                            index,
                            kind = kind_of(item),
                            "Dropping list element that is not string-coercible"
                        );
                    }
                    coerced
                })
                .collect(),
            Value::Object(_) => {
                warn!(field = %field, kind = "object", "Unknown type for list field");
                Vec::new()
            }
        }
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        let raw = self.text(field);
        if raw.is_empty() {
            return None;
        }

        match NaiveDateTime::parse_from_str(&raw, SPLUNK_TIME_FORMAT) {
            Ok(naive) => Some(naive.and_utc()),
            Err(e) => {
                warn!(field = %field, value = %raw, error = %e, "Error parsing timestamp");
                None
            }
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn coerce_element(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(render_scalar(value)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn result(value: Value) -> RawResult {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_text_present_and_missing() {
        let r = result(json!({ "alertname": "testAlertname", "empty": "" }));
        assert_eq!(r.text("alertname"), "testAlertname");
        assert_eq!(r.text("empty"), "");
        assert_eq!(r.text("missing"), "");
    }

    #[test]
    fn test_text_stringifies_non_strings() {
        let r = result(json!({ "count": 42, "flag": true, "ratio": 1.5, "nothing": null }));
        assert_eq!(r.text("count"), "42");
        assert_eq!(r.text("flag"), "true");
        assert_eq!(r.text("ratio"), "1.5");
        assert_eq!(r.text("nothing"), "");
    }

    #[test]
    fn test_text_of_list_renders_json() {
        let r = result(json!({ "clusterid": ["c1", "c2"] }));
        assert_eq!(r.text("clusterid"), r#"["c1","c2"]"#);
    }

    #[test]
    fn test_list_scalar_becomes_single_element() {
        let r = result(json!({ "clusterid": "c1" }));
        assert_eq!(r.list("clusterid"), vec!["c1"]);
    }

    #[test]
    fn test_list_copies_string_array() {
        let r = result(json!({ "reason": ["testReason1", "testReason2"] }));
        assert_eq!(r.list("reason"), vec!["testReason1", "testReason2"]);
    }

    #[test]
    fn test_list_missing_or_null_is_empty() {
        let r = result(json!({ "reason": null }));
        assert!(r.list("reason").is_empty());
        assert!(r.list("clusterid").is_empty());
    }

    #[test]
    fn test_list_skips_uncoercible_elements() {
        let r = result(json!({ "clusterid": ["c1", 7, null, {"a": 1}, ["nested"], false] }));
        assert_eq!(r.list("clusterid"), vec!["c1", "7", "false"]);
    }

    #[test]
    fn test_list_object_is_empty() {
        let r = result(json!({ "clusterid": { "id": "c1" } }));
        assert!(r.list("clusterid").is_empty());
    }

    #[test]
    fn test_timestamp_parses_literal_gmt_suffix() {
        let r = result(json!({ "timestamp": "2021-01-01T00:00:00.GMT" }));
        let expected = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(r.timestamp("timestamp"), Some(expected));
    }

    #[test]
    fn test_timestamp_degrades_to_none() {
        let empty = result(json!({ "timestamp": "" }));
        assert_eq!(empty.timestamp("timestamp"), None);

        let missing = result(json!({}));
        assert_eq!(missing.timestamp("timestamp"), None);

        let garbage = result(json!({ "timestamp": "yesterday at noon" }));
        assert_eq!(garbage.timestamp("timestamp"), None);

        let rfc3339 = result(json!({ "timestamp": "2021-01-01T00:00:00Z" }));
        assert_eq!(rfc3339.timestamp("timestamp"), None);
    }
}
