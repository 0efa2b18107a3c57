//! Duplicate tool invocation removal
//!
//! Models occasionally emit the same call twice in one turn under different
//! call ids. Two invocations are duplicates when their names match and their
//! arguments serialize identically once object keys are sorted.

use crate::conversation::{ContentItem, ConversationMessage, ToolInvocation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt::Write;

#[cfg(test)]
mod proptests;

/// Identity of an invocation for duplicate detection
pub fn invocation_key(invocation: &ToolInvocation) -> (String, String) {
    (
        invocation.name.clone(),
        canonical_arguments(&invocation.arguments),
    )
}

/// Serialize an argument map with keys sorted at every depth
pub fn canonical_arguments(arguments: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_canonical_object(arguments, &mut out);
    out
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Remove duplicate invocations, keeping the first occurrence of each
pub fn dedup_invocations<I>(invocations: I) -> Vec<ToolInvocation>
where
    I: IntoIterator<Item = ToolInvocation>,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for invocation in invocations {
        if seen.insert(invocation_key(&invocation)) {
            kept.push(invocation);
        } else {
            tracing::debug!(
                call_id = %invocation.call_id,
                tool = %invocation.name,
                "Dropping duplicate tool invocation"
            );
        }
    }
    kept
}

/// Remove duplicate invocations from a single message, preserving the
/// position of every other content item
#[must_use]
pub fn dedup_message(mut message: ConversationMessage) -> ConversationMessage {
    let mut seen = HashSet::new();
    message.content.retain(|item| match item {
        ContentItem::ToolInvocation(invocation) => seen.insert(invocation_key(invocation)),
        _ => true,
    });
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inv(id: &str, name: &str, args: Value) -> ToolInvocation {
        ToolInvocation::from_value(id, name, args)
    }

    #[test]
    fn test_same_call_under_two_ids_is_collapsed() {
        let kept = dedup_invocations(vec![
            inv("call_1", "search", json!({"q": "rust", "limit": 3})),
            inv("call_2", "search", json!({"limit": 3, "q": "rust"})),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].call_id, "call_1");
    }

    #[test]
    fn test_different_arguments_are_kept() {
        let kept = dedup_invocations(vec![
            inv("call_1", "search", json!({"q": "rust"})),
            inv("call_2", "search", json!({"q": "go"})),
            inv("call_3", "fetch", json!({"q": "rust"})),
        ]);
        let ids: Vec<_> = kept.iter().map(|i| i.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
    }

    #[test]
    fn test_nested_keys_are_canonicalized() {
        let a = inv("a", "t", json!({"outer": {"b": 1, "a": [{"y": 2, "x": 1}]}}));
        let b = inv("b", "t", json!({"outer": {"a": [{"x": 1, "y": 2}], "b": 1}}));
        assert_eq!(invocation_key(&a), invocation_key(&b));
        assert_eq!(
            canonical_arguments(&a.arguments),
            r#"{"outer":{"a":[{"x":1,"y":2}],"b":1}}"#
        );
    }

    #[test]
    fn test_dedup_message_keeps_text_position() {
        let mut msg = ConversationMessage::assistant(
            "checking",
            vec![
                inv("call_1", "search", json!({"q": "a"})),
                inv("call_2", "search", json!({"q": "a"})),
            ],
        );
        msg.content.push(ContentItem::Text {
            text: "tail".to_string(),
        });

        let msg = dedup_message(msg);
        assert_eq!(msg.content.len(), 3);
        assert_eq!(msg.invocations().count(), 1);
        assert_eq!(msg.text(), "checkingtail");
    }
}
