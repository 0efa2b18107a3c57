//! Property-based tests for request sanitization

use super::*;
use crate::conversation::{ToolPayload, ToolResult};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;

// Small id and name alphabets so collisions, duplicates and orphans are common
fn arb_invocation() -> impl Strategy<Value = ToolInvocation> {
    (
        "call_[0-4]",
        prop_oneof![Just("search"), Just("fetch")],
        0i64..2,
    )
        .prop_map(|(id, name, arg)| ToolInvocation::from_value(id, name, json!({ "n": arg })))
}

fn arb_message() -> impl Strategy<Value = ConversationMessage> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(ConversationMessage::user),
        ("[a-z]{0,4}", proptest::collection::vec(arb_invocation(), 0..4))
            .prop_map(|(text, invocations)| ConversationMessage::assistant(text, invocations)),
        // Several invocations reusing one call id, often with equal arguments
        ("call_[0-4]", proptest::collection::vec(arb_invocation(), 2..5)).prop_map(
            |(shared, mut invocations)| {
                for invocation in invocations.iter_mut().skip(1) {
                    invocation.call_id.clone_from(&shared);
                }
                ConversationMessage::assistant("", invocations)
            }
        ),
        ("call_[0-4]", any::<bool>()).prop_map(|(id, is_error)| {
            let result = if is_error {
                ToolResult::error(id, "failed")
            } else {
                ToolResult::success(id, ToolPayload::Text("ok".to_string()))
            };
            ConversationMessage::tool(result)
        }),
    ]
}

fn arb_messages() -> impl Strategy<Value = Vec<ConversationMessage>> {
    proptest::collection::vec((arb_message(), any::<bool>()), 0..12).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (mut message, active))| {
                message.id = format!("msg-{i}");
                // Mostly active, some inactive
                message.is_active = active || i % 3 != 0;
                message
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_sanitize_is_idempotent(messages in arb_messages()) {
        let once = sanitize(&messages);
        let twice = sanitize(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_sanitized_output_pairs_exactly(messages in arb_messages()) {
        let sanitized = sanitize(&messages);
        prop_assert!(validate_messages(&sanitized).is_empty());

        let mut invocations: HashMap<String, usize> = HashMap::new();
        let mut results: HashMap<String, usize> = HashMap::new();
        for message in &sanitized {
            for invocation in message.invocations() {
                *invocations.entry(invocation.call_id.clone()).or_default() += 1;
            }
            for result in message.results() {
                *results.entry(result.call_id.clone()).or_default() += 1;
            }
        }
        prop_assert!(invocations.values().all(|n| *n == 1));
        prop_assert_eq!(invocations, results);
    }

    #[test]
    fn prop_sanitize_never_emits_inactive_or_empty_messages(messages in arb_messages()) {
        for message in sanitize(&messages) {
            prop_assert!(message.is_active);
            prop_assert!(message.has_content());
        }
    }

    #[test]
    fn prop_user_and_system_messages_survive(messages in arb_messages()) {
        let expected: Vec<_> = messages
            .iter()
            .filter(|m| m.is_active && m.role == Role::User)
            .map(|m| m.id.clone())
            .collect();
        let kept: Vec<_> = sanitize(&messages)
            .into_iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.id)
            .collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn prop_awaiting_client_is_pass_through(messages in arb_messages()) {
        let mut conversation = Conversation::with_id("prop");
        for message in messages {
            conversation.append(message).unwrap();
        }
        conversation.set_phase(ExecutionPhase::AwaitingClient);

        let expected: Vec<_> = conversation.active_messages().cloned().collect();
        prop_assert_eq!(build_request_messages(&conversation), expected);
        prop_assert!(validate(&conversation).is_empty());
    }
}
