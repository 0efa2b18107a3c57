//! Request-ready message lists
//!
//! LLM chat APIs reject a request unless every tool invocation is followed by
//! exactly one matching tool result and no result lacks its invocation.
//! [`build_request_messages`] rewrites the active history so the contract
//! holds; [`validate`] reports violations without touching anything.
//!
//! Pairing is order-aware: a result only answers an invocation that appears
//! earlier in the list.

use crate::conversation::{
    ContentItem, Conversation, ConversationMessage, ExecutionPhase, Role, ToolInvocation,
};
use crate::dedup::{dedup_invocations, invocation_key};
use std::collections::HashSet;

#[cfg(test)]
mod proptests;

/// Messages to send to the transport for this conversation.
///
/// While a client tool is outstanding the active messages are returned
/// unchanged: the missing result is expected and the model must keep seeing
/// the call it made.
pub fn build_request_messages(conversation: &Conversation) -> Vec<ConversationMessage> {
    if conversation.phase() == ExecutionPhase::AwaitingClient {
        return conversation.active_messages().cloned().collect();
    }
    let active: Vec<ConversationMessage> = conversation.active_messages().cloned().collect();
    sanitize(&active)
}

/// Invocations of a message after duplicate removal
fn unique_invocations(message: &ConversationMessage) -> Vec<ToolInvocation> {
    dedup_invocations(message.invocations().cloned())
}

/// Call ids whose first invocation is followed by at least one result
fn answered_call_ids<'a, I>(messages: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a ConversationMessage>,
{
    let mut offered = HashSet::new();
    let mut answered = HashSet::new();
    for message in messages {
        match message.role {
            Role::Assistant => {
                offered.extend(unique_invocations(message).into_iter().map(|i| i.call_id));
            }
            Role::Tool => {
                for result in message.results() {
                    if offered.contains(&result.call_id) {
                        answered.insert(result.call_id.clone());
                    }
                }
            }
            Role::System | Role::User => {}
        }
    }
    answered
}

/// Rewrite a message list so the invocation/result pairing contract holds.
///
/// Inactive messages are dropped. Duplicate invocations are removed,
/// invocations without a later result are dropped, results without an
/// earlier kept invocation are dropped, and assistant or tool messages left
/// empty are removed. Applying the function to its own output is a no-op.
pub fn sanitize(messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
    let active: Vec<&ConversationMessage> = messages.iter().filter(|m| m.is_active).collect();
    let answered = answered_call_ids(active.iter().copied());

    let mut kept_calls: HashSet<String> = HashSet::new();
    let mut pending: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(active.len());

    for message in active {
        match message.role {
            Role::Assistant => {
                // Decided per item: the kept invocation must be the one dedup keeps
                let mut seen_keys = HashSet::new();
                let mut rebuilt = message.clone();
                rebuilt.content.retain(|item| match item {
                    ContentItem::ToolInvocation(invocation) => {
                        if !seen_keys.insert(invocation_key(invocation)) {
                            tracing::debug!(
                                call_id = %invocation.call_id,
                                tool = %invocation.name,
                                "Dropping duplicate tool invocation"
                            );
                            false
                        } else if answered.contains(&invocation.call_id)
                            && kept_calls.insert(invocation.call_id.clone())
                        {
                            pending.insert(invocation.call_id.clone());
                            true
                        } else {
                            tracing::debug!(
                                call_id = %invocation.call_id,
                                tool = %invocation.name,
                                "Dropping tool invocation without response"
                            );
                            false
                        }
                    }
                    _ => true,
                });

                if rebuilt.has_content() {
                    out.push(rebuilt);
                } else {
                    tracing::debug!(message_id = %message.id, "Dropping emptied assistant message");
                }
            }
            Role::Tool => {
                let mut rebuilt = message.clone();
                rebuilt.content.retain(|item| match item {
                    ContentItem::ToolResult(result) => {
                        let matched = pending.remove(&result.call_id);
                        if !matched {
                            tracing::debug!(
                                call_id = %result.call_id,
                                "Dropping orphaned tool result"
                            );
                        }
                        matched
                    }
                    _ => true,
                });

                if rebuilt.has_content() {
                    out.push(rebuilt);
                } else {
                    tracing::debug!(message_id = %message.id, "Dropping emptied tool message");
                }
            }
            Role::System | Role::User => out.push(message.clone()),
        }
    }

    out
}

/// Describe every pairing violation in the conversation.
///
/// Empty means request-ready. Skipped entirely while a client tool is
/// outstanding.
pub fn validate(conversation: &Conversation) -> Vec<String> {
    if conversation.phase() == ExecutionPhase::AwaitingClient {
        return Vec::new();
    }
    let active: Vec<ConversationMessage> = conversation.active_messages().cloned().collect();
    validate_messages(&active)
}

/// Pairing violations in a message list (inactive messages are ignored).
///
/// Unmatched results are reported first, in message order, followed by
/// unanswered invocations in message order. No duplicate removal is applied:
/// the report describes the list exactly as it would be sent.
pub fn validate_messages(messages: &[ConversationMessage]) -> Vec<String> {
    let mut violations = Vec::new();
    // (call_id, name, responses)
    let mut offered: Vec<(String, String, usize)> = Vec::new();

    for message in messages.iter().filter(|m| m.is_active) {
        match message.role {
            Role::Assistant => {
                for invocation in message.invocations() {
                    offered.push((invocation.call_id.clone(), invocation.name.clone(), 0));
                }
            }
            Role::Tool => {
                for result in message.results() {
                    match offered.iter_mut().find(|(id, _, _)| *id == result.call_id) {
                        Some((_, _, responses)) => *responses += 1,
                        None => violations.push(format!(
                            "tool response '{}' does not match any tool call",
                            result.call_id
                        )),
                    }
                }
            }
            Role::System | Role::User => {}
        }
    }

    for (call_id, name, responses) in &offered {
        match responses {
            0 => violations.push(format!("tool call '{call_id}' ({name}) has no response")),
            1 => {}
            n => violations.push(format!("tool call '{call_id}' ({name}) has {n} responses")),
        }
    }

    violations
}
