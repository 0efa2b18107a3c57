//! Optimistic streaming of model output
//!
//! Text is forwarded to the caller as it arrives until the first tool call
//! fragment shows up. From then on the rest of the turn is buffered and the
//! caller only sees the assembled message.

use crate::conversation::{ContentItem, ContentPart, ConversationMessage, Role, ToolInvocation};
use crate::dedup::dedup_invocations;
use crate::llm::{FrameStream, LlmError, StreamFrame, ToolCallFragment, Usage};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};

/// A tool call being assembled from fragments
#[derive(Debug, Default)]
struct PartialCall {
    call_id: String,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn into_invocation(self) -> ToolInvocation {
        let call_id = if self.call_id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.call_id
        };
        let arguments = parse_arguments(&call_id, &self.arguments);
        ToolInvocation::new(call_id, self.name, arguments)
    }
}

fn parse_arguments(call_id: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(call_id = %call_id, kind = ?other, "Streamed tool arguments are not an object");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(call_id = %call_id, error = %e, "Unparseable streamed tool arguments");
            Map::new()
        }
    }
}

/// Final result of a streamed turn
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    /// Assembled assistant message: text, deduplicated invocations, media
    pub message: ConversationMessage,
    pub usage: Usage,
    /// Whether any text was forwarded live
    pub streamed_to_user: bool,
}

/// Accumulates frames for one turn
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    media: Vec<ContentPart>,
    calls: Vec<PartialCall>,
    tool_detected: bool,
    streamed_to_user: bool,
    usage: Usage,
    complete: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame. Returns the text to forward to the caller, if any.
    pub fn push(&mut self, frame: StreamFrame) -> Option<String> {
        let StreamFrame {
            text,
            tool_calls,
            media,
            usage,
            done,
        } = frame;

        for fragment in tool_calls {
            self.push_fragment(fragment);
        }
        self.media.extend(media);
        self.usage.add(&usage);
        if done {
            self.complete = true;
        }

        let delta = text.filter(|t| !t.is_empty())?;
        self.text.push_str(&delta);
        if self.tool_detected {
            None
        } else {
            self.streamed_to_user = true;
            Some(delta)
        }
    }

    fn push_fragment(&mut self, fragment: ToolCallFragment) {
        if !self.tool_detected {
            tracing::debug!(call_id = %fragment.call_id, tool = %fragment.name, "Tool call detected mid-stream");
            self.tool_detected = true;
        }

        let existing = if fragment.call_id.is_empty() {
            self.calls.last_mut()
        } else {
            self.calls
                .iter_mut()
                .find(|call| call.call_id == fragment.call_id)
        };

        match existing {
            Some(call) => {
                if call.name.is_empty() {
                    call.name = fragment.name;
                }
                call.arguments.push_str(&fragment.arguments);
            }
            None => self.calls.push(PartialCall {
                call_id: fragment.call_id,
                name: fragment.name,
                arguments: fragment.arguments,
            }),
        }
    }

    /// Whether a tool call has been seen; never resets within a turn
    pub fn tool_detected(&self) -> bool {
        self.tool_detected
    }

    /// Whether an explicit completion frame has arrived
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Assemble the final assistant message
    pub fn finish(self) -> StreamOutcome {
        let invocations =
            dedup_invocations(self.calls.into_iter().map(PartialCall::into_invocation));

        let mut content = Vec::with_capacity(invocations.len() + self.media.len() + 1);
        if !self.text.is_empty() {
            content.push(ContentItem::Text { text: self.text });
        }
        content.extend(invocations.into_iter().map(ContentItem::ToolInvocation));
        content.extend(self.media.into_iter().map(|part| ContentItem::Media { part }));

        StreamOutcome {
            message: ConversationMessage::new(Role::Assistant, content),
            usage: self.usage,
            streamed_to_user: self.streamed_to_user,
        }
    }
}

/// Event surfaced to the caller while a turn streams
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Completed(StreamOutcome),
}

enum StreamState {
    Streaming {
        frames: FrameStream,
        accumulator: StreamAccumulator,
    },
    Done,
}

/// Adapt a transport frame stream into caller events.
///
/// Yields live text deltas, then exactly one `Completed`. Stream exhaustion
/// without a completion frame is treated as completion. A transport error is
/// forwarded and ends the stream.
pub fn optimistic_stream(frames: FrameStream) -> BoxStream<'static, Result<StreamEvent, LlmError>> {
    let initial = StreamState::Streaming {
        frames,
        accumulator: StreamAccumulator::new(),
    };

    stream::unfold(initial, |state| async move {
        let StreamState::Streaming {
            mut frames,
            mut accumulator,
        } = state
        else {
            return None;
        };

        loop {
            if accumulator.is_complete() {
                return Some((Ok(StreamEvent::Completed(accumulator.finish())), StreamState::Done));
            }
            match frames.next().await {
                Some(Ok(frame)) => {
                    if let Some(delta) = accumulator.push(frame) {
                        let next = StreamState::Streaming {
                            frames,
                            accumulator,
                        };
                        return Some((Ok(StreamEvent::TextDelta(delta)), next));
                    }
                }
                Some(Err(e)) => return Some((Err(e), StreamState::Done)),
                None => {
                    return Some((Ok(StreamEvent::Completed(accumulator.finish())), StreamState::Done));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(id: &str, name: &str, args: &str) -> StreamFrame {
        StreamFrame::tool_call(ToolCallFragment::new(id, name, args))
    }

    fn frames(items: Vec<Result<StreamFrame, LlmError>>) -> FrameStream {
        stream::iter(items).boxed()
    }

    async fn collect(items: Vec<Result<StreamFrame, LlmError>>) -> Vec<Result<StreamEvent, LlmError>> {
        optimistic_stream(frames(items)).collect().await
    }

    #[test]
    fn test_latch_stops_forwarding() {
        let mut acc = StreamAccumulator::new();

        assert_eq!(acc.push(StreamFrame::text("Hello")), Some("Hello".to_string()));
        assert_eq!(acc.push(fragment("call_1", "search", r#"{"q":"rust"}"#)), None);
        assert!(acc.tool_detected());
        assert_eq!(acc.push(StreamFrame::text(" world")), None);

        let outcome = acc.finish();
        assert_eq!(outcome.message.role, Role::Assistant);
        assert_eq!(outcome.message.text(), "Hello world");
        assert!(outcome.streamed_to_user);
        let invocation = outcome.message.invocations().next().unwrap();
        assert_eq!(invocation.call_id, "call_1");
        assert_eq!(invocation.arguments["q"], json!("rust"));
    }

    #[test]
    fn test_tool_fragment_in_same_frame_suppresses_text() {
        let mut acc = StreamAccumulator::new();
        let mut frame = fragment("call_1", "search", "{}");
        frame.text = Some("thinking".to_string());

        assert_eq!(acc.push(frame), None);
        let outcome = acc.finish();
        assert!(!outcome.streamed_to_user);
        assert_eq!(outcome.message.text(), "thinking");
    }

    #[test]
    fn test_fragments_concatenate_arguments() {
        let mut acc = StreamAccumulator::new();
        acc.push(fragment("call_1", "search", r#"{"q":"#));
        acc.push(StreamFrame::tool_call(ToolCallFragment::continuation(r#""ru"#)));
        acc.push(fragment("call_1", "", r#"st"}"#));

        let outcome = acc.finish();
        let invocations: Vec<_> = outcome.message.invocations().collect();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].name, "search");
        assert_eq!(invocations[0].arguments["q"], json!("rust"));
    }

    #[test]
    fn test_bad_arguments_become_empty_map() {
        let mut acc = StreamAccumulator::new();
        acc.push(fragment("call_1", "search", "{broken"));
        acc.push(fragment("call_2", "fetch", "[1,2]"));

        let outcome = acc.finish();
        assert!(outcome.message.invocations().all(|i| i.arguments.is_empty()));
        assert_eq!(outcome.message.invocations().count(), 2);
    }

    #[test]
    fn test_duplicate_streamed_calls_are_collapsed() {
        let mut acc = StreamAccumulator::new();
        acc.push(fragment("call_1", "search", r#"{"a":1,"b":2}"#));
        acc.push(fragment("call_2", "search", r#"{"b":2,"a":1}"#));

        let outcome = acc.finish();
        let ids: Vec<_> = outcome.message.invocations().map(|i| i.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_1"]);
    }

    #[test]
    fn test_media_and_usage_accumulate() {
        let mut acc = StreamAccumulator::new();
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 2,
            cached_tokens: 4,
            cost_usd: 0.5,
        };
        assert_eq!(acc.push(StreamFrame::text("see image").with_usage(usage.clone())), Some("see image".to_string()));
        assert_eq!(
            acc.push(StreamFrame::media(ContentPart::data("image/png", vec![1, 2, 3])).with_usage(usage)),
            None
        );

        let outcome = acc.finish();
        assert_eq!(outcome.usage.input_tokens, 20);
        assert_eq!(outcome.usage.cached_tokens, 8);
        assert!((outcome.usage.cost_usd - 1.0).abs() < 1e-9);
        assert!(matches!(
            outcome.message.content.last(),
            Some(ContentItem::Media { part: ContentPart::Data { .. } })
        ));
    }

    #[tokio::test]
    async fn test_optimistic_stream_with_tool_call() {
        let events = collect(vec![
            Ok(StreamFrame::text("Hello")),
            Ok(fragment("call_1", "search", "{}")),
            Ok(StreamFrame::text(" world")),
            Ok(StreamFrame::done()),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(StreamEvent::TextDelta(t)) if t == "Hello"));
        let Ok(StreamEvent::Completed(outcome)) = &events[1] else {
            panic!("expected completion, got {:?}", events[1]);
        };
        assert_eq!(outcome.message.text(), "Hello world");
        assert!(outcome.streamed_to_user);
        assert_eq!(outcome.message.invocations().count(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_stream_without_tool_call_forwards_everything() {
        let events = collect(vec![
            Ok(StreamFrame::text("a")),
            Ok(StreamFrame::text("b")),
            Ok(StreamFrame::text("c")),
        ])
        .await;

        let deltas: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::TextDelta(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["a", "b", "c"]);
        let Some(Ok(StreamEvent::Completed(outcome))) = events.last() else {
            panic!("expected completion");
        };
        assert_eq!(outcome.message.text(), "abc");
    }

    #[tokio::test]
    async fn test_done_marker_and_exhaustion_are_equivalent() {
        let with_marker = collect(vec![Ok(StreamFrame::text("x")), Ok(StreamFrame::done())]).await;
        let without = collect(vec![Ok(StreamFrame::text("x"))]).await;

        let text = |events: &[Result<StreamEvent, LlmError>]| match events.last() {
            Some(Ok(StreamEvent::Completed(o))) => (o.message.text(), o.streamed_to_user),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(with_marker.len(), without.len());
        assert_eq!(text(&with_marker), text(&without));
    }

    #[tokio::test]
    async fn test_text_in_done_frame_is_forwarded_before_completion() {
        let mut last = StreamFrame::text("!");
        last.done = true;
        let events = collect(vec![Ok(StreamFrame::text("hi")), Ok(last), Ok(StreamFrame::text("ignored"))]).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], Ok(StreamEvent::TextDelta(t)) if t == "!"));
        let Ok(StreamEvent::Completed(outcome)) = &events[2] else {
            panic!("expected completion");
        };
        assert_eq!(outcome.message.text(), "hi!");
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let events = collect(vec![
            Ok(StreamFrame::text("partial")),
            Err(LlmError::network("connection reset")),
            Ok(StreamFrame::text("never seen")),
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Err(e) if e.message == "connection reset"));
    }
}
