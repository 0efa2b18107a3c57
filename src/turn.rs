//! Turn driver
//!
//! Runs the request/execute loop for one caller turn: sanitize the history,
//! ask the model, fold its tool calls through the engine, repeat until the
//! model answers without tools or a client tool suspends the conversation.

use crate::config::EngineConfig;
use crate::conversation::{Conversation, ConversationMessage, ExecutionPhase};
use crate::dedup::dedup_message;
use crate::engine::{
    outstanding_request, BatchRun, ClientInteractionRequest, ClientInteractionResult,
    EngineError, ToolEngine, ToolStep,
};
use crate::llm::{LlmError, LlmRequest, LlmService, Usage};
use crate::sanitizer::build_request_messages;
use crate::streaming::{optimistic_stream, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Progress reported to the caller during a turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Live model text (only before a tool call is detected)
    TextDelta(String),
    /// Assistant message appended to the conversation
    AssistantMessage(ConversationMessage),
    Step(ToolStep),
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools
    Finished { message: ConversationMessage },
    /// A client tool must run before the turn can continue
    AwaitingClient(ClientInteractionRequest),
}

pub struct TurnDriver<L: LlmService> {
    llm: L,
    engine: ToolEngine,
    config: EngineConfig,
}

impl<L: LlmService> TurnDriver<L> {
    pub fn new(llm: L, engine: ToolEngine, config: EngineConfig) -> Self {
        Self {
            llm,
            engine,
            config,
        }
    }

    /// Append a user message and run the turn
    pub async fn submit(
        &self,
        conversation: &mut Conversation,
        user_text: &str,
        events: Option<&mpsc::Sender<TurnEvent>>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        if conversation.phase() == ExecutionPhase::AwaitingClient {
            return Err(EngineError::Suspended);
        }
        conversation.append(ConversationMessage::user(user_text))?;
        self.run_rounds(conversation, events, cancel).await
    }

    /// Deliver client results and continue the suspended turn
    pub async fn continue_after_client(
        &self,
        conversation: &mut Conversation,
        results: Vec<ClientInteractionResult>,
        events: Option<&mpsc::Sender<TurnEvent>>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut run = self.engine.resume(conversation, results, cancel.clone())?;
        if let Some(request) = pump(&mut run, events).await? {
            return Ok(TurnOutcome::AwaitingClient(request));
        }
        drop(run);

        // The delivery did not answer the outstanding interaction
        if conversation.phase() == ExecutionPhase::AwaitingClient {
            return match outstanding_request(conversation)? {
                Some(request) => Ok(TurnOutcome::AwaitingClient(request)),
                None => Err(EngineError::Suspended),
            };
        }

        self.run_rounds(conversation, events, cancel).await
    }

    async fn run_rounds(
        &self,
        conversation: &mut Conversation,
        events: Option<&mpsc::Sender<TurnEvent>>,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let max_rounds = self.config.max_tool_rounds;

        for round in 1..=max_rounds {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let request = LlmRequest {
                messages: build_request_messages(conversation),
                tools: self.engine.tool_definitions(),
                max_tokens: Some(self.config.max_tokens),
            };
            tracing::debug!(
                conv_id = %conversation.id(),
                round,
                messages = request.messages.len(),
                "Requesting model turn"
            );

            let (message, usage) = if self.config.streaming {
                self.stream_round(&request, events, &cancel).await?
            } else {
                self.complete_round(&request, &cancel).await?
            };
            conversation.record_usage(&usage);

            let message = dedup_message(message);
            let invocations: Vec<_> = message.invocations().cloned().collect();
            let appended = conversation.append(message)?.clone();
            emit(events, TurnEvent::AssistantMessage(appended.clone())).await;

            if invocations.is_empty() {
                tracing::info!(
                    conv_id = %conversation.id(),
                    rounds = round,
                    input_tokens = conversation.usage().input_tokens,
                    output_tokens = conversation.usage().output_tokens,
                    "Turn completed"
                );
                return Ok(TurnOutcome::Finished { message: appended });
            }

            let mut run = self
                .engine
                .execute_batch(conversation, invocations, cancel.clone());
            if let Some(request) = pump(&mut run, events).await? {
                return Ok(TurnOutcome::AwaitingClient(request));
            }
        }

        tracing::warn!(conv_id = %conversation.id(), max_rounds, "Tool round limit reached");
        Err(EngineError::RoundLimit(max_rounds))
    }

    async fn complete_round(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<(ConversationMessage, Usage), EngineError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            response = self.llm.complete(request) => response?,
        };
        Ok((response.message, response.usage))
    }

    async fn stream_round(
        &self,
        request: &LlmRequest,
        events: Option<&mpsc::Sender<TurnEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(ConversationMessage, Usage), EngineError> {
        let frames = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            frames = self.llm.stream(request) => frames?,
        };

        let mut stream = optimistic_stream(frames);
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    emit(events, TurnEvent::TextDelta(delta)).await;
                }
                Some(Ok(StreamEvent::Completed(outcome))) => {
                    return Ok((outcome.message, outcome.usage));
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(LlmError::network("stream ended without completion").into()),
            }
        }
    }
}

/// Pull a batch to its end, forwarding steps; returns the suspension request if any
async fn pump(
    run: &mut BatchRun<'_>,
    events: Option<&mpsc::Sender<TurnEvent>>,
) -> Result<Option<ClientInteractionRequest>, EngineError> {
    while let Some(step) = run.next_step().await? {
        let suspended = match &step {
            ToolStep::AwaitingClient { request } => Some(request.clone()),
            _ => None,
        };
        emit(events, TurnEvent::Step(step)).await;
        if suspended.is_some() {
            return Ok(suspended);
        }
    }
    Ok(None)
}

async fn emit(events: Option<&mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            tracing::debug!("Turn event receiver dropped");
        }
    }
}
