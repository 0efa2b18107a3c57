//! Tool execution engine
//!
//! Walks the tool invocations of one model turn. Server tools run in place;
//! the first client tool suspends the batch, parking the unprocessed
//! invocations in the conversation's continuation so a later [`ToolEngine::resume`]
//! (possibly in another process) can pick up where the batch stopped.
//!
//! A batch is consumed one [`ToolStep`] at a time through [`BatchRun`].

mod step;

pub use step::{ClientInteractionRequest, ClientInteractionResult, ToolStep};

use crate::conversation::{
    ContinuationError, ContinuationState, Conversation, ConversationError, ConversationMessage,
    ExecutedTool, ExecutionPhase, ToolInvocation, ToolOutcome, ToolResult,
};
use crate::db::DbError;
use crate::dedup::dedup_invocations;
use crate::llm::{LlmError, ToolDefinition};
use crate::tools::{ClientToolCatalog, ToolContext, ToolRegistry};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that stop a batch or a turn
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Malformed continuation: {0}")]
    Continuation(#[from] ContinuationError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Storage(#[from] DbError),
    #[error("Conversation is awaiting a client tool result")]
    Suspended,
    #[error("Tool round limit of {0} reached")]
    RoundLimit(usize),
}

/// Executes tool batches against a server registry and a client catalog
#[derive(Clone, Default)]
pub struct ToolEngine {
    server_tools: ToolRegistry,
    client_tools: ClientToolCatalog,
}

impl ToolEngine {
    pub fn new(server_tools: ToolRegistry, client_tools: ClientToolCatalog) -> Self {
        Self {
            server_tools,
            client_tools,
        }
    }

    /// Catalog sent to the model: server tools, then client tools
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = self.server_tools.definitions();
        definitions.extend(self.client_tools.definitions().iter().cloned());
        definitions
    }

    /// Start a batch. Nothing runs until the first [`BatchRun::next_step`].
    pub fn execute_batch<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        invocations: Vec<ToolInvocation>,
        cancel: CancellationToken,
    ) -> BatchRun<'a> {
        let queue: VecDeque<_> = dedup_invocations(invocations).into();
        tracing::debug!(conv_id = %conversation.id(), invocations = queue.len(), "Starting tool batch");
        BatchRun {
            engine: self,
            conversation,
            queue,
            in_flight: None,
            cancel,
            finished: false,
        }
    }

    /// Fold client results into a suspended conversation and continue its batch.
    ///
    /// The stored continuation is decoded before anything is touched, so a
    /// malformed one fails without side effects. Results that were already
    /// applied are skipped, and a delivery that does not answer the
    /// outstanding interaction leaves the suspension in place: replaying a
    /// resume is a no-op that returns an empty run.
    pub fn resume<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        results: Vec<ClientInteractionResult>,
        cancel: CancellationToken,
    ) -> Result<BatchRun<'a>, EngineError> {
        let continuation = conversation.continuation()?;
        let mut answered_outstanding = false;

        for result in results {
            let interaction_id = result.interaction_id.clone();
            if conversation.has_resolved_interaction(&interaction_id) {
                tracing::warn!(
                    conv_id = %conversation.id(),
                    interaction_id = %interaction_id,
                    "Skipping duplicate client result"
                );
                continue;
            }

            let (call_id, tool_name) = match &continuation {
                Some(state) if state.interaction_id == interaction_id => {
                    answered_outstanding = true;
                    (state.call_id.clone(), state.tool_name.clone())
                }
                Some(state) => {
                    tracing::warn!(
                        conv_id = %conversation.id(),
                        interaction_id = %interaction_id,
                        outstanding = %state.interaction_id,
                        "Skipping client result for an interaction that is not outstanding"
                    );
                    continue;
                }
                None => (interaction_id.clone(), "unknown".to_string()),
            };

            if conversation.has_tool_result(&call_id) {
                tracing::warn!(
                    conv_id = %conversation.id(),
                    call_id = %call_id,
                    "Skipping client result for a call that already has one"
                );
                continue;
            }

            let tool_result = result.into_tool_result(call_id.clone());
            let outcome = if tool_result.is_error {
                ToolOutcome::Failed
            } else {
                ToolOutcome::Completed
            };
            conversation.append(ConversationMessage::tool(tool_result))?;
            conversation.record_execution(ExecutedTool {
                call_id,
                name: tool_name,
                outcome,
                interaction_id: Some(interaction_id),
            });
        }

        let pending = match continuation {
            Some(state) if !answered_outstanding => {
                tracing::debug!(
                    conv_id = %conversation.id(),
                    interaction_id = %state.interaction_id,
                    "Outstanding interaction not answered; staying suspended"
                );
                Vec::new()
            }
            Some(state) => {
                ContinuationState::clear(conversation.properties_mut());
                conversation.set_phase(ExecutionPhase::ExecutingScene);
                state.pending_tools
            }
            None => {
                conversation.set_phase(ExecutionPhase::ExecutingScene);
                Vec::new()
            }
        };

        tracing::info!(
            conv_id = %conversation.id(),
            pending = pending.len(),
            "Resuming tool batch"
        );
        Ok(self.execute_batch(conversation, pending, cancel))
    }
}

/// A batch in progress, pulled one step at a time.
///
/// Each server invocation yields `Started`, then `Completed` or `Error` on
/// the following pull. `AwaitingClient` ends the run; so does an error.
pub struct BatchRun<'a> {
    engine: &'a ToolEngine,
    conversation: &'a mut Conversation,
    queue: VecDeque<ToolInvocation>,
    in_flight: Option<ToolInvocation>,
    cancel: CancellationToken,
    finished: bool,
}

impl BatchRun<'_> {
    /// Advance the batch by one step; `Ok(None)` once it is done
    pub async fn next_step(&mut self) -> Result<Option<ToolStep>, EngineError> {
        if self.finished {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        if let Some(invocation) = self.in_flight.take() {
            return self.run_server_tool(invocation).await.map(Some);
        }

        while let Some(invocation) = self.queue.pop_front() {
            if self.conversation.has_tool_result(&invocation.call_id) {
                tracing::debug!(
                    conv_id = %self.conversation.id(),
                    call_id = %invocation.call_id,
                    "Skipping invocation that already has a result"
                );
                continue;
            }

            if self.engine.client_tools.contains(&invocation.name) {
                return self.suspend(invocation).map(Some);
            }

            tracing::debug!(
                conv_id = %self.conversation.id(),
                call_id = %invocation.call_id,
                tool = %invocation.name,
                "Tool started"
            );
            let step = ToolStep::Started {
                call_id: invocation.call_id.clone(),
                name: invocation.name.clone(),
            };
            self.in_flight = Some(invocation);
            return Ok(Some(step));
        }

        self.finished = true;
        Ok(None)
    }

    /// Pull every remaining step
    pub async fn drain(mut self) -> Result<Vec<ToolStep>, EngineError> {
        let mut steps = Vec::new();
        while let Some(step) = self.next_step().await? {
            steps.push(step);
        }
        Ok(steps)
    }

    /// Whether the run has ended
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn cancelled(&mut self) -> EngineError {
        self.finished = true;
        tracing::info!(conv_id = %self.conversation.id(), "Tool batch cancelled");
        EngineError::Cancelled
    }

    fn suspend(&mut self, invocation: ToolInvocation) -> Result<ToolStep, EngineError> {
        let interaction_id = uuid::Uuid::new_v4().to_string();
        let state = ContinuationState {
            call_id: invocation.call_id.clone(),
            tool_name: invocation.name.clone(),
            interaction_id: interaction_id.clone(),
            pending_tools: self.queue.drain(..).collect(),
        };
        if let Err(e) = state.store(self.conversation.properties_mut()) {
            self.finished = true;
            return Err(e.into());
        }
        self.conversation.set_phase(ExecutionPhase::AwaitingClient);
        self.finished = true;

        tracing::info!(
            conv_id = %self.conversation.id(),
            call_id = %invocation.call_id,
            tool = %invocation.name,
            interaction_id = %interaction_id,
            pending = state.pending_tools.len(),
            "Suspending batch for client tool"
        );

        Ok(ToolStep::AwaitingClient {
            request: ClientInteractionRequest {
                interaction_id,
                call_id: invocation.call_id,
                tool_name: invocation.name,
                arguments: invocation.arguments,
            },
        })
    }

    async fn run_server_tool(&mut self, invocation: ToolInvocation) -> Result<ToolStep, EngineError> {
        let Some(tool) = self.engine.server_tools.get(&invocation.name).map(Arc::clone) else {
            tracing::warn!(
                conv_id = %self.conversation.id(),
                call_id = %invocation.call_id,
                tool = %invocation.name,
                "Tool not found"
            );
            let message = format!("tool '{}' not found", invocation.name);
            return self.fail(invocation, message);
        };

        let cancel = self.cancel.clone();
        let outcome = {
            let ctx = ToolContext {
                cancel: cancel.clone(),
                conversation: &*self.conversation,
                call_id: &invocation.call_id,
            };
            let arguments = Value::Object(invocation.arguments.clone());
            let execution = AssertUnwindSafe(tool.execute(arguments, ctx)).catch_unwind();
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = execution => Some(result),
            }
        };

        match outcome {
            None => Err(self.cancelled()),
            Some(Ok(Ok(payload))) => {
                tracing::debug!(
                    conv_id = %self.conversation.id(),
                    call_id = %invocation.call_id,
                    tool = %invocation.name,
                    "Tool completed"
                );
                self.conversation.append(ConversationMessage::tool(ToolResult::success(
                    invocation.call_id.clone(),
                    payload.clone(),
                )))?;
                self.conversation.record_execution(ExecutedTool {
                    call_id: invocation.call_id.clone(),
                    name: invocation.name.clone(),
                    outcome: ToolOutcome::Completed,
                    interaction_id: None,
                });
                Ok(ToolStep::Completed {
                    call_id: invocation.call_id,
                    name: invocation.name,
                    result: payload,
                })
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(
                    conv_id = %self.conversation.id(),
                    call_id = %invocation.call_id,
                    tool = %invocation.name,
                    error = %e,
                    "Tool failed"
                );
                self.fail(invocation, e.message)
            }
            Some(Err(panic)) => {
                let message = format!(
                    "tool '{}' panicked: {}",
                    invocation.name,
                    panic_message(panic.as_ref())
                );
                tracing::warn!(
                    conv_id = %self.conversation.id(),
                    call_id = %invocation.call_id,
                    tool = %invocation.name,
                    "{message}"
                );
                self.fail(invocation, message)
            }
        }
    }

    fn fail(&mut self, invocation: ToolInvocation, message: String) -> Result<ToolStep, EngineError> {
        self.conversation.append(ConversationMessage::tool(ToolResult::error(
            invocation.call_id.clone(),
            message.clone(),
        )))?;
        self.conversation.record_execution(ExecutedTool {
            call_id: invocation.call_id.clone(),
            name: invocation.name.clone(),
            outcome: ToolOutcome::Failed,
            interaction_id: None,
        });
        Ok(ToolStep::Error {
            call_id: invocation.call_id,
            name: invocation.name,
            message,
        })
    }
}

/// Rebuild the request for the interaction a conversation is parked on
pub fn outstanding_request(
    conversation: &Conversation,
) -> Result<Option<ClientInteractionRequest>, EngineError> {
    let Some(state) = conversation.continuation()? else {
        return Ok(None);
    };
    let arguments = conversation
        .messages()
        .iter()
        .flat_map(ConversationMessage::invocations)
        .find(|i| i.call_id == state.call_id)
        .map(|i| i.arguments.clone())
        .unwrap_or_default();
    Ok(Some(ClientInteractionRequest {
        interaction_id: state.interaction_id,
        call_id: state.call_id,
        tool_name: state.tool_name,
        arguments,
    }))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
