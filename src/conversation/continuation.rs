//! Continuation state persisted across a client-tool suspension
//!
//! The state lives in the conversation's property bag as plain strings so a
//! host can round-trip it through any storage. This module is the only code
//! that reads or writes those keys.

use super::message::ToolInvocation;
use std::collections::BTreeMap;
use thiserror::Error;

pub const CALL_ID_KEY: &str = "continuation.callId";
pub const TOOL_NAME_KEY: &str = "continuation.toolName";
pub const INTERACTION_ID_KEY: &str = "continuation.interactionId";
pub const PENDING_TOOLS_KEY: &str = "pendingTools";

const CONTINUATION_KEYS: [&str; 3] = [CALL_ID_KEY, TOOL_NAME_KEY, INTERACTION_ID_KEY];

/// Errors reading or writing a persisted continuation
#[derive(Debug, Error)]
pub enum ContinuationError {
    #[error("Cannot encode pendingTools: {0}")]
    EncodePendingTools(#[source] serde_json::Error),
    #[error("Corrupt pendingTools property: {0}")]
    CorruptPendingTools(#[source] serde_json::Error),
    #[error("Continuation property {0} is missing")]
    MissingKey(&'static str),
}

/// Everything needed to resume a suspended batch
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationState {
    /// Call id of the invocation awaiting the client
    pub call_id: String,
    /// Name of the tool awaiting the client
    pub tool_name: String,
    /// Interaction id handed to the client with the request
    pub interaction_id: String,
    /// Invocations of the batch that were not yet run
    pub pending_tools: Vec<ToolInvocation>,
}

impl ContinuationState {
    /// Write the state into a property bag, replacing any previous continuation.
    ///
    /// The bag is left untouched when encoding fails.
    pub fn store(&self, properties: &mut BTreeMap<String, String>) -> Result<(), ContinuationError> {
        let pending = serde_json::to_string(&self.pending_tools)
            .map_err(ContinuationError::EncodePendingTools)?;
        properties.insert(CALL_ID_KEY.to_string(), self.call_id.clone());
        properties.insert(TOOL_NAME_KEY.to_string(), self.tool_name.clone());
        properties.insert(INTERACTION_ID_KEY.to_string(), self.interaction_id.clone());
        properties.insert(PENDING_TOOLS_KEY.to_string(), pending);
        Ok(())
    }

    /// Read the state from a property bag.
    ///
    /// Returns `Ok(None)` when no continuation is stored. A partially written
    /// continuation or an unparseable `pendingTools` value is an error: the
    /// caller has no other way to learn that suspended work was lost.
    pub fn load(properties: &BTreeMap<String, String>) -> Result<Option<Self>, ContinuationError> {
        let present = CONTINUATION_KEYS
            .iter()
            .filter(|key| properties.contains_key(**key))
            .count();

        let pending_tools = match properties.get(PENDING_TOOLS_KEY) {
            Some(raw) => serde_json::from_str::<Vec<ToolInvocation>>(raw)
                .map_err(ContinuationError::CorruptPendingTools)?,
            None => Vec::new(),
        };

        if present == 0 {
            if pending_tools.is_empty() {
                return Ok(None);
            }
            return Err(ContinuationError::MissingKey(CALL_ID_KEY));
        }

        let get = |key: &'static str| {
            properties
                .get(key)
                .cloned()
                .ok_or(ContinuationError::MissingKey(key))
        };

        Ok(Some(Self {
            call_id: get(CALL_ID_KEY)?,
            tool_name: get(TOOL_NAME_KEY)?,
            interaction_id: get(INTERACTION_ID_KEY)?,
            pending_tools,
        }))
    }

    /// Remove every continuation key, leaving unrelated properties alone
    pub fn clear(properties: &mut BTreeMap<String, String>) {
        for key in CONTINUATION_KEYS {
            properties.remove(key);
        }
        properties.remove(PENDING_TOOLS_KEY);
    }
}
