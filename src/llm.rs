//! LLM adapter contract.
//!
//! The core never talks to a provider directly; it hands an ordered message
//! history and the node's tool list to an [`LlmClient`] and gets back text,
//! structurally-parsed tool calls, and usage numbers. Provider adapters
//! (HTTP clients, local models, test scripts) implement this trait outside
//! the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::tools::ToolSchema;

/// Who authored a message in the event-loop history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a tool invocation fed back to the model.
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in an event-loop conversation.
///
/// # Examples
///
/// ```
/// use agentloom::llm::{ChatMessage, Role};
///
/// let sys = ChatMessage::system("You are a triage agent.");
/// let user = ChatMessage::user("Summarize ticket T-42");
/// assert_eq!(sys.role, Role::System);
/// assert_eq!(user.content, "Summarize ticket T-42");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// A tool invocation requested by the model, parsed structurally by the
/// adapter (never scraped out of prose).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

/// Token and latency accounting for one completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
}

impl Usage {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One completion from the adapter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl Completion {
    /// Plain-text completion with no tool calls.
    #[must_use]
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Completion consisting of a single tool call.
    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest {
                name: name.into(),
                arguments,
            }],
            ..Default::default()
        }
    }
}

/// Errors from the LLM adapter. These are step-local: the event loop
/// records them and keeps going rather than failing the run.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("LLM rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("LLM call timed out")]
    Timeout,

    #[error("LLM provider error ({provider}): {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
}

impl LlmError {
    /// Rate limits and transient unavailability are worth another attempt.
    #[must_use]
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::Unavailable { .. }
        )
    }
}

/// The adapter contract the core consumes.
///
/// `complete_batch` has a default per-request implementation so providers
/// without native batching degrade transparently.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion over the message history with the given tools.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<Completion, LlmError>;

    /// Batched completion; defaults to sequential per-request calls.
    async fn complete_batch(
        &self,
        requests: &[Vec<ChatMessage>],
        tools: &[ToolSchema],
    ) -> Result<Vec<Completion>, LlmError> {
        let mut out = Vec::with_capacity(requests.len());
        for messages in requests {
            out.push(self.complete(messages, tools).await?);
        }
        Ok(out)
    }
}
