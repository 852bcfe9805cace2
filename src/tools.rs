//! Tool dispatch contract and the in-process tool registry.
//!
//! Nodes name the tools they may call; at run start every name must
//! resolve in the [`ToolDispatcher`]. Dispatch failures are structured
//! ([`ToolFailure`] with a kind and a retriable flag) and are fed back to
//! the model rather than terminating the visit.
//!
//! `set_output` is special: it is injected into every node's tool list and
//! handled by the node runtime itself, never forwarded to a dispatcher.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

/// Name of the privileged output tool handled by the node runtime.
pub const SET_OUTPUT: &str = "set_output";

/// Descriptor advertised to the LLM and listed by dispatchers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub argument_schema: Value,
}

impl ToolSchema {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        argument_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            argument_schema,
        }
    }
}

/// Category of a structured tool failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    Transport,
    Auth,
    RateLimit,
    InvalidArguments,
    NotFound,
    Timeout,
    Internal,
}

/// Structured tool error returned to the model and the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
    pub retriable: bool,
}

impl ToolFailure {
    #[must_use]
    pub fn new(kind: ToolFailureKind, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable,
        }
    }

    #[must_use]
    pub fn not_found(tool: &str) -> Self {
        Self::new(
            ToolFailureKind::NotFound,
            format!("unknown tool: {tool}"),
            false,
        )
    }

    #[must_use]
    pub fn timeout(tool: &str) -> Self {
        Self::new(
            ToolFailureKind::Timeout,
            format!("tool {tool} timed out"),
            true,
        )
    }

    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolFailureKind::InvalidArguments, message, false)
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one tool invocation.
pub type ToolResult = Result<Value, ToolFailure>;

/// Serialize a tool outcome into the `{ok, result?/error?}` wire shape used
/// by message history and the event log.
#[must_use]
pub fn tool_result_payload(result: &ToolResult) -> Value {
    match result {
        Ok(value) => json!({"ok": true, "result": value}),
        Err(failure) => json!({"ok": false, "error": failure}),
    }
}

/// Contract the node runtime uses to invoke named tools.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Invoke a named tool with a JSON argument object.
    async fn invoke(&self, tool: &str, arguments: Value) -> ToolResult;

    /// Advertise all tools this dispatcher can serve.
    fn list(&self) -> Vec<ToolSchema>;

    /// Whether `name` resolves here. Defaults to a scan of [`list`](Self::list).
    fn resolves(&self, name: &str) -> bool {
        self.list().iter().any(|t| t.name == name)
    }
}

/// Handler signature for registry-hosted tools.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ToolResult> + Send + Sync>;

struct RegisteredTool {
    schema: ToolSchema,
    handler: ToolHandler,
}

/// In-process tool registry: name → typed descriptor + handler.
///
/// This is the concrete dispatcher for tools hosted inside the process;
/// remote dispatchers (MCP and friends) implement [`ToolDispatcher`]
/// themselves.
///
/// # Examples
///
/// ```
/// use agentloom::tools::{ToolRegistry, ToolSchema};
/// use serde_json::json;
///
/// let mut registry = ToolRegistry::new();
/// registry.register(
///     ToolSchema::new("echo", "Echo the arguments back", json!({"type": "object"})),
///     |args| Box::pin(async move { Ok(args) }),
/// );
/// assert!(registry.contains("echo"));
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: FxHashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces the handler.
    pub fn register<F>(&mut self, schema: ToolSchema, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, ToolResult> + Send + Sync + 'static,
    {
        let name = schema.name.clone();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(
            name,
            RegisteredTool {
                schema,
                handler: Arc::new(handler),
            },
        );
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn invoke(&self, tool: &str, arguments: Value) -> ToolResult {
        match self.tools.get(tool) {
            Some(registered) => (registered.handler)(arguments).await,
            None => Err(ToolFailure::not_found(tool)),
        }
    }

    fn list(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.schema.clone())
            .collect()
    }

    fn resolves(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// Build the `set_output` schema for a node's declared output keys.
///
/// The argument object accepts exactly the node's output keys; the node
/// runtime validates the call against this declaration at the boundary.
#[must_use]
pub fn set_output_schema(output_keys: &[String]) -> ToolSchema {
    let properties: serde_json::Map<String, Value> = output_keys
        .iter()
        .map(|k| (k.clone(), json!({})))
        .collect();
    ToolSchema::new(
        SET_OUTPUT,
        "Write the node's declared output keys to shared memory. \
         Call this once your result is ready; partial results are acceptable \
         when alternatives are exhausted.",
        json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        }),
    )
}
