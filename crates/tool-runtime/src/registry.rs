use crate::tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolResult};
use crate::validate::validate_arguments;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on a single tool invocation, on top of each tool's own limits.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
    /// Calls allowed per conversation; `None` = unlimited.
    usage_limit: Option<u32>,
}

/// Manages available tools, their schemas, and lookup.
///
/// Built once at startup and shared read-only across workers; per-conversation
/// usage is tracked in a [`ToolBudget`] owned by the caller.
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Register a tool without a usage limit. Returns error if name already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.insert(Arc::new(tool), None)
    }

    /// Register a tool that may be called at most `limit` times per conversation.
    /// A limit of 0 keeps the tool registered but never advertised.
    pub fn register_with_limit(
        &mut self,
        tool: impl Tool + 'static,
        limit: u32,
    ) -> Result<(), RegistryError> {
        self.insert(Arc::new(tool), Some(limit))
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, usage_limit: Option<u32>) -> Result<(), RegistryError> {
        let definition = tool.definition();
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }
        debug!(tool = %definition.name, limit = ?usage_limit, "Registered tool");
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                tool,
                definition,
                usage_limit,
            },
        );
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.tool.clone())
    }

    /// All registered tool definitions, in registration order.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Definitions to advertise to the model given what this conversation has used.
    ///
    /// Limited tools carry a remaining-calls note; exhausted tools stay listed
    /// (the model has already seen them) but are marked unavailable.
    pub fn definitions_for(&self, budget: &ToolBudget) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| t.usage_limit != Some(0))
            .map(|t| {
                let mut def = t.definition.clone();
                if let Some(limit) = t.usage_limit {
                    let remaining = limit.saturating_sub(budget.used(&def.name));
                    if remaining > 0 {
                        def.description = format!(
                            "{}\n\nYou have {} calls to this tool left.",
                            def.description, remaining
                        );
                    } else {
                        def.description =
                            "This tool is no longer available in this conversation.".to_string();
                    }
                }
                def
            })
            .collect()
    }

    /// A fresh budget for one conversation.
    pub fn budget(&self) -> ToolBudget {
        ToolBudget::default()
    }

    /// Validate and execute one tool call.
    ///
    /// Never fails: every problem becomes a failed [`ToolResult`] so the
    /// model can correct itself.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        context: &ToolContext,
        budget: &mut ToolBudget,
    ) -> ToolResult {
        let Some(entry) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return ToolResult::failed(
                &call.id,
                ToolErrorKind::UnknownTool,
                format!("UnknownTool: no tool named '{}'", call.name),
            );
        };

        if let Some(limit) = entry.usage_limit {
            if budget.used(&call.name) >= limit {
                return ToolResult::failed(
                    &call.id,
                    ToolErrorKind::UsageLimitExceeded,
                    format!("UsageLimitExceeded: '{}' may be called {} times", call.name, limit),
                );
            }
        }

        if let Err(reason) = validate_arguments(&entry.definition.input_schema, &call.input) {
            debug!(tool = %call.name, %reason, "Rejected tool arguments");
            return ToolError::InvalidArguments(reason).into_result(&call.id);
        }

        budget.record(&call.name);
        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        let outcome =
            tokio::time::timeout(self.call_timeout, entry.tool.execute(call.input.clone(), context))
                .await
                .unwrap_or(Err(ToolError::Timeout(self.call_timeout)));

        match outcome {
            Ok(content) => ToolResult::ok(&call.id, content),
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                e.into_result(&call.id)
            }
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-conversation tool usage counters.
#[derive(Debug, Clone, Default)]
pub struct ToolBudget {
    used: HashMap<String, u32>,
}

impl ToolBudget {
    pub fn used(&self, name: &str) -> u32 {
        self.used.get(name).copied().unwrap_or(0)
    }

    fn record(&mut self, name: &str) {
        *self.used.entry(name.to_string()).or_insert(0) += 1;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("Tool '{name}' could not be set up: {reason}")]
    Setup { name: String, reason: String },
}
