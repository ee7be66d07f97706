pub mod cancel;
pub mod conversation;
pub mod engine;
pub mod outcome;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod tool;
pub mod tools;
pub mod validate;

pub use cancel::CancellationFlag;
pub use conversation::{AssistantContent, Conversation, ConversationError, Message, UserContent};
pub use engine::{classify_reply, ConversationEngine, EngineRun, EngineSettings, EngineState, ReplyAction};
pub use outcome::{FailureKind, JobFailure};
pub use provider::{ChatRequest, LlmClient, LlmError, ModelParams};
pub use registry::{RegistryError, ToolBudget, ToolRegistry};
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolErrorKind, ToolResult};
pub use tools::{standard_registry, RunScriptTool, SchemaVerifierTool, ThinkTool, WebFetchTool};
