use crate::cancel::CancellationFlag;
use crate::conversation::{AssistantContent, Conversation, ConversationError};
use crate::outcome::{FailureKind, JobFailure};
use crate::prompt;
use crate::provider::{ChatRequest, LlmClient, ModelParams};
use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolContext};
use chrono::Utc;
use maidx_core::answer::parse_answer;
use maidx_core::{
    Document, ExtractionConfig, ExtractionResult, ExtractionSchema, FieldDefect, Provenance, Record,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// States of the per-document conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    AwaitingModel,
    DispatchingTools,
    Finalized,
    Failed,
}

/// What to do with one assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyAction {
    /// Execute these calls in order, then ask the model again.
    Dispatch(Vec<ToolCall>),
    /// The answer verified; this is the final record.
    Finalize(Record),
    /// The answer failed verification; send a corrective turn.
    Correct(Vec<FieldDefect>),
    Fail(JobFailure),
}

impl ReplyAction {
    pub fn next_state(&self) -> EngineState {
        match self {
            Self::Dispatch(_) => EngineState::DispatchingTools,
            Self::Finalize(_) => EngineState::Finalized,
            Self::Correct(_) => EngineState::AwaitingModel,
            Self::Fail(_) => EngineState::Failed,
        }
    }
}

/// Transition out of `AwaitingModel` for one reply.
///
/// Tool calls take precedence over any text in the same reply. A final
/// answer is parsed from its code fence and coerced against the schema;
/// defects earn a corrective turn until `max_corrections` are used.
pub fn classify_reply(
    reply: &AssistantContent,
    schema: &ExtractionSchema,
    corrections_used: u32,
    max_corrections: u32,
) -> ReplyAction {
    if !reply.tool_calls.is_empty() {
        return ReplyAction::Dispatch(reply.tool_calls.clone());
    }

    let text = reply.text.as_deref().unwrap_or_default();
    let defects = match parse_answer(text) {
        Ok(candidate) => match schema.coerce(&candidate) {
            Ok(record) => return ReplyAction::Finalize(record),
            Err(defects) => defects,
        },
        Err(defect) => vec![defect],
    };

    if corrections_used < max_corrections {
        ReplyAction::Correct(defects)
    } else {
        ReplyAction::Fail(schema_failure(&defects))
    }
}

fn schema_failure(defects: &[FieldDefect]) -> JobFailure {
    let list = defects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    JobFailure::new(FailureKind::SchemaValidation, list)
}

/// Engine limits and model parameters, resolved from [`ExtractionConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_turns: u32,
    pub max_corrections: u32,
    pub tool_prompt: Option<String>,
    pub params: ModelParams,
}

impl EngineSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_turns: config.engine.max_turns,
            max_corrections: config.engine.max_corrections,
            tool_prompt: config.engine.tool_prompt.clone(),
            params: ModelParams::from_config(&config.llm),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

/// Terminal outcome of one engine run together with its transcript.
#[derive(Debug)]
pub struct EngineRun {
    pub outcome: Result<ExtractionResult, JobFailure>,
    pub conversation: Conversation,
}

impl EngineRun {
    pub fn state(&self) -> EngineState {
        match self.outcome {
            Ok(_) => EngineState::Finalized,
            Err(_) => EngineState::Failed,
        }
    }
}

/// Drives one document's conversation: model call, tool dispatch,
/// verification, until `Finalized` or `Failed`.
///
/// Flow: System + User → LLM → ToolCalls → Execute → Results → LLM → ... → Answer
pub struct ConversationEngine {
    client: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    schema: Arc<ExtractionSchema>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        client: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        schema: Arc<ExtractionSchema>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            client,
            registry,
            schema,
            settings,
        }
    }

    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.settings.max_turns = max;
        self
    }

    pub fn with_max_corrections(mut self, max: u32) -> Self {
        self.settings.max_corrections = max;
        self
    }

    pub fn schema(&self) -> &Arc<ExtractionSchema> {
        &self.schema
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the state machine to a terminal state. Never panics on model or
    /// tool misbehaviour; every fault ends up in `outcome`.
    pub async fn run(&self, document: Arc<Document>, cancel: &CancellationFlag) -> EngineRun {
        let mut conversation = Conversation::new(
            prompt::system_prompt(&self.schema, self.settings.tool_prompt.as_deref()),
            prompt::user_content(&document),
            self.settings.max_turns,
        );
        let context = ToolContext {
            document: document.clone(),
            schema: self.schema.clone(),
        };

        let mut corrections = 0;
        let outcome = self
            .drive(&mut conversation, &context, &mut corrections, cancel)
            .await
            .map(|record| {
                ExtractionResult::new(
                    record,
                    Provenance {
                        run_id: Uuid::new_v4(),
                        document_id: document.id.clone(),
                        turns: conversation.turns(),
                        tool_calls: conversation.tool_call_count(),
                        corrections,
                        model: self.settings.params.model.clone(),
                        completed_at: Utc::now(),
                    },
                )
            });

        match &outcome {
            Ok(_) => info!(
                document_id = %document.id,
                turns = conversation.turns(),
                tool_calls = conversation.tool_call_count(),
                "Extraction finalized"
            ),
            Err(failure) => info!(
                document_id = %document.id,
                turns = conversation.turns(),
                kind = %failure.kind,
                "Extraction failed: {}", failure.message
            ),
        }

        EngineRun {
            outcome,
            conversation,
        }
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        context: &ToolContext,
        corrections: &mut u32,
        cancel: &CancellationFlag,
    ) -> Result<Record, JobFailure> {
        let mut budget = self.registry.budget();
        let mut state = EngineState::AwaitingModel;
        let mut queued: Vec<ToolCall> = Vec::new();

        loop {
            state = match state {
                EngineState::AwaitingModel => {
                    if cancel.is_cancelled() {
                        return Err(cancelled());
                    }
                    if !conversation.has_turns_left() {
                        return Err(JobFailure::new(
                            FailureKind::TurnBudgetExceeded,
                            format!("no answer within {} turns", conversation.max_turns()),
                        ));
                    }

                    let request = ChatRequest {
                        messages: conversation.messages().to_vec(),
                        tools: self.registry.definitions_for(&budget),
                        params: self.settings.params.clone(),
                    };
                    debug!(
                        document_id = %context.document.id,
                        turn = conversation.turns() + 1,
                        messages = request.messages.len(),
                        "Requesting model turn"
                    );
                    let mut reply = self
                        .client
                        .complete(request)
                        .await
                        .map_err(|e| JobFailure::from_llm(&e))?;
                    assign_call_ids(&mut reply, conversation);

                    let action = classify_reply(
                        &reply,
                        &self.schema,
                        *corrections,
                        self.settings.max_corrections,
                    );
                    conversation.push_assistant(reply).map_err(internal)?;
                    let next = action.next_state();

                    match action {
                        ReplyAction::Dispatch(calls) => queued = calls,
                        ReplyAction::Finalize(record) => return Ok(record),
                        ReplyAction::Correct(defects) => {
                            if !conversation.has_turns_left() {
                                return Err(schema_failure(&defects));
                            }
                            *corrections += 1;
                            debug!(
                                document_id = %context.document.id,
                                defects = defects.len(),
                                "Answer failed verification, requesting correction"
                            );
                            conversation
                                .push_user(prompt::correction(&defects))
                                .map_err(internal)?;
                        }
                        ReplyAction::Fail(failure) => return Err(failure),
                    }
                    next
                }
                EngineState::DispatchingTools => {
                    for call in queued.drain(..) {
                        if cancel.is_cancelled() {
                            return Err(cancelled());
                        }
                        debug!(
                            document_id = %context.document.id,
                            tool = %call.name,
                            call_id = %call.id,
                            "Dispatching tool call"
                        );
                        let result = self.registry.dispatch(&call, context, &mut budget).await;
                        let fatal = result.is_fatal().then(|| result.content.clone());
                        conversation.push_tool_result(result).map_err(internal)?;
                        if let Some(reason) = fatal {
                            return Err(JobFailure::new(FailureKind::ToolFatal, reason));
                        }
                    }
                    EngineState::AwaitingModel
                }
                EngineState::Finalized | EngineState::Failed => {
                    return Err(JobFailure::new(
                        FailureKind::Internal,
                        format!("engine resumed from terminal state {state:?}"),
                    ));
                }
            };
        }
    }
}

/// Give every call a unique id; endpoints occasionally send empty or
/// repeated ones.
fn assign_call_ids(reply: &mut AssistantContent, conversation: &Conversation) {
    let mut fresh = HashSet::new();
    for call in &mut reply.tool_calls {
        if call.id.is_empty() || conversation.has_call_id(&call.id) || !fresh.insert(call.id.clone())
        {
            let id = format!("call_{}", Uuid::new_v4().simple());
            warn!(tool = %call.name, old = %call.id, new = %id, "Replacing unusable tool call id");
            call.id = id.clone();
            fresh.insert(id);
        }
    }
}

fn cancelled() -> JobFailure {
    JobFailure::new(FailureKind::Cancelled, "job was cancelled")
}

fn internal(e: ConversationError) -> JobFailure {
    JobFailure::new(FailureKind::Internal, e.to_string())
}
