//! Reasoning Loop
//!
//! Implements the ReAct (Reason + Act) pattern for agent behavior.
//! The agent observes, thinks, acts (via tools), and responds.
//!
//! Each step sends the system prompt, the prior history and the turn so far
//! to the provider. A reply holding a tool invocation is executed and its
//! result appended; any other reply ends the turn. After `max_steps` tool
//! steps one more call is made with tools forbidden, so a turn costs at most
//! `max_steps + 1` model calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message, Role};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::tool::{Tool, ToolCall, ToolCallRecord, ToolKind, ToolResult, ToolTable};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Maximum tool steps before the answer is forced
    pub max_steps: usize,

    /// Extra attempts for a provider call that failed transiently
    pub max_provider_retries: u32,

    /// Delay before the first provider retry; doubles each attempt
    pub retry_backoff: Duration,

    /// Generation options
    pub generation: GenerationOptions,

    /// Whether to append tool descriptions to system prompt
    pub inject_tool_descriptions: bool,
}

pub const DEFAULT_MAX_STEPS: usize = 8;

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_steps: DEFAULT_MAX_STEPS,
            max_provider_retries: 2,
            retry_backoff: Duration::from_millis(500),
            generation: GenerationOptions::default(),
            inject_tool_descriptions: true,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant.

When you need to use a tool, respond with a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

After receiving tool results, synthesize them into a helpful response.
If you can answer directly without tools, do so.
Be concise and accurate."#;

const FINALIZE_INSTRUCTION: &str = "Tool limit reached. Do not call any more tools. \
Answer the user now using only the information already gathered, and say what is still uncertain.";

/// Answer used when the forced final call produces nothing usable
pub const FALLBACK_ANSWER: &str = "I wasn't able to finish working through this question. \
Please try asking again, perhaps with more specific details about your plants.";

/// Everything a completed turn produced
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    /// Final assistant message
    pub reply: Message,

    /// Executed tool calls, in order
    pub tool_calls: Vec<ToolCallRecord>,

    /// User message, tool result messages and the reply, ready to persist
    pub new_messages: Vec<Message>,

    /// The step ceiling forced the answer
    pub truncated: bool,

    /// User-facing notes about degraded results
    pub warnings: Vec<String>,
}

/// Progress notifications from [`Agent::run_streaming`]
#[derive(Clone, Debug)]
pub enum TurnEvent {
    ToolStarted { name: String, id: Option<String> },
    ToolFinished(ToolCallRecord),
    /// Fragment of the final answer
    Delta(String),
    /// Deltas streamed since the last tool event were preamble to a tool
    /// call, not part of the answer; drop them
    Retract,
    /// End of turn
    Done(Box<TurnOutcome>),
}

/// What a model reply asks for
#[derive(Debug)]
enum Invocation {
    Answer,
    Call(ToolCall),
    Malformed(String),
}

const TOOL_FENCE: &str = "```tool";
const FENCE: &str = "```";

/// Classify a model reply as a tool call or a final answer.
///
/// A fenced ```` ```tool ```` block must hold valid JSON, otherwise the reply
/// is reported as malformed. Outside a fence, a JSON object carrying a
/// `"tool"` key counts as a call.
fn parse_invocation(content: &str) -> Invocation {
    if let Some(start_idx) = content.find(TOOL_FENCE) {
        let after_marker = &content[start_idx + TOOL_FENCE.len()..];
        let Some(end_idx) = after_marker.find(FENCE) else {
            return Invocation::Malformed("tool block is missing its closing ```".into());
        };
        let json_str = after_marker[..end_idx].trim();

        return match serde_json::from_str::<ToolCall>(json_str) {
            Ok(call) if !call.name.trim().is_empty() => Invocation::Call(with_call_id(call)),
            Ok(_) => Invocation::Malformed("tool block has an empty tool name".into()),
            Err(e) => Invocation::Malformed(format!("tool block is not valid JSON: {e}")),
        };
    }

    parse_inline_tool_call(content).map_or(Invocation::Answer, |call| Invocation::Call(with_call_id(call)))
}

/// Try to parse inline JSON tool call
fn parse_inline_tool_call(content: &str) -> Option<ToolCall> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<ToolCall>(&content[start..=end])
        .ok()
        .filter(|call| !call.name.trim().is_empty())
}

fn with_call_id(mut call: ToolCall) -> ToolCall {
    if call.id.is_none() {
        call.id = Some(uuid::Uuid::new_v4().to_string());
    }
    call
}

/// Remove fenced tool blocks, leaving only prose
fn strip_tool_blocks(content: &str) -> String {
    let mut out = String::new();
    let mut rest = content;
    while let Some(start) = rest.find(TOOL_FENCE) {
        out.push_str(&rest[..start]);
        let after = &rest[start + TOOL_FENCE.len()..];
        rest = after.find(FENCE).map_or("", |end| &after[end + FENCE.len()..]);
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Tool message plus the bookkeeping it produced
struct Dispatched {
    message: Message,
    record: Option<ToolCallRecord>,
    warning: Option<String>,
}

/// In-flight turn state
struct Turn {
    context: Conversation,
    new_messages: Vec<Message>,
    records: Vec<ToolCallRecord>,
    warnings: Vec<String>,
}

impl Turn {
    fn finish(self, reply: Message, truncated: bool) -> TurnOutcome {
        let mut new_messages = self.new_messages;
        new_messages.push(reply.clone());
        TurnOutcome {
            reply,
            tool_calls: self.records,
            new_messages,
            truncated,
            warnings: self.warnings,
        }
    }
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolTable>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolTable>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolTable>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Build the full system prompt including tool descriptions
    fn build_system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tools.generate_prompt_section());
        }

        prompt
    }

    fn start_turn(&self, history: &[Message], user_message: String) -> Turn {
        let user = Message::user(user_message);
        let context = Conversation::with_system_prompt(self.build_system_prompt())
            .extended(history.iter().filter(|m| m.role != Role::System).cloned())
            .with(user.clone());

        Turn {
            context,
            new_messages: vec![user],
            records: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Run one user turn against prior history
    pub async fn run(&self, history: &[Message], user_message: impl Into<String>) -> Result<TurnOutcome> {
        self.drive(history, user_message.into(), None).await
    }

    /// Run one user turn, reporting progress on `sink`.
    ///
    /// The final event is always [`TurnEvent::Done`] when the turn succeeds.
    /// A closed receiver does not stop the turn.
    pub async fn run_streaming(
        &self,
        history: &[Message],
        user_message: impl Into<String>,
        sink: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome> {
        let outcome = self.drive(history, user_message.into(), Some(&sink)).await?;
        let _ = sink.send(TurnEvent::Done(Box::new(outcome.clone()))).await;
        Ok(outcome)
    }

    /// Run with a simple string input and no history
    pub async fn ask(&self, question: &str) -> Result<String> {
        Ok(self.run(&[], question).await?.reply.content)
    }

    async fn drive(
        &self,
        history: &[Message],
        user_message: String,
        sink: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnOutcome> {
        let mut turn = self.start_turn(history, user_message);

        for step in 0..self.config.max_steps {
            let (content, held_back) = self.model_step(&turn.context, sink).await?;
            let invocation = parse_invocation(&content);

            if let Some(sink) = sink {
                let streamed_live = content.len() > held_back.len();
                if streamed_live && !matches!(invocation, Invocation::Answer) {
                    let _ = sink.send(TurnEvent::Retract).await;
                }
            }

            match invocation {
                Invocation::Answer => {
                    if let (Some(sink), false) = (sink, held_back.is_empty()) {
                        let _ = sink.send(TurnEvent::Delta(held_back)).await;
                    }
                    tracing::debug!(step, tools = turn.records.len(), "Turn answered");
                    let reply = Message::assistant(content).with_model(&self.config.generation.model);
                    return Ok(turn.finish(reply, false));
                }
                Invocation::Call(call) => {
                    turn.context = turn.context.with(Message::assistant(content));
                    self.apply_call(&mut turn, call, sink).await;
                }
                Invocation::Malformed(reason) => {
                    tracing::debug!(step, %reason, "Malformed tool block");
                    let feedback = Message::tool(
                        format!(
                            "[Tool call rejected]\nError: {reason}. Reply with a ```tool block holding \
                             {{\"tool\": ..., \"arguments\": {{...}}}} or answer directly."
                        ),
                        None,
                    );
                    turn.context = turn.context.with(Message::assistant(content)).with(feedback.clone());
                    turn.new_messages.push(feedback);
                }
            }
        }

        self.finalize(turn, sink).await
    }

    /// Force an answer once the step ceiling is reached
    async fn finalize(&self, mut turn: Turn, sink: Option<&mpsc::Sender<TurnEvent>>) -> Result<TurnOutcome> {
        let limit = AgentError::StepLimitExceeded(self.config.max_steps);
        tracing::warn!(max_steps = self.config.max_steps, "{limit}; forcing final answer");

        turn.context = turn.context.with(Message::system(FINALIZE_INSTRUCTION));
        let window = turn.context.context_window();
        let completion = self
            .with_retry(|| self.provider.complete(&window, &self.config.generation))
            .await?;

        let mut text = strip_tool_blocks(&completion.content);
        if text.is_empty() || matches!(parse_invocation(&text), Invocation::Call(_)) {
            text = FALLBACK_ANSWER.to_string();
        }
        if let Some(sink) = sink {
            let _ = sink.send(TurnEvent::Delta(text.clone())).await;
        }

        turn.warnings.push(limit.user_message());
        let reply = Message::assistant(text).with_model(&self.config.generation.model);
        Ok(turn.finish(reply, true))
    }

    /// One model call. With a sink, answer text is forwarded as it arrives
    /// until a fence or brace shows up; the rest is returned as held back.
    async fn model_step(
        &self,
        context: &Conversation,
        sink: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<(String, String)> {
        let window = context.context_window();
        let options = &self.config.generation;

        let Some(sink) = sink else {
            let completion = self.with_retry(|| self.provider.complete(&window, options)).await?;
            if let Some(usage) = &completion.usage {
                tracing::debug!(
                    model = %completion.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model call"
                );
            }
            return Ok((completion.content, String::new()));
        };

        let mut stream = self
            .with_retry(|| self.provider.complete_stream(&window, options))
            .await?;

        let mut content = String::new();
        let mut held = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            content.push_str(&chunk.delta);

            if !held.is_empty() {
                held.push_str(&chunk.delta);
            } else if let Some(pos) = chunk.delta.find(['`', '{']) {
                if pos > 0 {
                    let _ = sink.send(TurnEvent::Delta(chunk.delta[..pos].to_string())).await;
                }
                held.push_str(&chunk.delta[pos..]);
            } else if !chunk.delta.is_empty() {
                let _ = sink.send(TurnEvent::Delta(chunk.delta)).await;
            }

            if chunk.done {
                break;
            }
        }

        Ok((content, held))
    }

    async fn apply_call(&self, turn: &mut Turn, call: ToolCall, sink: Option<&mpsc::Sender<TurnEvent>>) {
        if let Some(sink) = sink {
            let _ = sink
                .send(TurnEvent::ToolStarted {
                    name: call.name.clone(),
                    id: call.id.clone(),
                })
                .await;
        }

        let dispatched = self.dispatch(call).await;

        if let Some(record) = dispatched.record {
            if let Some(sink) = sink {
                let _ = sink.send(TurnEvent::ToolFinished(record.clone())).await;
            }
            turn.records.push(record);
        }
        if let Some(warning) = dispatched.warning {
            if !turn.warnings.contains(&warning) {
                turn.warnings.push(warning);
            }
        }
        turn.context = std::mem::take(&mut turn.context).with(dispatched.message.clone());
        turn.new_messages.push(dispatched.message);
    }

    /// Execute a tool call; every failure becomes feedback for the model
    async fn dispatch(&self, call: ToolCall) -> Dispatched {
        let kind = match self.tools.resolve(&call.name) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::debug!(tool = %call.name, "Unknown tool requested");
                let output = format!(
                    "[Tool '{}' failed]\nError: {e}. Available tools: {}",
                    call.name,
                    self.tools.names()
                );
                return Dispatched {
                    message: Message::tool(output, call.id),
                    record: None,
                    warning: None,
                };
            }
        };

        tracing::debug!(tool = %kind, "Executing tool");
        let result = match self.tools.execute(kind, &call).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(tool = %kind, error = %e, "Tool call rejected");
                ToolResult::failure(kind.name(), format!("Error: {e}"))
            }
        };

        let warning = result.degraded.then(|| {
            tracing::warn!(tool = %kind, "Tool returned a degraded result");
            result.output.clone()
        });

        let record = ToolCallRecord {
            tool: kind,
            id: call.id.clone(),
            arguments: call.arguments,
            result: result.output.clone(),
            success: result.success,
        };

        Dispatched {
            message: Message::tool(Self::format_tool_result(kind, &result), call.id).with_tool_call(record.clone()),
            record: Some(record),
            warning,
        }
    }

    /// Format tool result for conversation
    fn format_tool_result(kind: ToolKind, result: &ToolResult) -> String {
        if result.success {
            format!("[Tool '{kind}' returned]\n{}", result.output)
        } else {
            format!("[Tool '{kind}' failed]\n{}", result.output)
        }
    }

    /// Retry transient provider failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_provider_retries => {
                    let delay = self.config.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        provider = self.provider.name(),
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the tool table
    pub fn tools(&self) -> &ToolTable {
        &self.tools
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolTable,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolTable::new(),
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolTable) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    #[must_use]
    pub const fn max_provider_retries(mut self, retries: u32) -> Self {
        self.config.max_provider_retries = retries;
        self
    }

    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        Ok(Agent::new(provider, Arc::new(self.tools), self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedProvider};
    use crate::tool::{ParameterSchema, ToolSchema};
    use async_trait::async_trait;

    struct SoilTestTool;

    #[async_trait]
    impl Tool for SoilTestTool {
        fn kind(&self) -> ToolKind {
            ToolKind::PhCalculator
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "ph_calculator".into(),
                description: "Soil pH".into(),
                parameters: vec![ParameterSchema::required("current_ph", "number", "pH")],
            }
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
            let ph = call.number("current_ph")?.unwrap_or_default();
            if ph > 14.0 {
                return Err(AgentError::ToolValidation("pH must be within 0-14".into()));
            }
            Ok(ToolResult::success("ph_calculator", format!("Add 2.6 kg lime (pH {ph})")))
        }
    }

    struct OfflineKnowledge;

    #[async_trait]
    impl Tool for OfflineKnowledge {
        fn kind(&self) -> ToolKind {
            ToolKind::KnowledgeBase
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "knowledge_base".into(),
                description: "Docs".into(),
                parameters: vec![ParameterSchema::required("query", "string", "Query")],
            }
        }

        async fn execute(&self, _call: &ToolCall) -> Result<ToolResult> {
            Ok(ToolResult::degraded("knowledge_base", "Could not access the knowledge base"))
        }
    }

    const PH_CALL: &str = "Let me calculate.\n```tool\n{\"tool\": \"ph_calculator\", \"arguments\": {\"current_ph\": 5.5}}\n```";

    fn agent(provider: Arc<ScriptedProvider>, max_steps: usize) -> Agent {
        AgentBuilder::new()
            .provider(provider)
            .tool(Arc::new(SoilTestTool))
            .tool(Arc::new(OfflineKnowledge))
            .max_steps(max_steps)
            .retry_backoff(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_tool_call() {
        let Invocation::Call(call) = parse_invocation(PH_CALL) else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, "ph_calculator");
        assert!(call.id.is_some());

        let inline = r#"{"tool": "npk_calculator", "arguments": {"amount_g": 10}}"#;
        assert!(matches!(parse_invocation(inline), Invocation::Call(_)));

        assert!(matches!(parse_invocation("Water in the morning."), Invocation::Answer));
        assert!(matches!(parse_invocation("Use a {light} touch."), Invocation::Answer));
        assert!(matches!(
            parse_invocation("```tool\n{not json}\n```"),
            Invocation::Malformed(_)
        ));
        assert!(matches!(parse_invocation("```tool\n{\"tool\": \"x\"}"), Invocation::Malformed(_)));
    }

    #[test]
    fn test_strip_tool_blocks() {
        assert_eq!(strip_tool_blocks(PH_CALL), "Let me calculate.");
        assert_eq!(strip_tool_blocks("```tool\n{}\n```"), "");
        assert_eq!(strip_tool_blocks("plain"), "plain");
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let provider = Arc::new(ScriptedProvider::new(["Tomatoes like full sun."]));
        let outcome = agent(provider.clone(), 8).run(&[], "Where do tomatoes grow best?").await.unwrap();

        assert_eq!(outcome.reply.content, "Tomatoes like full sun.");
        assert!(outcome.tool_calls.is_empty());
        assert!(!outcome.truncated);
        assert_eq!(outcome.new_messages.len(), 2);
        assert_eq!(outcome.new_messages[0].role, Role::User);
        assert_eq!(outcome.new_messages[1].role, Role::Assistant);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let provider = Arc::new(ScriptedProvider::new([PH_CALL, "Spread 2.6 kg of lime."]));
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let outcome = agent(provider.clone(), 8).run(&history, "My soil is pH 5.5").await.unwrap();

        assert_eq!(outcome.tool_calls.len(), 1);
        let record = &outcome.tool_calls[0];
        assert_eq!(record.tool, ToolKind::PhCalculator);
        assert!(record.success);
        assert!(record.result.contains("2.6 kg lime"));

        let roles: Vec<Role> = outcome.new_messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
        assert_eq!(outcome.new_messages[1].tool_call(), Some(record));

        // Second call sees system prompt, history, user, tool request and tool result
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 6);
        assert_eq!(calls[1][0].role, Role::System);
        assert!(calls[1][0].content.contains("### ph_calculator"));
        assert_eq!(calls[1][5].role, Role::Tool);
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let bad_args = "```tool\n{\"tool\": \"ph_calculator\", \"arguments\": {\"current_ph\": 20}}\n```";
        let unknown = "```tool\n{\"tool\": \"weather\", \"arguments\": {}}\n```";
        let provider = Arc::new(ScriptedProvider::new([bad_args, unknown, "Please re-test your soil."]));
        let outcome = agent(provider.clone(), 8).run(&[], "pH 20?").await.unwrap();

        assert_eq!(outcome.reply.content, "Please re-test your soil.");
        // Unknown tools leave no record
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(!outcome.tool_calls[0].success);
        assert!(outcome.tool_calls[0].result.contains("0-14"));

        let last_call = provider.calls().pop().unwrap();
        let feedback = &last_call[last_call.len() - 1];
        assert_eq!(feedback.role, Role::Tool);
        assert!(feedback.content.contains("weather"));
        assert!(feedback.content.contains("knowledge_base, ph_calculator"));
    }

    #[tokio::test]
    async fn test_malformed_block_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::new(["```tool\n{oops}\n```", "Done."]));
        let outcome = agent(provider.clone(), 8).run(&[], "hi").await.unwrap();

        assert_eq!(outcome.reply.content, "Done.");
        assert!(outcome.tool_calls.is_empty());
        assert!(provider.calls()[1].last().unwrap().content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_step_ceiling_terminates_loop() {
        let block_only = "```tool\n{\"tool\": \"ph_calculator\", \"arguments\": {\"current_ph\": 5.5}}\n```";
        let provider = Arc::new(ScriptedProvider::repeating(block_only));
        let outcome = agent(provider.clone(), 3).run(&[], "loop forever").await.unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.tool_calls.len(), 3);
        assert_eq!(provider.call_count(), 4);
        // Finalization text is only a tool block, so the fallback is used
        assert_eq!(outcome.reply.content, FALLBACK_ANSWER);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.new_messages.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_step_ceiling_keeps_finalization_prose() {
        let provider = Arc::new(ScriptedProvider::new([PH_CALL, PH_CALL, "Use 2.6 kg of lime."]));
        let outcome = agent(provider.clone(), 2).run(&[], "pH 5.5").await.unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.reply.content, "Use 2.6 kg of lime.");
        let final_prompt = provider.calls().pop().unwrap();
        assert!(final_prompt.last().unwrap().content.contains("Do not call any more tools"));
    }

    #[tokio::test]
    async fn test_degraded_tool_adds_warning() {
        let search = "```tool\n{\"tool\": \"knowledge_base\", \"arguments\": {\"query\": \"blight\"}}\n```";
        let provider = Arc::new(ScriptedProvider::new([search, search, "General advice."]));
        let outcome = agent(provider, 8).run(&[], "Blight?").await.unwrap();

        assert_eq!(outcome.tool_calls.len(), 2);
        assert_eq!(outcome.warnings, vec!["Could not access the knowledge base".to_string()]);
    }

    #[tokio::test]
    async fn test_provider_retry() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptStep::Unavailable("connection refused".into()),
            ScriptStep::Reply("Recovered.".into()),
        ]));
        let outcome = agent(provider.clone(), 8).run(&[], "hi").await.unwrap();
        assert_eq!(outcome.reply.content, "Recovered.");
        assert_eq!(provider.call_count(), 2);

        let failing = Arc::new(ScriptedProvider::new([ScriptStep::Fail("bad model".into())]));
        let err = agent(failing.clone(), 8).run(&[], "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert_eq!(failing.call_count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_events() {
        let provider = Arc::new(ScriptedProvider::new([PH_CALL, "Spread 2.6 kg of lime in spring."]));
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = agent(provider, 8).run_streaming(&[], "pH 5.5", tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.last(), Some(TurnEvent::Done(_))));
        let started = events
            .iter()
            .position(|e| matches!(e, TurnEvent::ToolStarted { .. }))
            .unwrap();
        let finished = events
            .iter()
            .position(|e| matches!(e, TurnEvent::ToolFinished(_)))
            .unwrap();
        assert!(started < finished);

        // Text after the fence is never streamed
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Delta(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(!streamed.contains("```"));
        assert!(streamed.starts_with("Let me calculate."));
        assert_eq!(client_view(&events), outcome.reply.content);
    }

    /// Concatenate deltas the way a client would, dropping retracted text
    fn client_view(events: &[TurnEvent]) -> String {
        let mut text = String::new();
        for event in events {
            match event {
                TurnEvent::Delta(delta) => text.push_str(delta),
                TurnEvent::Retract => text.clear(),
                _ => {}
            }
        }
        text
    }

    #[tokio::test]
    async fn test_streamed_preamble_is_retracted() {
        let provider = Arc::new(ScriptedProvider::new([
            PH_CALL,
            "Checking the numbers.\n```tool\n{not json}\n```",
            "Spread 2.6 kg of lime in spring.",
        ]));
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = agent(provider, 8).run_streaming(&[], "pH 5.5", tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let retracts: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, TurnEvent::Retract))
            .map(|(i, _)| i)
            .collect();
        let started = events
            .iter()
            .position(|e| matches!(e, TurnEvent::ToolStarted { .. }))
            .unwrap();
        assert_eq!(retracts.len(), 2);
        assert!(retracts[0] < started);
        assert_eq!(client_view(&events), outcome.reply.content);
        assert_eq!(outcome.reply.content, "Spread 2.6 kg of lime in spring.");
    }

    #[tokio::test]
    async fn test_direct_answer_streams_without_retract() {
        let answer = "Water basil when the top {inch} of soil is dry.";
        let provider = Arc::new(ScriptedProvider::new([answer]));
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = agent(provider, 8).run_streaming(&[], "basil?", tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(!events.iter().any(|e| matches!(e, TurnEvent::Retract)));
        assert_eq!(client_view(&events), answer);
        assert_eq!(outcome.reply.content, answer);
    }

    #[tokio::test]
    async fn test_large_retry_count_does_not_overflow_backoff() {
        let mut steps: Vec<ScriptStep> = (0..34)
            .map(|_| ScriptStep::Unavailable("connection refused".into()))
            .collect();
        steps.push(ScriptStep::Reply("Recovered.".into()));
        let provider = Arc::new(ScriptedProvider::new(steps));
        let agent = AgentBuilder::new()
            .provider(provider.clone())
            .max_provider_retries(40)
            .retry_backoff(Duration::ZERO)
            .build()
            .unwrap();

        assert_eq!(agent.ask("hi").await.unwrap(), "Recovered.");
        assert_eq!(provider.call_count(), 35);
    }
}
