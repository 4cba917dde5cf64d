//! Agent run implementation
//!
//! An [`AgentRun`] drives one user input to a final answer. It owns the
//! [`AgentContext`] for the duration of the run, calls the model through the
//! interceptor chain, hands tool calls to the [`ToolInvoker`] and reports
//! everything on an [`EventStream`]. Exactly one terminal event
//! (`Completed`, `Failed` or `Cancelled`) ends every stream.
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!  start ──▶ │ Running                                      │
//!            │  build prompt ─▶ interceptors ─▶ model       │
//!            │       ▲                            │         │
//!            │       └── merge ◀── ToolInvoker ◀──┘         │
//!            │                        ▲  │                  │
//!            │          WaitingApproval ◀┘                  │
//!            └──────────────┬───────────────────────────────┘
//!                           ▼
//!           Completed | Failed | Cancelled
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{validate_config, Config};
use crate::error::{AgentError, ErrorKind, Result};
use crate::log_component;
use crate::providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, RetryProvider, StreamEvent,
};
use crate::session::{ConversationTurn, Message, SharedHistory, ToolCall};
use crate::tools::{Tool, ToolRegistry};

use super::approval::{ApprovalDecision, ApprovalGate};
use super::context::AgentContext;
use super::eval::Evaluator;
use super::events::{
    self, CancelledEvent, CompletedEvent, ContentEvent, ErrorEvent, EvalEvent, EventEmitter,
    EventPayload, EventStream, FailedEvent, LlmCallEvent, RequestedCall, ThinkingEvent,
};
use super::interceptor::{Interceptor, InterceptorChain, ModelRequest};
use super::invoker::{Halt, ToolInvoker};
use super::tracer::{JsonlTraceSink, StepKind, Tracer};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::WaitingApproval => "waiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Handle for steering a run from outside: cancellation, approval decisions
/// and status. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunController {
    run_id: String,
    cancel: CancellationToken,
    gate: Arc<ApprovalGate>,
    status: watch::Receiver<RunStatus>,
}

impl RunController {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask the run to stop. Checked at turn boundaries and before each tool
    /// dispatch, and forwarded to the in-flight model call.
    pub fn cancel(&self) {
        info!(run_id = %self.run_id, "Cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Resolve a pending approval request. Returns `false` if nothing is
    /// pending for `call_id`.
    pub fn decide(&self, call_id: &str, decision: ApprovalDecision) -> bool {
        self.gate.resolve(call_id, decision)
    }

    pub fn approve(&self, call_id: &str) -> bool {
        self.decide(call_id, ApprovalDecision::Approved)
    }

    pub fn deny(&self, call_id: &str, reason: &str) -> bool {
        self.decide(call_id, ApprovalDecision::denied(reason))
    }

    /// Call ids awaiting a decision.
    pub fn pending_approvals(&self) -> Vec<String> {
        self.gate.pending_ids()
    }

    /// Wait until the run reaches a terminal status.
    pub async fn finished(&mut self) -> RunStatus {
        let waited = self
            .status
            .wait_for(RunStatus::is_terminal)
            .await
            .map(|status| *status);
        match waited {
            Ok(status) => status,
            Err(_) => *self.status.borrow(),
        }
    }
}

/// Builder for [`AgentRun`].
pub struct AgentRunBuilder {
    provider: Box<dyn LLMProvider>,
    config: Config,
    tools: ToolRegistry,
    interceptors: InterceptorChain,
    tracer: Option<Tracer>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    run_id: Option<String>,
    approval_timeout: Option<Duration>,
}

impl AgentRunBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool(mut self, tool: Box<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    pub fn tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    /// Override `tools.approval_timeout_secs` with a finer-grained timeout.
    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> AgentRun {
        let provider: Box<dyn LLMProvider> = if self.config.retry.enabled {
            Box::new(RetryProvider::from_config(self.provider, &self.config.retry))
        } else {
            self.provider
        };

        let registry = Arc::new(self.tools);
        let gate = Arc::new(ApprovalGate::new());
        let mut invoker = ToolInvoker::from_config(registry.clone(), gate.clone(), &self.config.tools);
        if let Some(timeout) = self.approval_timeout {
            invoker = invoker.with_approval_timeout(timeout);
        }
        let (status_tx, _) = watch::channel(RunStatus::Idle);

        AgentRun {
            run_id: self
                .run_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            config: self.config,
            provider: Arc::from(provider),
            registry,
            invoker,
            interceptors: self.interceptors,
            tracer: self.tracer,
            evaluators: self.evaluators,
            gate,
            cancel: CancellationToken::new(),
            status_tx,
        }
    }
}

/// One run of the agent.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use agentrun::agent::{AgentContext, AgentRun};
/// use agentrun::error::Result;
/// use agentrun::providers::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};
/// use agentrun::session::{shared_history, ConversationHistory, Message};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl LLMProvider for Fixed {
///     async fn chat(
///         &self,
///         _messages: Vec<Message>,
///         _tools: Vec<ToolDefinition>,
///         _options: ChatOptions,
///     ) -> Result<LLMResponse> {
///         Ok(LLMResponse::text("Ada Lovelace"))
///     }
///     fn default_model(&self) -> &str { "fixed" }
///     fn name(&self) -> &str { "fixed" }
/// }
///
/// # tokio_test::block_on(async {
/// let history = shared_history(ConversationHistory::new());
/// let run = AgentRun::builder(Box::new(Fixed)).build();
/// let events = run
///     .start("get expert1 name", AgentContext::new("You know the experts."), history.clone())
///     .collect_all()
///     .await;
///
/// let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
/// assert_eq!(kinds, vec!["content", "completed"]);
/// assert_eq!(history.read().await.len(), 1);
/// # });
/// ```
pub struct AgentRun {
    run_id: String,
    config: Config,
    provider: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    invoker: ToolInvoker,
    interceptors: InterceptorChain,
    tracer: Option<Tracer>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    gate: Arc<ApprovalGate>,
    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

fn streamed_thinking(reasoning: String) -> Option<String> {
    (!reasoning.is_empty()).then_some(reasoning)
}

/// Give every call a non-empty id that is unique within the run.
///
/// Empty ids become `call-{turn}-{index}`; repeated ids get a `-{n}` suffix.
fn assign_call_ids(calls: Vec<LLMToolCall>, turn: u32, seen: &mut HashSet<String>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let base = if call.id.trim().is_empty() {
                format!("call-{}-{}", turn, index)
            } else {
                call.id
            };
            let mut id = base.clone();
            let mut n = 1;
            while !seen.insert(id.clone()) {
                n += 1;
                id = format!("{}-{}", base, n);
            }
            ToolCall::new(&id, &call.name, &call.arguments)
        })
        .collect()
}

impl AgentRun {
    pub fn builder(provider: Box<dyn LLMProvider>) -> AgentRunBuilder {
        AgentRunBuilder {
            provider,
            config: Config::default(),
            tools: ToolRegistry::new(),
            interceptors: InterceptorChain::new(),
            tracer: None,
            evaluators: Vec::new(),
            run_id: None,
            approval_timeout: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        *self.status_tx.borrow()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> RunController {
        RunController {
            run_id: self.run_id.clone(),
            cancel: self.cancel.clone(),
            gate: self.gate.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    /// Start the run on its own task and return its event stream.
    ///
    /// `context` becomes owned by the run. `history` is read once at start
    /// for carried-forward messages and memory, and receives exactly one new
    /// turn if the run completes.
    pub fn start(
        mut self,
        input: &str,
        context: AgentContext,
        history: SharedHistory,
    ) -> EventStream {
        let tracer = self.tracer.take().unwrap_or_else(|| self.tracer_from_config());
        let (emitter, stream) = events::channel(
            &self.run_id,
            self.config.events.buffer_size,
            tracer,
            self.cancel.clone(),
        );
        let span = info_span!("agent_run", run_id = %self.run_id);
        let input = input.to_string();
        tokio::spawn(self.drive(emitter, input, context, history).instrument(span));
        stream
    }

    fn tracer_from_config(&self) -> Tracer {
        let cfg = &self.config.tracer;
        match &cfg.path {
            Some(path) if cfg.enabled => {
                let (tracer, _worker) =
                    Tracer::spawn(cfg.buffer_size, Arc::new(JsonlTraceSink::new(path)));
                tracer
            }
            _ => Tracer::disabled(),
        }
    }

    fn set_status(&self, status: RunStatus) {
        debug!(%status, "Run status changed");
        self.status_tx.send_replace(status);
    }

    fn chat_options(&self) -> ChatOptions {
        let agent = &self.config.agent;
        let mut options = ChatOptions::new().with_cancellation(self.cancel.child_token());
        if let Some(model) = &agent.model {
            options = options.with_model(model);
        }
        if let Some(max_tokens) = agent.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = agent.temperature {
            options = options.with_temperature(temperature);
        }
        options
    }

    async fn drive(
        self,
        mut emitter: EventEmitter,
        input: String,
        mut context: AgentContext,
        history: SharedHistory,
    ) {
        self.set_status(RunStatus::Running);
        info!(
            provider = self.provider.name(),
            max_turns = self.config.agent.max_turns,
            tools = self.registry.len(),
            "Run started"
        );

        if let Err(e) = validate_config(&self.config, &self.registry) {
            self.fail(&mut emitter, ErrorEvent::new(ErrorKind::FatalConfig, e.to_string(), true))
                .await;
            return;
        }

        if context.system_rules().is_empty() {
            context.set_system_rules(&self.config.agent.system_rules);
        }
        {
            let history = history.read().await;
            context.seed_history(history.carry_forward(self.config.context.history_turns));
            for entry in history.persistent_memory() {
                if !context.memory().contains_key(&entry.key) {
                    context.remember(entry);
                }
            }
        }
        context.begin_turn(&input);

        let definitions = self.registry.definitions();
        let max_turns = self.config.agent.max_turns;
        let mut seen_ids = HashSet::new();
        let mut turn: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                self.cancelled(&mut emitter, turn).await;
                return;
            }
            if turn >= max_turns {
                let err = AgentError::TurnLimitExceeded(max_turns);
                self.fail(&mut emitter, ErrorEvent::new(err.kind(), err.to_string(), true))
                    .await;
                return;
            }
            turn += 1;
            emitter.set_turn(turn);
            let turn_started = Instant::now();

            let step = Instant::now();
            let prompt = match context.build_prompt(self.config.context.token_budget) {
                Ok(prompt) => prompt,
                Err(e) => {
                    self.fail(&mut emitter, ErrorEvent::new(e.kind(), e.to_string(), true))
                        .await;
                    return;
                }
            };
            emitter
                .tracer()
                .step(&self.run_id, turn, StepKind::BuildPrompt, step.elapsed());
            if emitter.tracer().is_enabled() {
                emitter
                    .tracer()
                    .context(&self.run_id, turn, &context.snapshot());
            }
            debug!(
                turn,
                tokens = prompt.estimated_tokens,
                dropped = prompt.dropped_messages,
                "Prompt built"
            );

            let request = ModelRequest {
                run_id: self.run_id.clone(),
                turn,
                messages: prompt.messages,
                tools: definitions.clone(),
                options: self.chat_options(),
            };
            let step = Instant::now();
            let result = self.call_model(request, &mut emitter).await;
            let latency_ms = step.elapsed().as_millis() as u64;
            emitter
                .tracer()
                .step(&self.run_id, turn, StepKind::ModelCall, step.elapsed());

            let response = match result {
                Ok(_) | Err(AgentError::Cancelled) if self.cancel.is_cancelled() => {
                    self.cancelled(&mut emitter, turn).await;
                    return;
                }
                Ok(response) => response,
                Err(e) => {
                    let mut event = ErrorEvent::new(e.kind(), e.to_string(), true);
                    if let AgentError::Interceptor { name, .. } = &e {
                        event = event.from_interceptor(name);
                    }
                    self.fail(&mut emitter, event).await;
                    return;
                }
            };
            info!(
                turn,
                latency_ms,
                tool_calls = response.tool_calls.len(),
                "Model responded"
            );

            let LLMResponse {
                content,
                tool_calls,
                thinking,
                usage,
            } = response;
            let calls = assign_call_ids(tool_calls, turn, &mut seen_ids);

            if let Some(text) = thinking.filter(|t| !t.is_empty()) {
                emitter
                    .emit(EventPayload::Thinking(ThinkingEvent { text }))
                    .await;
            }
            if !content.is_empty() || calls.is_empty() {
                emitter
                    .emit(EventPayload::Content(ContentEvent {
                        text: content.clone(),
                        partial: false,
                    }))
                    .await;
            }

            if calls.is_empty() {
                context.push_message(Message::assistant(&content));
                emitter
                    .tracer()
                    .step(&self.run_id, turn, StepKind::Turn, turn_started.elapsed());
                self.complete(&mut emitter, &input, content, &context, &history, turn)
                    .await;
                return;
            }

            emitter
                .emit(EventPayload::LlmCall(LlmCallEvent {
                    calls: calls
                        .iter()
                        .map(|c| RequestedCall {
                            call_id: c.id.clone(),
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        })
                        .collect(),
                    usage,
                }))
                .await;
            context.push_message(Message::assistant_with_tools(&content, calls.clone()));

            let step = Instant::now();
            let outcome = self
                .invoker
                .invoke(&calls, &mut context, &mut emitter, &self.status_tx, &self.cancel)
                .await;
            emitter
                .tracer()
                .step(&self.run_id, turn, StepKind::ToolDispatch, step.elapsed());
            emitter
                .tracer()
                .step(&self.run_id, turn, StepKind::Turn, turn_started.elapsed());

            match outcome.halt {
                Some(Halt::Cancelled) => {
                    self.cancelled(&mut emitter, turn).await;
                    return;
                }
                Some(Halt::FailFast { message, .. }) => {
                    self.finish_failed(&mut emitter, ErrorKind::ToolExecution, message)
                        .await;
                    return;
                }
                None => {}
            }
        }
    }

    /// Call the model through the interceptor chain. In streaming mode the
    /// text deltas are emitted as partial Content events as they arrive.
    async fn call_model(
        &self,
        request: ModelRequest,
        emitter: &mut EventEmitter,
    ) -> Result<LLMResponse> {
        let provider = &self.provider;
        let streaming = self.config.agent.streaming;

        self.interceptors
            .call(request, move |request| async move {
                if !streaming {
                    return provider
                        .chat(request.messages, request.tools, request.options)
                        .await;
                }

                let mut rx = provider
                    .chat_stream(request.messages, request.tools, request.options)
                    .await?;
                let mut content = String::new();
                let mut reasoning = String::new();
                while let Some(event) = rx.recv().await {
                    match event {
                        StreamEvent::Delta(text) => {
                            content.push_str(&text);
                            emitter
                                .emit(EventPayload::Content(ContentEvent {
                                    text,
                                    partial: true,
                                }))
                                .await;
                        }
                        StreamEvent::Thinking(text) => reasoning.push_str(&text),
                        StreamEvent::Done {
                            content,
                            tool_calls,
                            thinking,
                            usage,
                        } => {
                            return Ok(LLMResponse {
                                content,
                                tool_calls,
                                thinking: thinking.or_else(|| streamed_thinking(reasoning)),
                                usage,
                            })
                        }
                        // Errors before the first event were already retried by
                        // the retry layer; this one arrived mid-stream.
                        StreamEvent::Error(message) => return Err(AgentError::Provider(message)),
                    }
                }
                warn!("Model stream ended without a final event");
                Ok(LLMResponse {
                    content,
                    thinking: streamed_thinking(reasoning),
                    ..Default::default()
                })
            })
            .await
    }

    async fn complete(
        &self,
        emitter: &mut EventEmitter,
        input: &str,
        output: String,
        context: &AgentContext,
        history: &SharedHistory,
        turns: u32,
    ) {
        for evaluator in &self.evaluators {
            match evaluator.evaluate(input, &output).await {
                Ok(outcome) => {
                    emitter
                        .emit(EventPayload::Eval(EvalEvent {
                            evaluator: evaluator.name().to_string(),
                            score: outcome.score,
                            passed: outcome.passed,
                            detail: outcome.detail,
                        }))
                        .await;
                }
                Err(e) => {
                    log_component!(
                        warn,
                        "eval",
                        "Evaluator failed",
                        evaluator = evaluator.name(),
                        error = e.to_string().as_str()
                    );
                }
            }
        }

        let appended = {
            let mut history = history.write().await;
            let turn = ConversationTurn {
                turn_id: history.next_turn_id(),
                run_id: self.run_id.clone(),
                input: input.to_string(),
                output: output.clone(),
                events: emitter.summaries().to_vec(),
                memory: context.persistent_memory(),
                timestamp: Utc::now(),
            };
            history.append(turn)
        };
        if let Err(e) = appended {
            self.fail(emitter, ErrorEvent::new(e.kind(), e.to_string(), true))
                .await;
            return;
        }

        self.set_status(RunStatus::Completed);
        info!(turns, output_len = output.len(), "Run completed");
        emitter
            .emit(EventPayload::Completed(CompletedEvent { output, turns }))
            .await;
    }

    async fn fail(&self, emitter: &mut EventEmitter, error: ErrorEvent) {
        let kind = error.error;
        let message = error.message.clone();
        emitter.error(error).await;
        self.finish_failed(emitter, kind, message).await;
    }

    async fn finish_failed(&self, emitter: &mut EventEmitter, error: ErrorKind, message: String) {
        self.set_status(RunStatus::Failed);
        warn!(error = %error, message = %message, "Run failed");
        emitter
            .emit(EventPayload::Failed(FailedEvent { error, message }))
            .await;
    }

    async fn cancelled(&self, emitter: &mut EventEmitter, turns: u32) {
        self.set_status(RunStatus::Cancelled);
        info!(turns, "Run cancelled");
        emitter
            .emit(EventPayload::Cancelled(CancelledEvent { turns }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::eval::EvalOutcome;
    use crate::session::{shared_history, ConversationHistory};
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays scripted responses; records the prompts it saw.
    struct Scripted {
        responses: Mutex<Vec<Result<LLMResponse>>>,
        prompts: Arc<Mutex<Vec<Vec<Message>>>>,
        calls: Arc<AtomicU32>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<LLMResponse>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                prompts: Arc::default(),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Vec<crate::providers::ToolDefinition>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(messages);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(LLMResponse::text("done")))
        }

        fn default_model(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn echo_call(id: &str) -> LLMToolCall {
        LLMToolCall::new(id, "echo", r#"{"message": "hi"}"#)
    }

    fn kinds(events: &[events::Event]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    fn no_retry() -> Config {
        let mut config = Config::default();
        config.retry.enabled = false;
        config
    }

    #[test]
    fn test_assign_call_ids() {
        let mut seen = HashSet::new();
        let calls = vec![
            LLMToolCall::new("a", "echo", "{}"),
            LLMToolCall::new("a", "echo", "{}"),
            LLMToolCall::new("", "echo", "{}"),
        ];
        let ids: Vec<String> = assign_call_ids(calls, 2, &mut seen)
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "a-2", "call-2-2"]);

        let again = assign_call_ids(vec![LLMToolCall::new("a", "echo", "{}")], 3, &mut seen);
        assert_eq!(again[0].id, "a-3");
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::WaitingApproval.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert_eq!(RunStatus::WaitingApproval.to_string(), "waiting_approval");
    }

    #[tokio::test]
    async fn test_tool_turn_then_answer() {
        let provider = Scripted::new(vec![
            Ok(LLMResponse::with_tools("", vec![echo_call("c1")])),
            Ok(LLMResponse::text("the echo said hi")),
        ]);
        let prompts = provider.prompts.clone();
        let run = AgentRun::builder(Box::new(provider))
            .config(no_retry())
            .tool(Box::new(EchoTool))
            .build();
        let mut controller = run.controller();
        let history = shared_history(ConversationHistory::new());

        let events = run
            .start("say hi", AgentContext::new("rules"), history.clone())
            .collect_all()
            .await;

        assert_eq!(kinds(&events), vec!["llm_call", "tool", "content", "completed"]);
        assert_eq!(controller.finished().await, RunStatus::Completed);

        let second_prompt = &prompts.lock().unwrap()[1];
        let last = second_prompt.last().unwrap();
        assert!(last.is_tool_result());
        assert_eq!(last.content, "hi");

        let history = history.read().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].output, "the echo said hi");
        assert_eq!(history.turns()[0].events.len(), 3);
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let provider = Scripted::new(vec![
            Ok(LLMResponse::with_tools("", vec![echo_call("c1")])),
            Ok(LLMResponse::with_tools("", vec![echo_call("c2")])),
        ]);
        let mut config = no_retry();
        config.agent.max_turns = 1;
        let run = AgentRun::builder(Box::new(provider))
            .config(config)
            .tool(Box::new(EchoTool))
            .build();

        let history = shared_history(ConversationHistory::new());
        let events = run
            .start("loop", AgentContext::new("rules"), history.clone())
            .collect_all()
            .await;

        assert_eq!(kinds(&events), vec!["llm_call", "tool", "error", "failed"]);
        match &events[2].payload {
            EventPayload::Error(e) => {
                assert_eq!(e.error, ErrorKind::TurnLimitExceeded);
                assert!(e.fatal);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(history.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_first_turn() {
        let provider = Scripted::new(vec![]);
        let calls = provider.calls.clone();
        let mut config = no_retry();
        config.tools.require_approval = vec!["missing_tool".into()];
        let run = AgentRun::builder(Box::new(provider)).config(config).build();

        let events = run
            .start(
                "hi",
                AgentContext::new("rules"),
                shared_history(ConversationHistory::new()),
            )
            .collect_all()
            .await;

        assert_eq!(kinds(&events), vec!["error", "failed"]);
        assert_eq!(events[0].turn_id, 0);
        match &events[1].payload {
            EventPayload::Failed(f) => assert_eq!(f.error, ErrorKind::FatalConfig),
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_model_error_fails_run() {
        let provider = Scripted::new(vec![Err(AgentError::ProviderTyped(
            crate::error::ProviderError::Auth("bad key".into()),
        ))]);
        let run = AgentRun::builder(Box::new(provider)).build();
        let events = run
            .start(
                "hi",
                AgentContext::new("rules"),
                shared_history(ConversationHistory::new()),
            )
            .collect_all()
            .await;

        assert_eq!(kinds(&events), vec!["error", "failed"]);
        match &events[0].payload {
            EventPayload::Error(e) => assert_eq!(e.error, ErrorKind::Model),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_thinking_precedes_content() {
        let provider = Scripted::new(vec![Ok(LLMResponse::text("42").with_thinking("compute"))]);
        let run = AgentRun::builder(Box::new(provider)).config(no_retry()).build();
        let events = run
            .start(
                "q",
                AgentContext::new("rules"),
                shared_history(ConversationHistory::new()),
            )
            .collect_all()
            .await;
        assert_eq!(kinds(&events), vec!["thinking", "content", "completed"]);
    }

    struct AlwaysPass;

    #[async_trait]
    impl Evaluator for AlwaysPass {
        fn name(&self) -> &str {
            "always"
        }
        async fn evaluate(&self, _input: &str, _output: &str) -> Result<EvalOutcome> {
            Ok(EvalOutcome::pass(1.0))
        }
    }

    struct Broken;

    #[async_trait]
    impl Evaluator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn evaluate(&self, _input: &str, _output: &str) -> Result<EvalOutcome> {
            Err(AgentError::NotFound("rubric".into()))
        }
    }

    #[tokio::test]
    async fn test_evaluators_run_before_completion() {
        let provider = Scripted::new(vec![Ok(LLMResponse::text("answer"))]);
        let run = AgentRun::builder(Box::new(provider))
            .config(no_retry())
            .evaluator(Arc::new(Broken))
            .evaluator(Arc::new(AlwaysPass))
            .build();
        let events = run
            .start(
                "q",
                AgentContext::new("rules"),
                shared_history(ConversationHistory::new()),
            )
            .collect_all()
            .await;
        assert_eq!(kinds(&events), vec!["content", "eval", "completed"]);
    }

    #[tokio::test]
    async fn test_empty_system_rules_fall_back_to_config() {
        let provider = Scripted::new(vec![Ok(LLMResponse::text("ok"))]);
        let prompts = provider.prompts.clone();
        let mut config = no_retry();
        config.agent.system_rules = "Configured rules".into();
        let run = AgentRun::builder(Box::new(provider)).config(config).build();
        run.start(
            "q",
            AgentContext::default(),
            shared_history(ConversationHistory::new()),
        )
        .collect_all()
        .await;

        assert_eq!(prompts.lock().unwrap()[0][0].content, "Configured rules");
    }
}
