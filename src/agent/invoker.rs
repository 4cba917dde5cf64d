//! Tool invocation for one model turn
//!
//! A turn's tool calls go through three phases:
//!
//! 1. **Plan**, in call order: resolve the tool, validate the arguments
//!    against its schema, and for gated tools request approval and wait for
//!    the decision. Calls that fail here never execute.
//! 2. **Execute** the remaining calls in waves. Waves are built greedily in
//!    call order; a call whose side effect conflicts with a call already in
//!    the current wave starts a new one. With `parallel` set, calls within a
//!    wave run concurrently.
//! 3. **Flush**, in call order: emit one Tool event per call, merge the tool
//!    results into the context and apply memory writes.
//!
//! Completion order inside a wave never shows on the event stream.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::error::{AgentError, ErrorKind};
use crate::session::{MemoryEntry, Message, ToolCall, ToolCallStatus};
use crate::tools::schema::validate_arguments;
use crate::tools::{SideEffect, Tool, ToolContext, ToolRegistry};

use super::approval::{ApprovalDecision, ApprovalGate};
use super::context::AgentContext;
use super::events::{ApprovalEvent, ErrorEvent, EventEmitter, EventPayload, ToolEvent};
use super::r#loop::RunStatus;

/// Group calls into execution waves.
///
/// Returns indices into `effects`. Waves preserve call order and no two
/// calls in one wave conflict.
///
/// # Example
/// ```rust
/// use agentrun::agent::plan_waves;
/// use agentrun::tools::SideEffect;
///
/// let effects = vec![
///     SideEffect::None,
///     SideEffect::Resource("memory".into()),
///     SideEffect::None,
///     SideEffect::Resource("memory".into()),
///     SideEffect::Exclusive,
/// ];
/// assert_eq!(plan_waves(&effects), vec![vec![0, 1, 2], vec![3], vec![4]]);
/// ```
pub fn plan_waves(effects: &[SideEffect]) -> Vec<Vec<usize>> {
    let mut waves = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (index, effect) in effects.iter().enumerate() {
        if current.iter().any(|&j| effects[j].conflicts_with(effect)) {
            waves.push(std::mem::take(&mut current));
        }
        current.push(index);
    }
    if !current.is_empty() {
        waves.push(current);
    }
    waves
}

/// Why a batch stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// The run was cancelled; undispatched calls were skipped.
    Cancelled,
    /// A call failed with fail-fast enabled.
    FailFast { call_id: String, message: String },
}

/// Result of invoking one turn's tool calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Final status per call, in call order
    pub statuses: Vec<(String, ToolCallStatus)>,
    pub halt: Option<Halt>,
}

#[derive(Debug)]
struct CallResult {
    status: ToolCallStatus,
    output: String,
    error: Option<ErrorKind>,
    memory_writes: Vec<MemoryEntry>,
    duration_ms: Option<u64>,
    skipped: bool,
}

impl CallResult {
    fn failed(kind: ErrorKind, output: String) -> Self {
        Self {
            status: ToolCallStatus::Failed,
            output,
            error: Some(kind),
            memory_writes: Vec::new(),
            duration_ms: None,
            skipped: false,
        }
    }

    fn denied(name: &str, reason: &str) -> Self {
        Self {
            status: ToolCallStatus::Denied,
            output: format!("Tool call '{}' was denied ({})", name, reason),
            error: Some(ErrorKind::ApprovalDenied),
            memory_writes: Vec::new(),
            duration_ms: None,
            skipped: false,
        }
    }

    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            ..Self::failed(ErrorKind::Cancelled, format!("Skipped: {}", reason))
        }
    }
}

enum Planned {
    Ready { args: Value, effect: SideEffect },
    Done(CallResult),
}

/// Resolves, gates and executes tool calls against a registry.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    parallel: bool,
    fail_fast: bool,
    approval_timeout: Duration,
    require_approval: HashSet<String>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ApprovalGate>) -> Self {
        Self::from_config(registry, gate, &ToolsConfig::default())
    }

    pub fn from_config(
        registry: Arc<ToolRegistry>,
        gate: Arc<ApprovalGate>,
        config: &ToolsConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            parallel: config.parallel,
            fail_fast: config.fail_fast,
            approval_timeout: Duration::from_secs(config.approval_timeout_secs),
            require_approval: config.require_approval.iter().cloned().collect(),
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Gate `name` even if the tool does not ask for approval.
    pub fn with_required_approval(mut self, name: &str) -> Self {
        self.require_approval.insert(name.to_string());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn needs_approval(&self, tool: &dyn Tool) -> bool {
        tool.approval_required() || self.require_approval.contains(tool.name())
    }

    /// Invoke one turn's calls. Calls must already carry unique ids and
    /// their assistant message must already be in `context`.
    pub async fn invoke(
        &self,
        calls: &[ToolCall],
        context: &mut AgentContext,
        emitter: &mut EventEmitter,
        status: &watch::Sender<RunStatus>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut halt = None;

        // Plan
        let mut planned = Vec::with_capacity(calls.len());
        for call in calls {
            if cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
                planned.push(Planned::Done(CallResult::skipped("run cancelled")));
                continue;
            }
            let plan = self.plan(call, context, emitter, status, cancel).await;
            planned.push(plan);
        }

        // Execute
        let run_id = emitter.run_id().to_string();
        let mut ready = Vec::new();
        let mut effects = Vec::new();
        let mut inputs: Vec<Option<(Value, ToolContext)>> = Vec::with_capacity(calls.len());
        let mut results: Vec<Option<CallResult>> = Vec::with_capacity(calls.len());
        for (index, plan) in planned.into_iter().enumerate() {
            match plan {
                Planned::Ready { args, effect } => {
                    ready.push(index);
                    effects.push(effect);
                    inputs.push(Some((args, context.tool_context(&run_id, &calls[index].id))));
                    results.push(None);
                }
                Planned::Done(result) => {
                    inputs.push(None);
                    results.push(Some(result));
                }
            }
        }

        let waves = plan_waves(&effects);
        debug!(calls = calls.len(), ready = ready.len(), waves = waves.len(), "Dispatching tool calls");

        'waves: for wave in waves {
            let members: Vec<usize> = wave.iter().map(|&w| ready[w]).collect();
            if cancel.is_cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }

            if self.parallel && members.len() > 1 {
                let runs = members.iter().filter_map(|&i| {
                    inputs[i]
                        .take()
                        .map(|(args, ctx)| (i, self.execute(&calls[i], args, ctx)))
                });
                let (indices, futures): (Vec<usize>, Vec<_>) = runs.unzip();
                for (i, result) in indices.into_iter().zip(join_all(futures).await) {
                    results[i] = Some(result);
                }
            } else {
                for &i in &members {
                    if cancel.is_cancelled() {
                        halt = Some(Halt::Cancelled);
                        break 'waves;
                    }
                    if let Some((args, ctx)) = inputs[i].take() {
                        let result = self.execute(&calls[i], args, ctx).await;
                        let failed = result.status == ToolCallStatus::Failed;
                        results[i] = Some(result);
                        if failed && self.fail_fast {
                            break;
                        }
                    }
                }
            }

            if self.fail_fast {
                let first_failed = members.iter().find_map(|&i| {
                    results[i]
                        .as_ref()
                        .filter(|r| r.status == ToolCallStatus::Failed)
                        .map(|r| (i, r.output.clone()))
                });
                if let Some((i, message)) = first_failed {
                    warn!(call_id = %calls[i].id, "Tool call failed with fail-fast enabled");
                    halt = Some(Halt::FailFast {
                        call_id: calls[i].id.clone(),
                        message,
                    });
                    break;
                }
            }
        }

        if halt.is_none() && cancel.is_cancelled() {
            halt = Some(Halt::Cancelled);
        }

        // Flush
        let skip_reason = match &halt {
            Some(Halt::FailFast { .. }) => "an earlier tool call failed",
            _ => "run cancelled",
        };
        let mut statuses = Vec::with_capacity(calls.len());
        for (call, result) in calls.iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                let gated = self
                    .registry
                    .get(&call.name)
                    .is_some_and(|tool| self.needs_approval(tool));
                if gated {
                    CallResult::skipped(&format!("approved but not run, {}", skip_reason))
                } else {
                    CallResult::skipped(skip_reason)
                }
            });
            context.push_message(Message::tool_result(&call.id, &result.output));
            context.set_call_status(&call.id, result.status);

            emitter
                .emit(EventPayload::Tool(ToolEvent {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    status: result.status,
                    output: result.output.clone(),
                    duration_ms: result.duration_ms,
                }))
                .await;

            if let (Some(kind), false) = (result.error, result.skipped) {
                let fatal = matches!(&halt, Some(Halt::FailFast { call_id, .. }) if *call_id == call.id);
                emitter
                    .error(ErrorEvent::new(kind, result.output.clone(), fatal).for_call(&call.id))
                    .await;
            }

            for entry in result.memory_writes {
                debug!(key = %entry.key, call_id = %call.id, "Applying memory write");
                context.remember(entry);
            }
            statuses.push((call.id.clone(), result.status));
        }

        BatchOutcome { statuses, halt }
    }

    async fn plan(
        &self,
        call: &ToolCall,
        context: &mut AgentContext,
        emitter: &mut EventEmitter,
        status: &watch::Sender<RunStatus>,
        cancel: &CancellationToken,
    ) -> Planned {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model requested unknown tool");
            return Planned::Done(CallResult::failed(
                ErrorKind::ToolExecution,
                AgentError::ToolNotFound(call.name.clone()).to_string(),
            ));
        };

        let args = match call.arguments_value() {
            Ok(args) => args,
            Err(e) => {
                let err = AgentError::InvalidArguments {
                    tool: call.name.clone(),
                    problems: vec![format!("arguments are not valid JSON: {}", e)],
                };
                return Planned::Done(CallResult::failed(ErrorKind::InvalidArguments, err.to_string()));
            }
        };
        if let Err(problems) = validate_arguments(&tool.parameters(), &args) {
            let err = AgentError::InvalidArguments {
                tool: call.name.clone(),
                problems,
            };
            debug!(call_id = %call.id, error = %err, "Rejected tool arguments");
            return Planned::Done(CallResult::failed(ErrorKind::InvalidArguments, err.to_string()));
        }

        if self.needs_approval(tool) {
            let pending = self.gate.register(&call.id);
            status.send_replace(RunStatus::WaitingApproval);
            emitter
                .emit(EventPayload::Approval(ApprovalEvent {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: args.clone(),
                    decision: None,
                }))
                .await;

            info!(tool = %call.name, call_id = %call.id, "Waiting for approval");
            let decision = self
                .gate
                .wait(&call.id, pending, self.approval_timeout, cancel)
                .await;
            status.send_replace(RunStatus::Running);

            emitter
                .emit(EventPayload::Approval(ApprovalEvent {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: args.clone(),
                    decision: Some(decision.clone()),
                }))
                .await;

            if let ApprovalDecision::Denied { reason } = decision {
                return Planned::Done(CallResult::denied(&call.name, &reason));
            }
            context.set_call_status(&call.id, ToolCallStatus::Approved);
        }

        Planned::Ready {
            args,
            effect: tool.side_effect(),
        }
    }

    async fn execute(&self, call: &ToolCall, args: Value, ctx: ToolContext) -> CallResult {
        let started = Instant::now();
        let result = self
            .registry
            .execute_with_context(&call.name, args, &ctx)
            .await;
        let duration_ms = Some(started.elapsed().as_millis() as u64);

        match result {
            Ok(output) if !output.is_error => CallResult {
                status: ToolCallStatus::Executed,
                output: output.for_llm,
                error: None,
                memory_writes: output.memory_writes,
                duration_ms,
                skipped: false,
            },
            Ok(output) => CallResult {
                duration_ms,
                ..CallResult::failed(ErrorKind::ToolExecution, output.for_llm)
            },
            Err(e) => CallResult {
                duration_ms,
                ..CallResult::failed(ErrorKind::ToolExecution, e.to_string())
            },
        }
    }
}
