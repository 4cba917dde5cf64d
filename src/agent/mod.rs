//! Agent module - turn loop, context and tool dispatch
//!
//! This module drives a single tool-using agent from one user input to a
//! final answer. An [`AgentRun`] is responsible for:
//!
//! - Building the prompt from the [`AgentContext`] within a token budget
//! - Calling the model through the [`InterceptorChain`]
//! - Dispatching tool calls through the [`ToolInvoker`], including approval
//! - Reporting everything as an ordered [`EventStream`]
//! - Appending the completed turn to the conversation history
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ AgentContext │────>│  AgentRun   │────>│ Interceptors │────>│ LLMProvider │
//! └──────────────┘     │             │     └──────────────┘     └─────────────┘
//!                      │             │────>┌──────────────┐     ┌─────────────┐
//!                      │             │     │ ToolInvoker  │────>│ ToolRegistry│
//!                      └─────────────┘     └──────────────┘     └─────────────┘
//!                        │         │              │
//!                        ▼         ▼              ▼
//!                 EventStream   Tracer     ApprovalGate <── RunController
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agentrun::agent::{AgentContext, AgentRun};
//! use agentrun::session::{shared_history, ConversationHistory};
//! use agentrun::tools::SaveMemoryTool;
//!
//! async fn run(provider: Box<dyn agentrun::providers::LLMProvider>) {
//!     let history = shared_history(ConversationHistory::new());
//!     let run = AgentRun::builder(provider)
//!         .tool(Box::new(SaveMemoryTool))
//!         .build();
//!     let controller = run.controller();
//!
//!     let mut events = run.start("remember my name", AgentContext::new("Be brief."), history);
//!     while let Some(event) = events.recv().await {
//!         if let agentrun::agent::EventPayload::Approval(req) = &event.payload {
//!             if req.is_request() {
//!                 controller.approve(&req.call_id);
//!             }
//!         }
//!     }
//! }
//! ```

pub mod approval;
pub mod compaction;
mod context;
mod documents;
pub mod eval;
pub mod events;
pub mod interceptor;
mod invoker;
mod r#loop;
pub mod tracer;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use context::{AgentContext, ContextSnapshot, ExecutionEnvironment, Prompt, PromptSection};
pub use documents::{Document, DocumentLoader, DocumentRef, FileLoader, StaticLoader};
pub use eval::{ContainsEvaluator, EvalOutcome, Evaluator};
pub use events::{
    ApprovalEvent, CancelledEvent, CompletedEvent, ContentEvent, ErrorEvent, EvalEvent, Event,
    EventEmitter, EventPayload, EventStream, FailedEvent, LlmCallEvent, RequestedCall,
    ThinkingEvent, ToolEvent,
};
pub use interceptor::{Interceptor, InterceptorChain, ModelRequest, Outbound};
pub use invoker::{plan_waves, BatchOutcome, Halt, ToolInvoker};
pub use r#loop::{AgentRun, AgentRunBuilder, RunController, RunStatus};
pub use tracer::{
    JsonlTraceSink, MemoryTraceSink, StepKind, TraceRecord, TraceSink, TraceWorker, Tracer,
};
