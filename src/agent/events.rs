//! Typed events emitted by a run
//!
//! Every event carries the run id, the turn it belongs to, a sequence number
//! and a timestamp. Sequence numbers start at 1 and increase by one per
//! event, so a consumer can detect gaps and duplicates trivially.
//!
//! The stream is a bounded channel: when the consumer falls behind the run
//! waits for it. When the consumer goes away the run is cancelled.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::providers::Usage;
use crate::session::{EventSummary, ToolCallStatus};

use super::approval::ApprovalDecision;
use super::tracer::Tracer;

/// A single event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    /// Model turn within the run (0 before the first model call)
    pub turn_id: u32,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }

    /// Compact form stored on the conversation turn.
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            seq: self.seq,
            kind: self.kind().to_string(),
            call_id: self.payload.call_id().map(str::to_string),
            detail: self.payload.detail(),
        }
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Content(ContentEvent),
    Thinking(ThinkingEvent),
    LlmCall(LlmCallEvent),
    Tool(ToolEvent),
    Approval(ApprovalEvent),
    Error(ErrorEvent),
    Eval(EvalEvent),
    Completed(CompletedEvent),
    Failed(FailedEvent),
    Cancelled(CancelledEvent),
}

/// Assistant text. Streaming runs emit `partial` deltas before the final
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    pub text: String,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingEvent {
    pub text: String,
}

/// A tool call as requested by the model, after id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// The model asked for tool calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCallEvent {
    pub calls: Vec<RequestedCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl LlmCallEvent {
    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.iter().any(|c| c.call_id == call_id)
    }
}

/// Final state of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub call_id: String,
    pub name: String,
    pub status: ToolCallStatus,
    /// Result (or failure message) returned to the model
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Approval request (no decision yet) or its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
}

impl ApprovalEvent {
    pub fn is_request(&self) -> bool {
        self.decision.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: ErrorKind,
    pub message: String,
    /// Whether the run ends because of this error
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Interceptor that raised the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interceptor: Option<String>,
}

impl ErrorEvent {
    pub fn new(error: ErrorKind, message: impl Into<String>, fatal: bool) -> Self {
        Self {
            error,
            message: message.into(),
            fatal,
            call_id: None,
            interceptor: None,
        }
    }

    pub fn for_call(mut self, call_id: &str) -> Self {
        self.call_id = Some(call_id.to_string());
        self
    }

    pub fn from_interceptor(mut self, name: &str) -> Self {
        self.interceptor = Some(name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalEvent {
    pub evaluator: String,
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub output: String,
    pub turns: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub error: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledEvent {
    pub turns: u32,
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Content(_) => "content",
            EventPayload::Thinking(_) => "thinking",
            EventPayload::LlmCall(_) => "llm_call",
            EventPayload::Tool(_) => "tool",
            EventPayload::Approval(_) => "approval",
            EventPayload::Error(_) => "error",
            EventPayload::Eval(_) => "eval",
            EventPayload::Completed(_) => "completed",
            EventPayload::Failed(_) => "failed",
            EventPayload::Cancelled(_) => "cancelled",
        }
    }

    /// Whether this payload ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Completed(_) | EventPayload::Failed(_) | EventPayload::Cancelled(_)
        )
    }

    /// Tool call this payload refers to.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            EventPayload::Tool(e) => Some(&e.call_id),
            EventPayload::Approval(e) => Some(&e.call_id),
            EventPayload::Error(e) => e.call_id.as_deref(),
            _ => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            EventPayload::Tool(e) => Some(e.status.to_string()),
            EventPayload::Approval(e) => Some(
                e.decision
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "requested".to_string()),
            ),
            EventPayload::Error(e) => Some(e.error.to_string()),
            EventPayload::Eval(e) => Some(format!("{}: {}", e.evaluator, e.score)),
            EventPayload::LlmCall(e) => Some(format!("{} call(s)", e.calls.len())),
            EventPayload::Failed(e) => Some(e.error.to_string()),
            _ => None,
        }
    }
}

/// Producer side of a run's event stream. Owned by the run task.
pub struct EventEmitter {
    run_id: String,
    turn: u32,
    next_seq: u64,
    tx: mpsc::Sender<Event>,
    tracer: Tracer,
    cancel: CancellationToken,
    consumer_gone: bool,
    summaries: Vec<EventSummary>,
}

/// Create a bounded event channel for `run_id`.
///
/// A closed receiver cancels `cancel`.
pub fn channel(
    run_id: &str,
    buffer: usize,
    tracer: Tracer,
    cancel: CancellationToken,
) -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let emitter = EventEmitter {
        run_id: run_id.to_string(),
        turn: 0,
        next_seq: 1,
        tx,
        tracer,
        cancel,
        consumer_gone: false,
        summaries: Vec::new(),
    };
    (emitter, EventStream { rx })
}

impl EventEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn set_turn(&mut self, turn: u32) {
        self.turn = turn;
    }

    /// Summaries of everything emitted so far, in sequence order.
    pub fn summaries(&self) -> &[EventSummary] {
        &self.summaries
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Emit an event, waiting for buffer space. Returns its sequence number.
    pub async fn emit(&mut self, payload: EventPayload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let event = Event {
            run_id: self.run_id.clone(),
            turn_id: self.turn,
            seq,
            timestamp: Utc::now(),
            payload,
        };
        debug!(seq, kind = event.kind(), turn = self.turn, "Emitting event");
        self.summaries.push(event.summary());
        self.tracer.event(&event);

        if self.consumer_gone {
            return seq;
        }
        if self.tx.send(event).await.is_err() {
            warn!(run_id = %self.run_id, "Event consumer dropped; cancelling run");
            self.consumer_gone = true;
            self.cancel.cancel();
        }
        seq
    }

    pub async fn error(&mut self, event: ErrorEvent) -> u64 {
        self.emit(EventPayload::Error(event)).await
    }
}

/// Consumer side of a run's events.
///
/// Implements [`futures::Stream`]; the stream ends after the terminal event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the run has finished.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain the stream to the end.
    pub async fn collect_all(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn content(text: &str) -> EventPayload {
        EventPayload::Content(ContentEvent {
            text: text.to_string(),
            partial: false,
        })
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one() {
        let (mut emitter, stream) =
            channel("run-1", 8, Tracer::disabled(), CancellationToken::new());
        emitter.set_turn(1);
        assert_eq!(emitter.emit(content("a")).await, 1);
        assert_eq!(emitter.emit(content("b")).await, 2);
        drop(emitter);

        let events = stream.collect_all().await;
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(events.iter().all(|e| e.run_id == "run-1" && e.turn_id == 1));
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_run() {
        let cancel = CancellationToken::new();
        let (mut emitter, stream) = channel("run-1", 1, Tracer::disabled(), cancel.clone());
        drop(stream);

        emitter.emit(content("a")).await;
        assert!(cancel.is_cancelled());
        // Later emits still number and summarize
        assert_eq!(emitter.emit(content("b")).await, 2);
        assert_eq!(emitter.summaries().len(), 2);
    }

    #[tokio::test]
    async fn test_backpressure_waits_for_consumer() {
        let (mut emitter, mut stream) =
            channel("run-1", 1, Tracer::disabled(), CancellationToken::new());
        emitter.emit(content("first")).await;

        let producer = tokio::spawn(async move {
            emitter.emit(content("second")).await;
            emitter
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(stream.recv().await.unwrap().seq, 1);
        let emitter = producer.await.unwrap();
        assert_eq!(stream.next().await.unwrap().seq, 2);
        drop(emitter);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_payload_serde_tag() {
        let event = Event {
            run_id: "r".into(),
            turn_id: 2,
            seq: 7,
            timestamp: Utc::now(),
            payload: EventPayload::Error(
                ErrorEvent::new(ErrorKind::ApprovalDenied, "denied: timeout", false).for_call("c1"),
            ),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["kind"], "error");
        assert_eq!(json["payload"]["error"], "approval_denied");
        assert_eq!(json["payload"]["call_id"], "c1");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_summary() {
        let event = Event {
            run_id: "r".into(),
            turn_id: 1,
            seq: 3,
            timestamp: Utc::now(),
            payload: EventPayload::Tool(ToolEvent {
                call_id: "c1".into(),
                name: "echo".into(),
                status: ToolCallStatus::Executed,
                output: "hi".into(),
                duration_ms: Some(1),
            }),
        };
        let summary = event.summary();
        assert_eq!(summary.seq, 3);
        assert_eq!(summary.kind, "tool");
        assert_eq!(summary.call_id.as_deref(), Some("c1"));
        assert_eq!(summary.detail.as_deref(), Some("executed"));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventPayload::Completed(CompletedEvent {
            output: String::new(),
            turns: 1
        })
        .is_terminal());
        assert!(EventPayload::Cancelled(CancelledEvent { turns: 0 }).is_terminal());
        assert!(!content("x").is_terminal());
    }
}
