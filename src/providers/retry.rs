//! Retry provider - decorator that adds automatic retry with exponential backoff.
//!
//! Wraps any [`LLMProvider`] to transparently retry transient errors such as
//! HTTP 429 (rate limit), 5xx (server errors), and provider overload conditions.
//! Transient failures that eventually succeed are invisible to the agent loop;
//! only an exhausted budget surfaces as an error.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentrun::providers::retry::RetryProvider;
//!
//! let provider = RetryProvider::new(adapter)
//!     .with_max_retries(5)
//!     .with_base_delay_ms(500);
//!
//! // Use `provider` as any other LLMProvider; retries happen automatically.
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{AgentError, Result};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, StreamEvent, ToolDefinition};

const STREAM_BUFFER: usize = 32;

/// Patterns in error messages that indicate a transient, retryable failure.
const RETRYABLE_PATTERNS: &[&str] = &[
    "429",
    "500",
    "502",
    "503",
    "504",
    "rate limit",
    "rate_limit",
    "overloaded",
    "too many requests",
    "server error",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "timed out",
];

/// A decorator provider that retries transient model errors with exponential backoff.
///
/// `RetryProvider` wraps an inner [`LLMProvider`] and intercepts errors from
/// `chat()` and `chat_stream()`. When a transient error is detected the request
/// is retried up to `max_retries` times with exponential backoff and jitter
/// between attempts. A backoff sleep is abandoned as soon as the request's
/// cancellation token fires.
///
/// Non-transient errors (400, 401, 403, 404) are returned immediately without retry.
pub struct RetryProvider {
    inner: Box<dyn LLMProvider>,
    /// Maximum number of retry attempts before giving up. Default: 3.
    max_retries: u32,
    /// Base delay in milliseconds for exponential backoff. Default: 1000.
    base_delay_ms: u64,
    /// Maximum delay cap in milliseconds. Default: 30000.
    max_delay_ms: u64,
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("inner", &self.inner.name())
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .finish()
    }
}

impl RetryProvider {
    /// Create a new `RetryProvider` wrapping the given inner provider.
    ///
    /// Uses default retry settings:
    /// - `max_retries`: 3
    /// - `base_delay_ms`: 1000 (1 second)
    /// - `max_delay_ms`: 30000 (30 seconds)
    pub fn new(inner: Box<dyn LLMProvider>) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }

    /// Create a `RetryProvider` from the `retry` config section.
    pub fn from_config(inner: Box<dyn LLMProvider>, config: &RetryConfig) -> Self {
        Self::new(inner)
            .with_max_retries(config.max_retries)
            .with_base_delay_ms(config.base_delay_ms)
            .with_max_delay_ms(config.max_delay_ms)
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay in milliseconds for exponential backoff.
    ///
    /// The actual delay for attempt `n` is:
    /// `min(base_delay_ms * 2^n + jitter, max_delay_ms)`
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the maximum delay cap in milliseconds.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sleep before retry `attempt`, returning `Cancelled` if the request's
    /// token fires first.
    async fn backoff(&self, attempt: u32, options: &ChatOptions) -> Result<()> {
        let jitter_ms = jitter(self.base_delay_ms);
        let delay = compute_delay(attempt, self.base_delay_ms, self.max_delay_ms, jitter_ms);
        let sleep = tokio::time::sleep(Duration::from_millis(delay));

        match options.cancellation.as_ref() {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(AgentError::Cancelled),
                    _ = sleep => Ok(()),
                }
            }
            None => {
                sleep.await;
                Ok(())
            }
        }
    }
}

/// Check whether an [`AgentError`] represents a transient failure that should be retried.
///
/// For structured [`ProviderError`](crate::error::ProviderError) errors, delegates
/// to [`ProviderError::is_retryable`](crate::error::ProviderError::is_retryable).
/// For untyped `Provider(String)` errors, falls back to substring matching
/// against known retryable patterns. Every other error kind is final.
pub fn is_retryable(err: &AgentError) -> bool {
    match err {
        AgentError::ProviderTyped(pe) => pe.is_retryable(),
        AgentError::Provider(msg) => {
            let msg = msg.to_lowercase();

            let non_retryable = ["400", "401", "403", "404"];
            if non_retryable.iter().any(|p| msg.contains(p)) {
                return false;
            }

            RETRYABLE_PATTERNS.iter().any(|p| msg.contains(p))
        }
        _ => false,
    }
}

/// Re-emit an already received first event ahead of the rest of `rest`.
fn forward(
    first: Option<StreamEvent>,
    mut rest: mpsc::Receiver<StreamEvent>,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        let Some(first) = first else {
            return;
        };
        if tx.send(first).await.is_err() {
            return;
        }
        while let Some(event) = rest.recv().await {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Jitter derived from the current system time (nanosecond component),
/// bounded by `base_delay_ms`.
fn jitter(base_delay_ms: u64) -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % base_delay_ms.max(1))
        .unwrap_or(0)
}

/// Compute the backoff delay for a given attempt (without sleeping).
///
/// Delay formula: `min(base_delay_ms * 2^attempt + jitter, max_delay_ms)`
///
/// # Arguments
/// * `attempt` - The current retry attempt (0-indexed)
/// * `base_delay_ms` - Base delay in milliseconds
/// * `max_delay_ms` - Maximum delay cap in milliseconds
/// * `jitter_ms` - Jitter value to add
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

#[async_trait]
impl LLMProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let mut attempt = 0;
        loop {
            if options.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            match self
                .inner
                .chat(messages.clone(), tools.clone(), options.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !is_retryable(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying chat request after transient error"
                    );
                    self.backoff(attempt, &options).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut attempt = 0;
        loop {
            if options.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            match self
                .inner
                .chat_stream(messages.clone(), tools.clone(), options.clone())
                .await
            {
                Ok(mut receiver) => {
                    // A stream that fails before yielding anything is retried
                    // like a failed call. Once an event is out, errors pass
                    // through to the caller.
                    let message = match receiver.recv().await {
                        Some(StreamEvent::Error(message)) => message,
                        first => return Ok(forward(first, receiver)),
                    };
                    let err = AgentError::Provider(message.clone());
                    if !is_retryable(&err) || attempt >= self.max_retries {
                        return Ok(forward(Some(StreamEvent::Error(message)), receiver));
                    }
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying chat_stream request after stream error"
                    );
                    self.backoff(attempt, &options).await?;
                    attempt += 1;
                }
                Err(err) => {
                    if !is_retryable(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %err,
                        "Retrying chat_stream request after transient error"
                    );
                    self.backoff(attempt, &options).await?;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// A mock provider that fails a configurable number of times before succeeding.
    struct FailThenSucceedProvider {
        calls: Arc<AtomicU32>,
        target_failures: u32,
        error: fn() -> AgentError,
    }

    impl FailThenSucceedProvider {
        fn new(target_failures: u32, error: fn() -> AgentError) -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
                target_failures,
                error,
            }
        }
    }

    #[async_trait]
    impl LLMProvider for FailThenSucceedProvider {
        fn name(&self) -> &str {
            "fail-then-succeed"
        }

        fn default_model(&self) -> &str {
            "test-model"
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            let count = self.calls.fetch_add(1, Ordering::SeqCst);
            if count < self.target_failures {
                Err((self.error)())
            } else {
                Ok(LLMResponse::text("recovered"))
            }
        }
    }

    /// Streams an error as its first event for the first `target_failures`
    /// attempts, then a delta followed by `Done`.
    struct ErrorFirstStream {
        calls: Arc<AtomicU32>,
        target_failures: u32,
        message: &'static str,
    }

    #[async_trait]
    impl LLMProvider for ErrorFirstStream {
        fn name(&self) -> &str {
            "error-first-stream"
        }

        fn default_model(&self) -> &str {
            "test-model"
        }

        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            Ok(LLMResponse::text("unused"))
        }

        async fn chat_stream(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _options: ChatOptions,
        ) -> Result<mpsc::Receiver<StreamEvent>> {
            let count = self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(4);
            if count < self.target_failures {
                tx.send(StreamEvent::Error(self.message.into())).await.unwrap();
            } else {
                tx.send(StreamEvent::Delta("Ada".into())).await.unwrap();
                tx.send(StreamEvent::Done {
                    content: "Ada".into(),
                    thinking: None,
                    tool_calls: vec![],
                    usage: None,
                })
                .await
                .unwrap();
            }
            Ok(rx)
        }
    }

    fn error_first(
        target_failures: u32,
        message: &'static str,
    ) -> (RetryProvider, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = ErrorFirstStream {
            calls: Arc::clone(&calls),
            target_failures,
            message,
        };
        let provider = RetryProvider::new(Box::new(inner))
            .with_max_retries(3)
            .with_base_delay_ms(1)
            .with_max_delay_ms(10);
        (provider, calls)
    }

    fn rate_limited() -> AgentError {
        AgentError::ProviderTyped(ProviderError::RateLimit("quota exceeded".into()))
    }

    fn unauthorized() -> AgentError {
        AgentError::Provider("HTTP 401 Unauthorized".into())
    }

    fn fast(inner: FailThenSucceedProvider, max_retries: u32) -> RetryProvider {
        RetryProvider::new(Box::new(inner))
            .with_max_retries(max_retries)
            .with_base_delay_ms(1)
            .with_max_delay_ms(10)
    }

    #[test]
    fn test_retry_provider_defaults() {
        let provider = RetryProvider::new(Box::new(FailThenSucceedProvider::new(0, rate_limited)));
        assert_eq!(provider.name(), "fail-then-succeed");
        assert_eq!(provider.default_model(), "test-model");
        assert_eq!(provider.max_retries, 3);
        assert_eq!(provider.base_delay_ms, 1000);
        assert_eq!(provider.max_delay_ms, 30_000);
    }

    #[test]
    fn test_retry_provider_from_config() {
        let config = RetryConfig {
            enabled: true,
            max_retries: 7,
            base_delay_ms: 20,
            max_delay_ms: 400,
        };
        let provider = RetryProvider::from_config(
            Box::new(FailThenSucceedProvider::new(0, rate_limited)),
            &config,
        );
        assert_eq!(provider.max_retries, 7);
        assert_eq!(provider.base_delay_ms, 20);
        assert_eq!(provider.max_delay_ms, 400);
    }

    #[test]
    fn test_is_retryable_string_patterns() {
        assert!(is_retryable(&AgentError::Provider(
            "HTTP 429 Too Many Requests".into()
        )));
        assert!(is_retryable(&AgentError::Provider(
            "HTTP 503 Service Unavailable".into()
        )));
        assert!(is_retryable(&AgentError::Provider(
            "Model is overloaded, try again later".into()
        )));
        assert!(!is_retryable(&AgentError::Provider(
            "HTTP 400 Bad Request".into()
        )));
        assert!(!is_retryable(&AgentError::Provider(
            "HTTP 404 Not Found".into()
        )));
        assert!(!is_retryable(&AgentError::Provider(
            "Connection reset by peer".into()
        )));
    }

    #[test]
    fn test_is_retryable_only_for_provider_errors() {
        assert!(!is_retryable(&AgentError::Config("429".into())));
        assert!(!is_retryable(&AgentError::Tool("rate limit".into())));
        assert!(!is_retryable(&AgentError::Cancelled));
    }

    #[test]
    fn test_is_retryable_typed() {
        assert!(is_retryable(&rate_limited()));
        assert!(is_retryable(&AgentError::ProviderTyped(
            ProviderError::Timeout("t".into())
        )));
        assert!(!is_retryable(&AgentError::ProviderTyped(
            ProviderError::Auth("invalid api key".into())
        )));
    }

    #[test]
    fn test_delay_calculation() {
        assert_eq!(compute_delay(0, 1000, 30_000, 0), 1000);
        assert_eq!(compute_delay(1, 1000, 30_000, 0), 2000);
        assert_eq!(compute_delay(3, 1000, 30_000, 0), 8000);
        assert_eq!(compute_delay(1, 1000, 30_000, 200), 2200);
    }

    #[test]
    fn test_delay_calculation_capped_at_max() {
        assert_eq!(compute_delay(10, 1000, 30_000, 0), 30_000);
        assert_eq!(compute_delay(10, 1000, 30_000, 5000), 30_000);
        assert_eq!(compute_delay(40, u64::MAX, u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_jitter_bounded_by_base() {
        for _ in 0..16 {
            assert!(jitter(50) < 50);
        }
        assert_eq!(jitter(0), 0);
    }

    #[tokio::test]
    async fn test_two_transient_failures_then_success() {
        let inner = FailThenSucceedProvider::new(2, rate_limited);
        let calls = inner.calls.clone();
        let provider = fast(inner, 3);

        let result = provider
            .chat(vec![], vec![], ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(result.content, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_401() {
        let inner = FailThenSucceedProvider::new(1, unauthorized);
        let calls = inner.calls.clone();
        let provider = fast(inner, 3);

        let err = provider
            .chat(vec![], vec![], ChatOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let inner = FailThenSucceedProvider::new(10, rate_limited);
        let calls = inner.calls.clone();
        let provider = fast(inner, 2);

        let err = provider
            .chat(vec![], vec![], ChatOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::ProviderTyped(ProviderError::RateLimit(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_cancelled() {
        let inner = FailThenSucceedProvider::new(10, rate_limited);
        let calls = inner.calls.clone();
        let provider = RetryProvider::new(Box::new(inner))
            .with_max_retries(5)
            .with_base_delay_ms(60_000)
            .with_max_delay_ms(60_000);

        let token = CancellationToken::new();
        let options = ChatOptions::new().with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = provider.chat(vec![], vec![], options).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_call() {
        let inner = FailThenSucceedProvider::new(0, rate_limited);
        let calls = inner.calls.clone();
        let provider = fast(inner, 3);

        let token = CancellationToken::new();
        token.cancel();
        let err = provider
            .chat(vec![], vec![], ChatOptions::new().with_cancellation(token))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chat_stream_retries_then_delivers() {
        let inner = FailThenSucceedProvider::new(1, rate_limited);
        let provider = fast(inner, 3);

        let mut rx = provider
            .chat_stream(vec![], vec![], ChatOptions::default())
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            StreamEvent::Done { content, .. } => assert_eq!(content, "recovered"),
            other => panic!("Expected Done event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_stream_retries_error_before_first_delta() {
        let (provider, calls) = error_first(2, "503 service unavailable");

        let mut rx = provider
            .chat_stream(vec![], vec![], ChatOptions::default())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(StreamEvent::Delta(d)) if d == "Ada"));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Done { .. })));
        assert!(rx.recv().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_chat_stream_passes_permanent_stream_error_through() {
        let (provider, calls) = error_first(1, "HTTP 401 Unauthorized");

        let mut rx = provider
            .chat_stream(vec![], vec![], ChatOptions::default())
            .await
            .unwrap();
        match rx.recv().await {
            Some(StreamEvent::Error(message)) => assert_eq!(message, "HTTP 401 Unauthorized"),
            other => panic!("Expected Error event, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
