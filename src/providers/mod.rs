//! Providers module - the model adapter seam
//!
//! This module defines the `LLMProvider` trait and common types for talking to
//! a language model. Concrete vendor adapters live outside this crate; they
//! implement `LLMProvider` and are handed to [`AgentRun::builder`](crate::agent::AgentRun::builder).
//!
//! # Example
//!
//! ```rust,ignore
//! use agentrun::providers::{ChatOptions, LLMProvider, RetryProvider};
//! use agentrun::session::Message;
//!
//! async fn example(adapter: Box<dyn LLMProvider>) {
//!     let provider = RetryProvider::new(adapter).with_max_retries(5);
//!     let messages = vec![Message::user("Hello!")];
//!     let options = ChatOptions::new().with_max_tokens(1000);
//!
//!     let response = provider.chat(messages, vec![], options).await.unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod retry;
mod types;

use crate::error::ProviderError;

pub use retry::RetryProvider;
pub use types::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, StreamEvent, ToolDefinition, Usage,
};

/// Parse an HTTP status code and response body into a structured [`ProviderError`].
///
/// Adapters use this so every backend produces the same typed errors, which
/// the retry layer classifies without string matching.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 => ProviderError::InvalidRequest(body.to_string()),
        503 | 529 => ProviderError::Overloaded(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_error_auth() {
        let err = parse_provider_error(401, "invalid api key");
        assert!(matches!(err, ProviderError::Auth(_)));
        assert_eq!(err.status_code(), Some(401));
        assert!(matches!(
            parse_provider_error(403, "forbidden"),
            ProviderError::Auth(_)
        ));
    }

    #[test]
    fn test_parse_provider_error_402() {
        let err = parse_provider_error(402, "payment required");
        assert!(matches!(err, ProviderError::Billing(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_provider_error_429() {
        let err = parse_provider_error(429, "rate limited");
        assert!(matches!(err, ProviderError::RateLimit(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_provider_error_400() {
        let err = parse_provider_error(400, "bad json");
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_provider_error_5xx() {
        assert!(matches!(
            parse_provider_error(500, "internal server error"),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            parse_provider_error(502, "bad gateway"),
            ProviderError::ServerError(_)
        ));
        let overloaded = parse_provider_error(503, "service unavailable");
        assert!(matches!(overloaded, ProviderError::Overloaded(_)));
        assert!(overloaded.is_retryable());
    }

    #[test]
    fn test_parse_provider_error_timeout() {
        let err = parse_provider_error(408, "request timeout");
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_provider_error_unknown() {
        let err = parse_provider_error(418, "i'm a teapot");
        assert!(matches!(err, ProviderError::Unknown(_)));
        assert!(err.to_string().contains("HTTP 418"));
    }
}
