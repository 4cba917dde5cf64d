//! Interceptors around model calls
//!
//! An [`Interceptor`] sees every model call of a run. On the way out it may
//! rewrite the request or answer it itself with a synthetic response; on the
//! way back it may rewrite the response. The chain applies `before` hooks in
//! registration order and `after` hooks in reverse, like middleware layers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::providers::{ChatOptions, LLMResponse, ToolDefinition};
use crate::session::Message;

/// An outbound model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub run_id: String,
    pub turn: u32,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: ChatOptions,
}

/// Result of an interceptor's outbound hook.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Pass the (possibly rewritten) request on.
    Continue(ModelRequest),
    /// Skip the model and the remaining interceptors, answering with this.
    ShortCircuit(LLMResponse),
}

/// Hook pair wrapped around each model call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use agentrun::agent::{Interceptor, ModelRequest, Outbound};
/// use agentrun::error::Result;
/// use agentrun::session::Message;
///
/// struct Reminder;
///
/// #[async_trait]
/// impl Interceptor for Reminder {
///     fn name(&self) -> &str { "reminder" }
///
///     async fn before(&self, mut request: ModelRequest) -> Result<Outbound> {
///         request.messages.push(Message::system("Answer briefly."));
///         Ok(Outbound::Continue(request))
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name reported when this interceptor fails.
    fn name(&self) -> &str;

    async fn before(&self, request: ModelRequest) -> Result<Outbound> {
        Ok(Outbound::Continue(request))
    }

    async fn after(&self, response: LLMResponse) -> Result<LLMResponse> {
        Ok(response)
    }
}

/// Ordered list of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish()
    }
}

fn attribute(interceptor: &dyn Interceptor, err: AgentError) -> AgentError {
    let name = interceptor.name().to_string();
    warn!(interceptor = %name, error = %err, "Interceptor failed");
    AgentError::Interceptor {
        name,
        message: err.to_string(),
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Run `before` hooks in order. Returns how many interceptors passed the
    /// request on, and what to do next.
    async fn outbound(&self, mut request: ModelRequest) -> Result<(usize, Outbound)> {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            match interceptor
                .before(request)
                .await
                .map_err(|e| attribute(interceptor.as_ref(), e))?
            {
                Outbound::Continue(next) => request = next,
                short @ Outbound::ShortCircuit(_) => {
                    debug!(interceptor = interceptor.name(), "Model call short-circuited");
                    return Ok((index, short));
                }
            }
        }
        Ok((self.interceptors.len(), Outbound::Continue(request)))
    }

    /// Send `request` through the chain, calling `model` unless an
    /// interceptor short-circuits.
    ///
    /// `after` hooks run in reverse order and only for the interceptors whose
    /// `before` hook passed the request on. Errors from an interceptor are
    /// returned as [`AgentError::Interceptor`]; errors from `model` are
    /// returned unchanged.
    pub async fn call<F, Fut>(&self, request: ModelRequest, model: F) -> Result<LLMResponse>
    where
        F: FnOnce(ModelRequest) -> Fut,
        Fut: Future<Output = Result<LLMResponse>>,
    {
        let (entered, outbound) = self.outbound(request).await?;
        let mut response = match outbound {
            Outbound::Continue(request) => model(request).await?,
            Outbound::ShortCircuit(response) => response,
        };

        for interceptor in self.interceptors[..entered].iter().rev() {
            response = interceptor
                .after(response)
                .await
                .map_err(|e| attribute(interceptor.as_ref(), e))?;
        }
        Ok(response)
    }
}
