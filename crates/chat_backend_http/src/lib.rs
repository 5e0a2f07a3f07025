//! `chat_api`-backed implementation of the `ChatBackend` contract.
//!
//! Each call builds a current-thread tokio runtime and drives the async client
//! to completion, so callers stay synchronous and every worker thread owns its
//! own reactor.

use std::sync::Arc;
use std::time::Duration;

use chat_api::{ChatApiClient, ChatApiConfig, ChatApiError, Completion, Message};
use chat_backend::{
    BackendError, BackendErrorKind, BackendProfile, CancelSignal, ChatBackend, TurnRequest,
};
use serde_json::Value;
use tracing::debug;

/// Stable backend identifier recorded in run reports.
pub const HTTP_BACKEND_ID: &str = "openai-compatible";

/// Runtime configuration for the HTTP backend.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpBackendConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub chunk_timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl HttpBackendConfig {
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: None,
            timeout: None,
            connect_timeout: None,
            chunk_timeout: None,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.api_key, self.base_url, self.model);

        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        if let Some(timeout) = self.chunk_timeout {
            config = config.with_chunk_timeout(timeout);
        }
        if let Some(max_attempts) = self.max_attempts {
            config = config.with_max_attempts(max_attempts);
        }

        config
    }
}

trait CompletionClient: Send + Sync {
    fn stream(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancel: &CancelSignal,
    ) -> Result<Completion, ChatApiError>;

    fn blocking(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancel: &CancelSignal,
    ) -> Result<Completion, ChatApiError>;
}

#[derive(Debug)]
struct DefaultCompletionClient {
    client: ChatApiClient,
}

impl DefaultCompletionClient {
    fn runtime() -> Result<tokio::runtime::Runtime, ChatApiError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })
    }
}

impl CompletionClient for DefaultCompletionClient {
    fn stream(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancel: &CancelSignal,
    ) -> Result<Completion, ChatApiError> {
        Self::runtime()?.block_on(
            self.client
                .chat_completion_streamed(messages, tools, Some(cancel)),
        )
    }

    fn blocking(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancel: &CancelSignal,
    ) -> Result<Completion, ChatApiError> {
        Self::runtime()?.block_on(self.client.chat_completion(messages, tools, Some(cancel)))
    }
}

/// `ChatBackend` adapter backed by `chat_api` transport primitives.
pub struct HttpBackend {
    model: String,
    client: Arc<dyn CompletionClient>,
}

impl HttpBackend {
    /// Creates a backend using real HTTP transport.
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        validate_base_url(&config.base_url)?;
        let model = config.model.trim().to_string();
        if model.is_empty() {
            return Err(BackendError::new(
                BackendErrorKind::Other,
                "model name must not be empty",
            ));
        }

        let client = ChatApiClient::new(config.into_chat_api_config()).map_err(map_init_error)?;
        Ok(Self {
            model,
            client: Arc::new(DefaultCompletionClient { client }),
        })
    }

    #[cfg(test)]
    fn with_client_for_tests(model: &str, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            model: model.to_string(),
            client,
        }
    }
}

impl ChatBackend for HttpBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: HTTP_BACKEND_ID.to_string(),
            model_id: self.model.clone(),
        }
    }

    fn stream_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError> {
        if chat_backend::is_cancelled(cancel) {
            return Err(BackendError::cancelled());
        }
        debug!(messages = request.messages.len(), "streaming turn");
        self.client
            .stream(request.messages, request.tools, cancel)
            .map_err(BackendError::from)
    }

    fn blocking_completion(
        &self,
        request: &TurnRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<Completion, BackendError> {
        if chat_backend::is_cancelled(cancel) {
            return Err(BackendError::cancelled());
        }
        debug!(messages = request.messages.len(), "blocking turn");
        self.client
            .blocking(request.messages, request.tools, cancel)
            .map_err(BackendError::from)
    }
}

fn validate_base_url(base_url: &str) -> Result<(), BackendError> {
    let parsed = url::Url::parse(base_url.trim()).map_err(|error| {
        BackendError::new(
            BackendErrorKind::Other,
            format!("invalid base URL '{base_url}': {error}"),
        )
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(BackendError::new(
            BackendErrorKind::Other,
            format!("unsupported base URL scheme '{scheme}'"),
        )),
    }
}

fn map_init_error(error: ChatApiError) -> BackendError {
    BackendError::new(
        BackendErrorKind::Other,
        format!("failed to initialize HTTP backend: {error}"),
    )
}
