use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ChatApiConfig;
use crate::delta::StreamDelta;
use crate::error::{parse_error_message, ChatApiError};
use crate::headers::build_headers;
use crate::message::{Completion, Message, Usage};
use crate::payload::ChatRequest;
use crate::reconstruct::reconstruct_from_stream;
use crate::sse::{SseEvent, SseStreamParser};
use crate::url::normalize_chat_url;
use crate::utf8::Utf8Reassembler;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const PROGRESS_EVERY_CHUNKS: usize = 50;

#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

/// Deltas of one successful streamed attempt.
#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    pub deltas: Vec<StreamDelta>,
    /// Whether the stream ended with the `[DONE]` sentinel rather than EOF.
    pub saw_done: bool,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self, streaming: bool) -> Result<HeaderMap, ChatApiError> {
        let headers = build_headers(&self.config, streaming)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ChatApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ChatApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        messages: &[Message],
        tools: &[Value],
        stream: bool,
    ) -> ChatRequest {
        ChatRequest::new(
            self.config.model.clone(),
            messages,
            tools,
            self.config.temperature,
            stream,
        )
    }

    /// Blocking completion: one JSON response per attempt, retried by policy.
    pub async fn chat_completion(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Completion, ChatApiError> {
        let request = self.build_request(messages, tools, false);
        let started = Instant::now();

        let request_ref = &request;
        let attempts = self
            .config
            .retry
            .run("chat_completion", move |attempt| {
                debug!(attempt, "sending blocking chat request");
                self.complete_once(request_ref, cancellation)
            });
        let completion = await_or_cancel(attempts, cancellation).await??;

        log_completion("blocking", &completion, started.elapsed());
        Ok(completion)
    }

    /// Streamed request whose deltas are collected per attempt.
    ///
    /// Deltas from an attempt that fails are discarded before the next attempt
    /// starts, so the returned result holds exactly one attempt's output.
    pub async fn stream(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, ChatApiError> {
        let request = self.build_request(messages, tools, true);

        let request_ref = &request;
        let attempts = self.config.retry.run("chat_completion_stream", move |attempt| {
            debug!(attempt, "opening chat stream");
            self.stream_once(request_ref, cancellation)
        });
        await_or_cancel(attempts, cancellation).await?
    }

    /// Stream a completion and rebuild it into one assistant turn.
    pub async fn chat_completion_streamed(
        &self,
        messages: &[Message],
        tools: &[Value],
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Completion, ChatApiError> {
        let started = Instant::now();
        let result = self.stream(messages, tools, cancellation).await?;
        let completion = reconstruct_from_stream(&result.deltas)?;

        log_completion("stream", &completion, started.elapsed());
        Ok(completion)
    }

    async fn send(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ChatApiError> {
        let mut builder = self
            .http
            .post(self.normalized_endpoint())
            .headers(self.build_headers(request.stream)?)
            .json(request);
        if !request.stream {
            builder = builder.timeout(self.config.request_timeout);
        }

        let response = await_or_cancel(builder.send(), cancellation).await??;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .unwrap_or_default();
        Err(ChatApiError::Status {
            status,
            message: parse_error_message(status, &body),
        })
    }

    async fn complete_once(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Completion, ChatApiError> {
        let response = self.send(request, cancellation).await?;
        let body = await_or_cancel(response.text(), cancellation).await??;
        parse_completion(&body)
    }

    async fn stream_once(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, ChatApiError> {
        let started = Instant::now();
        let response = self.send(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut reassembler = Utf8Reassembler::default();
        let mut parser = SseStreamParser::default();
        let mut result = StreamResult::default();
        let mut chunks = 0usize;
        let chunk_timeout = self.config.chunk_timeout;

        loop {
            let next = await_or_cancel(tokio::time::timeout(chunk_timeout, bytes.next()), cancellation)
                .await?
                .map_err(|_| ChatApiError::ChunkTimeout(chunk_timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|error| ChatApiError::StreamInterrupted(error.to_string()))?;

            chunks += 1;
            if chunks == 1 {
                debug!(ttfb_ms = started.elapsed().as_millis() as u64, "first stream chunk");
            } else if chunks % PROGRESS_EVERY_CHUNKS == 0 {
                debug!(chunks, deltas = result.deltas.len(), "stream progress");
            }

            let text = reassembler.push(&chunk)?;
            for event in parser.feed(&text) {
                match event {
                    SseEvent::Delta(delta) => result.deltas.push(delta),
                    SseEvent::Done => result.saw_done = true,
                }
            }
            if parser.is_done() {
                break;
            }
        }

        let residual = reassembler.take_residual();
        if !residual.is_empty() {
            warn!(bytes = residual.len(), "discarding undecoded bytes at end of stream");
        }
        if !parser.is_empty_buffer() {
            warn!(residual = %parser.residual().trim(), "discarding unterminated SSE event");
        }
        if !result.saw_done {
            warn!("stream closed without [DONE] sentinel");
        }

        debug!(
            chunks,
            deltas = result.deltas.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stream finished"
        );
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn parse_completion(body: &str) -> Result<Completion, ChatApiError> {
    let wire: WireCompletion = serde_json::from_str(body)?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ChatApiError::InvalidResponse("response has no choices".to_string()))?;

    Ok(Completion {
        id: wire.id.unwrap_or_else(|| "unknown".to_string()),
        model: wire.model.unwrap_or_else(|| "unknown".to_string()),
        message: choice.message,
        finish_reason: choice.finish_reason,
        usage: wire.usage,
    })
}

fn log_completion(mode: &str, completion: &Completion, elapsed: Duration) {
    let usage = completion.usage.unwrap_or_default();
    info!(
        mode,
        model = %completion.model,
        elapsed_ms = elapsed.as_millis() as u64,
        content_chars = completion.message.content.chars().count(),
        tool_calls = completion.message.tool_calls.len(),
        finish_reason = completion.finish_reason.as_deref().unwrap_or("none"),
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        "chat completion finished"
    );
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
