//! Streaming chat client for OpenAI-compatible backends.
//!
//! One network response is split into two token streams: reasoning tokens
//! (only for backends flagged or detected as reasoning models) and answer
//! tokens. Both are consumed incrementally through [`ModelStream`] while a
//! background task reads the response, and both end when the upstream
//! response completes.

use crate::backends::BackendConfig;
use crate::errors::NlshError;
use crate::http_client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// An image sent along with the last user message.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Reads an image file, guessing the MIME type from its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let mime_type = match extension.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            _ => "image/png",
        };
        Ok(Self { mime_type: mime_type.to_string(), data })
    }

    pub fn size_mb(&self) -> f64 {
        self.data.len() as f64 / (1024.0 * 1024.0)
    }

    /// Fails with `ImageTooLarge` when the image exceeds the backend's limit.
    pub fn check_fits(&self, backend: &BackendConfig) -> Result<(), NlshError> {
        let limit_mb = backend.image_limit_mb();
        if self.size_mb() > limit_mb {
            return Err(NlshError::ImageTooLarge { size_mb: self.size_mb(), limit_mb });
        }
        Ok(())
    }

    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.data))
    }
}

/// Everything a single chat call needs besides the backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub image: Option<ImageAttachment>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f64) -> Self {
        Self { messages, temperature, max_tokens: None, image: None }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_image(mut self, image: Option<ImageAttachment>) -> Self {
        self.image = image;
        self
    }

    /// Builds the JSON body for `/chat/completions`.
    pub fn to_body(&self, model: &str) -> Value {
        let mut messages: Vec<Value> = self
            .messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        if let Some(image) = &self.image {
            if let Some(last_user) = messages.iter_mut().rev().find(|m| m["role"] == "user") {
                let text = last_user["content"].clone();
                last_user["content"] = json!([
                    {"type": "text", "text": text},
                    {"type": "image_url", "image_url": {"url": image.data_url()}},
                ]);
            }
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

/// Final text of a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub reasoning: String,
    pub answer: String,
}

/// One fragment from either stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Reasoning(String),
    Answer(String),
}

/// Two lazily consumed token streams backed by one response.
///
/// Dropping the stream aborts the reader task, which closes the underlying
/// connection.
pub struct ModelStream {
    reasoning: mpsc::UnboundedReceiver<String>,
    answer: mpsc::UnboundedReceiver<String>,
    task: Option<JoinHandle<Result<Completion, NlshError>>>,
}

impl ModelStream {
    /// Builds an already-settled stream from fixed fragments.
    pub fn from_fragments(
        reasoning: Vec<String>,
        answer: Vec<String>,
        result: Result<Completion, NlshError>,
    ) -> Self {
        let (reasoning_tx, reasoning_rx) = mpsc::unbounded_channel();
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        for r in reasoning {
            let _ = reasoning_tx.send(r);
        }
        for a in answer {
            let _ = answer_tx.send(a);
        }
        Self {
            reasoning: reasoning_rx,
            answer: answer_rx,
            task: Some(tokio::spawn(async move { result })),
        }
    }

    /// Next reasoning fragment; `None` once the reasoning stream is finished.
    pub async fn next_reasoning(&mut self) -> Option<String> {
        self.reasoning.recv().await
    }

    /// Next answer fragment; `None` once the answer stream is finished.
    pub async fn next_answer(&mut self) -> Option<String> {
        self.answer.recv().await
    }

    /// Next fragment from whichever stream has one, reasoning first.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        tokio::select! {
            biased;
            Some(r) = self.reasoning.recv() => Some(StreamEvent::Reasoning(r)),
            Some(a) = self.answer.recv() => Some(StreamEvent::Answer(a)),
            else => None,
        }
    }

    /// Waits for the response to settle and returns the accumulated text.
    pub async fn finish(mut self) -> Result<Completion, NlshError> {
        let Some(task) = self.task.take() else {
            return Ok(Completion::default());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => Err(NlshError::ModelRequestFailed {
                status: None,
                message: format!("stream reader stopped: {e}"),
            }),
        }
    }
}

impl Drop for ModelStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Trait for the model side of a Turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Opens a streamed chat call.
    ///
    /// # Errors
    ///
    /// `ImageTooLarge` when the attachment exceeds the backend limit (no
    /// request is sent), `ModelRequestFailed` when the request cannot be
    /// opened.
    async fn stream(&self, backend: &BackendConfig, request: ChatRequest) -> Result<ModelStream, NlshError>;
}

/// Model client speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatClient {
    http: Arc<dyn HttpClient>,
}

impl OpenAiCompatClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn stream(&self, backend: &BackendConfig, request: ChatRequest) -> Result<ModelStream, NlshError> {
        if let Some(image) = &request.image {
            image.check_fits(backend)?;
        }

        let body = request.to_body(&backend.model);
        debug!(
            "Streaming chat request to backend '{}' (model {}, temperature {})",
            backend.name, backend.model, request.temperature
        );

        let mut bytes = self
            .http
            .post_stream(&backend.completions_url(), &backend.api_key, &body)
            .await
            .map_err(|f| NlshError::model_request(f.status, f.message, &backend.api_key))?;

        let (reasoning_tx, reasoning_rx) = mpsc::unbounded_channel();
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        let reasoning_enabled = backend.reasoning_enabled();
        let api_key = backend.api_key.clone();

        let task = tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            let mut router = DeltaRouter::new(reasoning_enabled);
            let mut completion = Completion::default();

            let emit = |routed: Vec<StreamEvent>, completion: &mut Completion| {
                for event in routed {
                    match event {
                        StreamEvent::Reasoning(text) => {
                            completion.reasoning.push_str(&text);
                            let _ = reasoning_tx.send(text);
                        }
                        StreamEvent::Answer(text) => {
                            completion.answer.push_str(&text);
                            let _ = answer_tx.send(text);
                        }
                    }
                }
            };

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| NlshError::model_request(None, e, &api_key))?;
                for data in decoder.push(&chunk) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    let delta = parse_delta(&data).map_err(|e| NlshError::model_request(None, e, &api_key))?;
                    emit(router.route(delta), &mut completion);
                }
            }
            emit(router.finish(), &mut completion);
            trace!("Stream settled: {} answer chars, {} reasoning chars", completion.answer.len(), completion.reasoning.len());
            Ok::<_, NlshError>(completion)
        });

        Ok(ModelStream {
            reasoning: reasoning_rx,
            answer: answer_rx,
            task: Some(task),
        })
    }
}

/// Incremental server-sent-event decoder yielding `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds raw bytes and returns every complete `data:` payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Text carried by one streamed chunk.
#[derive(Debug, Default, PartialEq)]
pub struct Delta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

/// Parses one SSE payload into a [`Delta`].
pub fn parse_delta(data: &str) -> std::result::Result<Delta, String> {
    let event: Value = serde_json::from_str(data).map_err(|e| format!("malformed stream chunk: {e}: {data}"))?;

    if let Some(error) = event.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("backend reported an error during streaming");
        return Err(message.to_string());
    }

    let Some(delta) = event.pointer("/choices/0/delta") else {
        return Ok(Delta::default());
    };
    let text = |key: &str| delta.get(key).and_then(|v| v.as_str()).map(str::to_string);
    Ok(Delta {
        content: text("content"),
        reasoning: text("reasoning_content").or_else(|| text("reasoning")),
    })
}

/// Routes deltas to the reasoning or answer stream.
///
/// `<think>` spans inside content count as reasoning on reasoning backends
/// and are discarded on all others. Tags may be split across chunks.
struct DeltaRouter {
    reasoning_enabled: bool,
    inside_think: bool,
    pending: String,
}

impl DeltaRouter {
    fn new(reasoning_enabled: bool) -> Self {
        Self { reasoning_enabled, inside_think: false, pending: String::new() }
    }

    fn route(&mut self, delta: Delta) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
            if self.reasoning_enabled {
                events.push(StreamEvent::Reasoning(reasoning));
            } else {
                trace!("Dropping reasoning delta from non-reasoning backend");
            }
        }
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.split_think(&content, &mut events);
        }
        events
    }

    fn split_think(&mut self, content: &str, events: &mut Vec<StreamEvent>) {
        self.pending.push_str(content);
        loop {
            let tag = if self.inside_think { THINK_CLOSE } else { THINK_OPEN };
            if let Some(pos) = self.pending.find(tag) {
                let before: String = self.pending[..pos].to_string();
                self.pending.drain(..pos + tag.len());
                self.push_text(before, events);
                self.inside_think = !self.inside_think;
                continue;
            }
            // Hold back a possible partial tag at the end.
            let keep = (1..tag.len())
                .rev()
                .find(|k| self.pending.ends_with(&tag[..*k]))
                .unwrap_or(0);
            let split = self.pending.len() - keep;
            let ready: String = self.pending.drain(..split).collect();
            self.push_text(ready, events);
            return;
        }
    }

    fn push_text(&self, text: String, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        if self.inside_think {
            if self.reasoning_enabled {
                events.push(StreamEvent::Reasoning(text));
            } else {
                trace!("Dropping <think> span from non-reasoning backend");
            }
        } else {
            events.push(StreamEvent::Answer(text));
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            if self.inside_think {
                warn!("Stream ended inside an unterminated <think> block");
            }
            let rest = std::mem::take(&mut self.pending);
            self.push_text(rest, &mut events);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::mock::MockHttpClient;

    fn backend(model: &str) -> BackendConfig {
        BackendConfig {
            name: "test".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: "sk-test-key".to_string(),
            model: model.to_string(),
            supports_vision: true,
            max_image_size_mb: Some(1.0),
            is_reasoning_model: false,
        }
    }

    fn sse(delta: Value) -> String {
        format!("data: {}\n\n", json!({"choices": [{"delta": delta}]}))
    }

    async fn drain(mut stream: ModelStream) -> (Vec<StreamEvent>, Result<Completion, NlshError>) {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        (events, stream.finish().await)
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\n: keepalive\n"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.push(b"data: [DONE]\n"), vec!["[DONE]".to_string()]);
    }

    #[test]
    fn test_parse_delta_reads_content_and_reasoning() {
        let delta = parse_delta(r#"{"choices":[{"delta":{"content":"ls","reasoning_content":"hmm"}}]}"#).unwrap();
        assert_eq!(delta.content.as_deref(), Some("ls"));
        assert_eq!(delta.reasoning.as_deref(), Some("hmm"));
    }

    #[test]
    fn test_parse_delta_surfaces_api_error() {
        let err = parse_delta(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert_eq!(err, "quota exceeded");
    }

    #[test]
    fn test_parse_delta_rejects_garbage() {
        assert!(parse_delta("not json").is_err());
    }

    #[test]
    fn test_router_splits_think_tags_across_chunks() {
        let mut router = DeltaRouter::new(true);
        let mut events = Vec::new();
        for piece in ["<thi", "nk>plan it</th", "ink>ls -", "la"] {
            events.extend(router.route(Delta { content: Some(piece.to_string()), reasoning: None }));
        }
        events.extend(router.finish());

        let reasoning: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Reasoning(r) => Some(r.as_str()),
                _ => None,
            })
            .collect();
        let answer: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Answer(a) => Some(a.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(reasoning, "plan it");
        assert_eq!(answer, "ls -la");
    }

    #[test]
    fn test_router_discards_think_spans_for_plain_backend() {
        let mut router = DeltaRouter::new(false);
        let mut events = router.route(Delta {
            content: Some("<think>user wants files</think>ls -la".to_string()),
            reasoning: Some("dropped".to_string()),
        });
        events.extend(router.finish());
        assert_eq!(events, vec![StreamEvent::Answer("ls -la".to_string())]);
    }

    #[test]
    fn test_router_keeps_plain_content_for_plain_backend() {
        let mut router = DeltaRouter::new(false);
        let mut events = router.route(Delta { content: Some("echo 1 < in".to_string()), reasoning: None });
        events.extend(router.finish());
        let answer: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Answer(a) => Some(a.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(answer, "echo 1 < in");
    }

    #[test]
    fn test_request_body_embeds_image_in_last_user_message() {
        let image = ImageAttachment { mime_type: "image/png".to_string(), data: vec![1, 2, 3] };
        let request = ChatRequest::new(
            vec![ChatMessage::system("sys"), ChatMessage::user("what is this")],
            0.2,
        )
        .with_max_tokens(500)
        .with_image(Some(image));

        let body = request.to_body("gpt-4o");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["content"][0]["text"], "what is this");
        assert_eq!(body["messages"][1]["content"][1]["image_url"]["url"], "data:image/png;base64,AQID");
    }

    #[tokio::test]
    async fn test_stream_demultiplexes_reasoning_and_answer() {
        let http = Arc::new(MockHttpClient::new());
        http.push_chunks(vec![
            sse(json!({"reasoning_content": "user wants files"})),
            sse(json!({"content": "ls "})),
            sse(json!({"content": "-la"})),
            "data: [DONE]\n\n".to_string(),
        ]);
        let client = OpenAiCompatClient::new(http.clone());

        let stream = client
            .stream(&backend("deepseek-reasoner"), ChatRequest::new(vec![ChatMessage::user("list")], 0.2))
            .await
            .unwrap();
        let (events, result) = drain(stream).await;

        assert!(events.contains(&StreamEvent::Reasoning("user wants files".to_string())));
        let completion = result.unwrap();
        assert_eq!(completion.answer, "ls -la");
        assert_eq!(completion.reasoning, "user wants files");
    }

    #[tokio::test]
    async fn test_stream_drops_reasoning_for_plain_model() {
        let http = Arc::new(MockHttpClient::new());
        http.push_chunks(vec![
            sse(json!({"reasoning_content": "ignored"})),
            sse(json!({"content": "pwd"})),
        ]);
        let client = OpenAiCompatClient::new(http);

        let stream = client
            .stream(&backend("gpt-4o-mini"), ChatRequest::new(vec![ChatMessage::user("where")], 0.2))
            .await
            .unwrap();
        let (events, result) = drain(stream).await;

        assert_eq!(events, vec![StreamEvent::Answer("pwd".to_string())]);
        assert_eq!(result.unwrap().reasoning, "");
    }

    #[tokio::test]
    async fn test_stream_error_keeps_partial_output_and_fails() {
        let http = Arc::new(MockHttpClient::new());
        http.push_chunks(vec![
            sse(json!({"content": "find / "})),
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n".to_string(),
        ]);
        let client = OpenAiCompatClient::new(http);

        let stream = client
            .stream(&backend("gpt-4o-mini"), ChatRequest::new(vec![ChatMessage::user("x")], 0.2))
            .await
            .unwrap();
        let (events, result) = drain(stream).await;

        assert_eq!(events, vec![StreamEvent::Answer("find / ".to_string())]);
        assert!(matches!(result, Err(NlshError::ModelRequestFailed { ref message, .. }) if message == "overloaded"));
    }

    #[tokio::test]
    async fn test_open_failure_is_redacted() {
        let http = Arc::new(MockHttpClient::new());
        http.push_failure(Some(401), "invalid key sk-test-key");
        let client = OpenAiCompatClient::new(http);

        let err = client
            .stream(&backend("gpt-4o-mini"), ChatRequest::new(vec![ChatMessage::user("x")], 0.2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NlshError::ModelRequestFailed { status: Some(401), .. }));
        assert!(!err.to_string().contains("sk-test-key"));
    }

    #[tokio::test]
    async fn test_oversized_image_fails_before_request() {
        let http = Arc::new(MockHttpClient::new());
        let client = OpenAiCompatClient::new(http.clone());
        let image = ImageAttachment { mime_type: "image/png".to_string(), data: vec![0; 2 * 1024 * 1024] };

        let err = client
            .stream(
                &backend("gpt-4o"),
                ChatRequest::new(vec![ChatMessage::user("x")], 0.2).with_image(Some(image)),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NlshError::ImageTooLarge { .. }));
        assert_eq!(http.request_count(), 0);
    }

    #[test]
    fn test_check_fits_compares_against_backend_limit() {
        let small = ImageAttachment { mime_type: "image/png".to_string(), data: vec![0; 512 * 1024] };
        assert!(small.check_fits(&backend("gpt-4o")).is_ok());

        let large = ImageAttachment { mime_type: "image/png".to_string(), data: vec![0; 3 * 1024 * 1024] };
        match large.check_fits(&backend("gpt-4o")) {
            Err(NlshError::ImageTooLarge { size_mb, limit_mb }) => {
                assert_eq!(size_mb, 3.0);
                assert_eq!(limit_mb, 1.0);
            }
            other => panic!("expected ImageTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_from_fragments_replays_events() {
        let stream = ModelStream::from_fragments(
            vec!["why".to_string()],
            vec!["echo hi".to_string()],
            Ok(Completion { reasoning: "why".to_string(), answer: "echo hi".to_string() }),
        );
        let (events, result) = drain(stream).await;
        assert_eq!(events.len(), 2);
        assert_eq!(result.unwrap().answer, "echo hi");
    }
}
