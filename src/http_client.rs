//! HTTP client abstraction for the model backend.
//!
//! Chat completions are always streamed, so the trait hands back the raw
//! response body as a stream of byte chunks. The SSE framing is parsed by
//! [`crate::llm_client`].

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Client;

/// Chunks of a streamed response body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, String>>;

/// Failure to open a streamed request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpFailure {
    /// HTTP status, when the server answered at all.
    pub status: Option<u16>,
    pub message: String,
}

/// Trait for HTTP communication with the model backend.
///
/// This abstraction allows injecting mock HTTP clients for testing without
/// making real network requests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body
    /// as a stream.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpFailure`] when the connection fails or the server
    /// answers with a non-success status. For non-success statuses the
    /// message carries the response body.
    async fn post_stream(
        &self,
        url: &str,
        bearer_token: &str,
        body: &serde_json::Value,
    ) -> Result<ByteStream, HttpFailure>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_stream(
        &self,
        url: &str,
        bearer_token: &str,
        body: &serde_json::Value,
    ) -> Result<ByteStream, HttpFailure> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        if !bearer_token.is_empty() {
            request = request.bearer_auth(bearer_token);
        }

        let response = request.json(body).send().await.map_err(|e| HttpFailure {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpFailure {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()));
        Ok(stream.boxed())
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockHttpClient;
    use super::*;

    #[tokio::test]
    async fn test_mock_http_client_replays_chunks_and_records_body() {
        let client = MockHttpClient::new();
        client.push_chunks(vec!["data: a\n\n".to_string(), "data: b\n\n".to_string()]);

        let body = serde_json::json!({"model": "m"});
        let mut stream = client.post_stream("http://x", "", &body).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend(chunk.unwrap());
        }

        assert_eq!(String::from_utf8(collected).unwrap(), "data: a\n\ndata: b\n\n");
        assert_eq!(client.request_count(), 1);
        assert_eq!(client.requests.lock().unwrap()[0], body);
    }

    #[tokio::test]
    async fn test_mock_http_client_without_reply_fails() {
        let client = MockHttpClient::new();
        let result = client.post_stream("http://x", "", &serde_json::json!({})).await;
        assert!(result.is_err());
    }
}
