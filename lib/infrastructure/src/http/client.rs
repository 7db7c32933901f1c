use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl HttpClientConfig {
    pub fn new(content_type: Option<String>, timeout_ms: u64) -> Self {
        Self {
            content_type,
            timeout_ms,
        }
    }

    /// Client that sends and accepts `content_type` on every request unless overridden per request.
    pub fn new_tracing_client(&self) -> anyhow::Result<ClientWithMiddleware> {
        let mut headers = HeaderMap::new();

        if let Some(content_type) = &self.content_type {
            let value = HeaderValue::from_str(content_type)?;
            headers.insert(header::ACCEPT, value.clone());
            headers.insert(header::CONTENT_TYPE, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(self.timeout_ms))
            .build()?;

        Ok(reqwest_middleware::ClientBuilder::new(client)
            .with(TracingMiddleware::default())
            .build())
    }
}
