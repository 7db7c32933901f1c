pub mod rest;
pub mod ws;

use anyhow::Context;
use infrastructure::{HttpClientConfig, WsConfig};
use reqwest::Url;
use serde::Deserialize;

use crate::core::cbor;
use rest::GatewayApi;
use ws::WsStreamConnector;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_ws_path() -> String {
    "/ws".to_owned()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl GatewayConfig {
    pub fn new_api(&self) -> anyhow::Result<GatewayApi> {
        let base_url = Url::parse(&self.base_url).with_context(|| format!("Invalid gateway url {}", self.base_url))?;
        let client = HttpClientConfig::new(Some(cbor::CONTENT_TYPE.to_owned()), self.request_timeout_ms)
            .new_tracing_client()
            .context("Error creating gateway HTTP client")?;

        Ok(GatewayApi::new(client, base_url))
    }

    pub fn new_stream_connector(&self) -> anyhow::Result<WsStreamConnector> {
        let url = self.ws_url()?;
        Ok(WsStreamConnector::new(
            WsConfig::new(url.as_str(), self.connect_timeout_ms).new_client(),
        ))
    }

    /// Websocket url on the same host: `http` becomes `ws`, `https` becomes `wss`.
    fn ws_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url).with_context(|| format!("Invalid gateway url {}", self.base_url))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => anyhow::bail!("Unsupported gateway url scheme {}", other),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("Cannot use scheme {} for {}", scheme, self.base_url))?;
        url.set_path(&self.ws_path);

        Ok(url)
    }
}
