mod client;

pub use client::{WsClient, WsConnection, WsInMessage};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct WsConfig {
    url: String,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl WsConfig {
    pub fn new(url: impl Into<String>, connect_timeout_ms: u64) -> Self {
        Self {
            url: url.into(),
            connect_timeout_ms,
        }
    }

    pub fn new_client(&self) -> WsClient {
        WsClient::new(&self.url, std::time::Duration::from_millis(self.connect_timeout_ms))
    }
}
