mod http;
mod monitoring;
mod ws;

pub use monitoring::{EnvFilterConfig, MonitoringConfig, OtlpConfig};

pub use http::client::HttpClientConfig;
pub use ws::{WsClient, WsConfig, WsConnection, WsInMessage};
