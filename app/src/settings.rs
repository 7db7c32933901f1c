use config::{Config, ConfigError, Environment, File};
use infrastructure::MonitoringConfig;
use serde::Deserialize;

use crate::adapter::GatewayConfig;
use crate::sync::SyncConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub monitoring: MonitoringConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config.toml"))
            .add_source(Environment::default().separator("_").list_separator(","));

        let s = builder.build()?;
        s.try_deserialize()
    }
}
