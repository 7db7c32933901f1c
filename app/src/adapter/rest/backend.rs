use super::{GatewayApi, GroupStore};
use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::device_state::StateUpdate;
use crate::directory::{Device, DeviceDetail};
use crate::documents::Automation;
use crate::error::Error;
use crate::sync::GatewayRest;

/// REST side of the sync engine: the gateway api plus the group store it reloads.
#[derive(Debug, Clone)]
pub struct SyncBackend {
    api: GatewayApi,
    groups: GroupStore,
}

impl SyncBackend {
    pub fn new(api: GatewayApi, groups: GroupStore) -> Self {
        Self { api, groups }
    }
}

impl GatewayRest for SyncBackend {
    async fn fetch_directory(&self) -> Result<Vec<Device>, Error> {
        self.api.fetch_devices().await
    }

    async fn fetch_state_snapshot(&self) -> Result<Vec<StateUpdate>, Error> {
        self.api.fetch_state().await
    }

    async fn fetch_device_detail(&self, uid: &DeviceUid) -> Result<DeviceDetail, Error> {
        self.api.fetch_device(uid).await
    }

    async fn fetch_automations(&self) -> Result<Vec<Automation>, Error> {
        self.api.fetch_automations().await
    }

    async fn fetch_settings(&self) -> Result<Option<Value>, Error> {
        self.api.fetch_settings().await
    }

    async fn reload_groups(&self) -> Result<(), Error> {
        self.groups.reload().await
    }
}
