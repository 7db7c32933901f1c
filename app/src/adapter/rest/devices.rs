use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::{GatewayApi, RawResponse};
use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::device_state::StateUpdate;
use crate::directory::{Device, DeviceDetail, parse_device_blob};
use crate::error::{Error, ValidationError};

pub const DEFAULT_PERMIT_JOIN_SECONDS: u8 = 180;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermitJoin {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub seconds: u64,
}

impl GatewayApi {
    /// Decoded device directory. While the gateway is still building it (202) the list is empty.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_devices(&self) -> Result<Vec<Device>, Error> {
        let response = self.request(Method::GET, &["api", "devices", "flatbuffer"], None).await?;
        directory_from_response(&response)
    }

    #[tracing::instrument(skip(self))]
    pub async fn fetch_state(&self) -> Result<Vec<StateUpdate>, Error> {
        let doc = self.get_cbor(&["api", "state"]).await?;
        Ok(state_items(&doc))
    }

    #[tracing::instrument(skip(self))]
    pub async fn fetch_device(&self, uid: &DeviceUid) -> Result<DeviceDetail, Error> {
        let doc = self.get_cbor(&["api", "devices", uid.as_str()]).await?;
        Ok(DeviceDetail::from_cbor(&doc)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn rename_device(&self, uid: &DeviceUid, name: &str) -> Result<(), Error> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::field("name", "must not be empty").into());
        }

        let body = Value::map([("device_uid", Value::from(uid.as_str())), ("name", Value::from(name))]);
        self.post_cbor(&["api", "devices"], &body).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_device(&self, uid: &DeviceUid) -> Result<(), Error> {
        let body = Value::map([("device_uid", Value::from(uid.as_str()))]);
        self.post_cbor(&["api", "devices", "remove"], &body).await?;
        Ok(())
    }

    /// Opens the network for joining devices.
    #[tracing::instrument(skip(self))]
    pub async fn permit_join(&self, seconds: u8) -> Result<PermitJoin, Error> {
        if seconds == 0 {
            return Err(ValidationError::field("seconds", "must be 1..=255").into());
        }

        let doc = self
            .post_cbor(&["api", "network", "permit_join"], &Value::map([("seconds", Value::from(seconds))]))
            .await?;

        tracing::info!("Permit join requested for {}s", seconds);

        if doc.is_null() {
            return Ok(PermitJoin {
                ok: true,
                seconds: u64::from(seconds),
            });
        }
        Ok(doc.deserialize()?)
    }
}

fn directory_from_response(response: &RawResponse) -> Result<Vec<Device>, Error> {
    if response.status == StatusCode::ACCEPTED || response.body.is_empty() {
        tracing::debug!("Gateway directory not ready yet ({})", response.status);
        return Ok(vec![]);
    }
    Ok(parse_device_blob(&response.body)?)
}

// `{items: [...]}`; incomplete or compound items are skipped.
fn state_items(doc: &Value) -> Vec<StateUpdate> {
    doc.get("items")
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(StateUpdate::from_cbor)
        .collect()
}
