use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::cbor::{self, Value};
use crate::device_state::StateUpdate;
use crate::error::DecodeError;

pub const DEVICE_STATE: &str = "device.state";
pub const GATEWAY_EVENT: &str = "gateway.event";

/// Typed, timestamped push message from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub ts_ms: u64,
    pub kind: String,
    pub data: Value,
}

/// Resource a `gateway.event` asks the client to re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeNotice {
    Devices,
    Automations,
    Groups,
    Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    State(StateUpdate),
    Changed(ChangeNotice),
    Ignore,
}

impl Envelope {
    /// `Ok(None)` for well-formed items that are not envelopes (not a map, or no `type`).
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, DecodeError> {
        let msg = cbor::decode(bytes)?;
        if !matches!(msg, Value::Map(_)) {
            return Ok(None);
        }

        let kind = msg.get("type").map(Value::to_string).unwrap_or_default();
        if kind.is_empty() || kind == "null" {
            return Ok(None);
        }

        let data = match msg.get("data") {
            Some(data @ Value::Map(_)) => data.clone(),
            _ => Value::Map(vec![]),
        };

        Ok(Some(Envelope {
            ts_ms: msg.get("ts_ms").and_then(Value::as_u64).unwrap_or(0),
            kind,
            data,
        }))
    }

    /// Gateway wall-clock time of the event; `None` when the gateway sent no timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.ts_ms == 0 {
            return None;
        }
        i64::try_from(self.ts_ms).ok().and_then(DateTime::from_timestamp_millis)
    }

    pub fn route(&self) -> Route {
        match self.kind.as_str() {
            DEVICE_STATE => StateUpdate::from_cbor(&self.data).map_or(Route::Ignore, Route::State),
            GATEWAY_EVENT => {
                let notice = match self.data.get("event_type").and_then(Value::as_str) {
                    Some("device.changed") => ChangeNotice::Devices,
                    Some("automation.changed") => ChangeNotice::Automations,
                    Some("group.changed") => ChangeNotice::Groups,
                    Some("settings.changed") => ChangeNotice::Settings,
                    _ => return Route::Ignore,
                };
                Route::Changed(notice)
            }
            _ => Route::Ignore,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeView<'a> {
    ts_ms: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    data: serde_json::Value,
}

impl Envelope {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(EnvelopeView {
            ts_ms: self.ts_ms,
            kind: &self.kind,
            data: self.data.to_json(),
        })
        .unwrap_or_default()
    }
}
