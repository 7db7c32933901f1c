//! In-memory device state: `uid -> endpoint -> key -> value`.
//!
//! Writes merge key by key and never replace a whole endpoint. Every entry remembers whether
//! it was learned from the live stream or from a REST snapshot; snapshot data never overwrites
//! a live value.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::core::DeviceUid;
use crate::core::cbor::Value;

/// Endpoint slot holding device-level state (not scoped to an endpoint).
pub const DEVICE_LEVEL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    /// Scalar view of a decoded value; arrays and maps are not state values.
    pub fn from_cbor(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(*b),
            Value::Unsigned(n) => match i64::try_from(*n) {
                Ok(i) => StateValue::Int(i),
                Err(_) => StateValue::Float(*n as f64),
            },
            Value::Negative(n) => StateValue::Int(*n),
            Value::Float(f) => StateValue::Float(*f),
            Value::Text(s) => StateValue::Text(s.clone()),
            Value::Array(_) | Value::Map(_) => return None,
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(i) => Some(*i as f64),
            StateValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        StateValue::Int(i)
    }
}

impl From<f64> for StateValue {
    fn from(f: f64) -> Self {
        StateValue::Float(f)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Live,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub value: StateValue,
    pub origin: Origin,
}

/// One keyed state value, as carried by `device.state` envelopes and `/api/state` items.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub device_uid: DeviceUid,
    pub endpoint: u8,
    pub key: String,
    pub value: StateValue,
}

impl StateUpdate {
    /// Reads `{device_id, endpoint_id | endpoint, key, value}`. The endpoint may be a number or
    /// numeric text; a missing, zero or falsy endpoint means device level. Returns `None` when uid
    /// or key is empty, the endpoint is not a byte-sized whole number, or the value is not a scalar.
    pub fn from_cbor(data: &Value) -> Option<Self> {
        let device_uid = DeviceUid::normalized(data.get("device_id").and_then(Value::as_str).unwrap_or_default());
        let key = data.get("key").map(Value::to_string).unwrap_or_default();

        if device_uid.is_empty() || key.is_empty() {
            return None;
        }

        let raw_endpoint = ["endpoint_id", "endpoint"]
            .into_iter()
            .find_map(|field| data.get(field).filter(|v| !v.is_null()));
        let endpoint = endpoint_number(raw_endpoint)?;

        let value = match data.get("value") {
            None => StateValue::Null,
            Some(v) => match StateValue::from_cbor(v) {
                Some(value) => value,
                None => {
                    tracing::debug!("Dropping compound state value for {}/{}/{}", device_uid, endpoint, key);
                    return None;
                }
            },
        };

        Some(StateUpdate {
            device_uid,
            endpoint,
            key,
            value,
        })
    }
}

fn endpoint_number(raw: Option<&Value>) -> Option<u8> {
    let number = match raw {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Some(DEVICE_LEVEL),
        Some(Value::Bool(true)) => 1,
        Some(Value::Text(text)) => match text.trim() {
            "" => return Some(DEVICE_LEVEL),
            digits => Value::Float(digits.parse().ok()?).as_u64()?,
        },
        Some(other) => other.as_u64()?,
    };
    u8::try_from(number).ok()
}

type EndpointState = BTreeMap<String, StateEntry>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateMap {
    devices: HashMap<DeviceUid, BTreeMap<u8, EndpointState>>,
}

impl StateMap {
    /// Live values always win. Returns whether anything changed.
    pub fn apply_live(&mut self, update: StateUpdate) -> bool {
        let slot = self.slot(update.device_uid, update.endpoint);
        let entry = StateEntry {
            value: update.value,
            origin: Origin::Live,
        };

        match slot.get(&update.key) {
            Some(existing) if *existing == entry => false,
            _ => {
                slot.insert(update.key, entry);
                true
            }
        }
    }

    /// Fills the key unless a live value is already present. Returns whether anything changed.
    pub fn merge_snapshot(&mut self, update: StateUpdate) -> bool {
        let slot = self.slot(update.device_uid, update.endpoint);

        match slot.get(&update.key) {
            Some(existing) if existing.origin == Origin::Live || existing.value == update.value => false,
            _ => {
                slot.insert(
                    update.key,
                    StateEntry {
                        value: update.value,
                        origin: Origin::Snapshot,
                    },
                );
                true
            }
        }
    }

    /// Live values of an ended stream session become refreshable by the next snapshot.
    pub fn demote_live(&mut self) {
        self.devices
            .values_mut()
            .flat_map(|endpoints| endpoints.values_mut())
            .flat_map(|keys| keys.values_mut())
            .for_each(|entry| entry.origin = Origin::Snapshot);
    }

    pub fn remove_device(&mut self, uid: &DeviceUid) -> bool {
        self.devices.remove(uid).is_some()
    }

    pub fn get(&self, uid: &DeviceUid, endpoint: u8, key: &str) -> Option<&StateValue> {
        self.entry(uid, endpoint, key).map(|e| &e.value)
    }

    pub fn entry(&self, uid: &DeviceUid, endpoint: u8, key: &str) -> Option<&StateEntry> {
        self.devices.get(uid)?.get(&endpoint)?.get(key)
    }

    pub fn device(&self, uid: &DeviceUid) -> Option<&BTreeMap<u8, EndpointState>> {
        self.devices.get(uid)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// `{uid: {"endpoint": {key: value}}}` with endpoint ids as strings.
    pub fn to_json(&self) -> serde_json::Value {
        let mut uids: Vec<&DeviceUid> = self.devices.keys().collect();
        uids.sort();

        let devices = uids
            .into_iter()
            .map(|uid| (uid.to_string(), device_json(&self.devices[uid])))
            .collect::<serde_json::Map<_, _>>();

        serde_json::Value::Object(devices)
    }

    fn slot(&mut self, uid: DeviceUid, endpoint: u8) -> &mut EndpointState {
        self.devices.entry(uid).or_default().entry(endpoint).or_default()
    }
}

pub fn device_json(endpoints: &BTreeMap<u8, EndpointState>) -> serde_json::Value {
    let endpoints = endpoints
        .iter()
        .map(|(ep, keys)| {
            let keys = keys
                .iter()
                .map(|(k, e)| (k.clone(), serde_json::to_value(&e.value).unwrap_or_default()))
                .collect::<serde_json::Map<_, _>>();
            (ep.to_string(), serde_json::Value::Object(keys))
        })
        .collect::<serde_json::Map<_, _>>();

    serde_json::Value::Object(endpoints)
}
