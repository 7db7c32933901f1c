mod blob;
mod classify;

pub use blob::parse_device_blob;
pub use classify::{Capabilities, EndpointKind, classify, cluster};

#[cfg(test)]
pub(crate) use blob::testing;

use serde::{Deserialize, Serialize};

use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::device_state::{DEVICE_LEVEL, StateUpdate, StateValue};
use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub device_uid: DeviceUid,
    pub short_addr: u16,
    pub last_seen_ms: u64,
    pub name: String,
    pub has_onoff: bool,
    pub has_button: bool,
    pub endpoints: Vec<Endpoint>,
}

impl Device {
    /// Stand-in for a device only known through one of its endpoint records.
    pub fn placeholder(device_uid: DeviceUid, short_addr: u16) -> Self {
        Self {
            device_uid,
            short_addr,
            last_seen_ms: 0,
            name: String::new(),
            has_onoff: false,
            has_button: false,
            endpoints: vec![],
        }
    }

    pub fn endpoint(&self, endpoint: u8) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.endpoint == endpoint)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { self.device_uid.as_str() } else { &self.name }
    }
}

/// Endpoint with its derived capabilities, computed from the cluster lists when constructed.
/// Cluster lists are read-only so the derived lists cannot drift from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    in_clusters: Vec<u16>,
    out_clusters: Vec<u16>,
    kind: EndpointKind,
    accepts: Vec<&'static str>,
    emits: Vec<&'static str>,
    reports: Vec<&'static str>,
}

impl Endpoint {
    pub fn new(endpoint: u8, profile_id: u16, device_id: u16, in_clusters: Vec<u16>, out_clusters: Vec<u16>) -> Self {
        let Capabilities {
            kind,
            accepts,
            emits,
            reports,
        } = classify(&in_clusters, &out_clusters);

        Self {
            endpoint,
            profile_id,
            device_id,
            in_clusters,
            out_clusters,
            kind,
            accepts,
            emits,
            reports,
        }
    }

    pub fn in_clusters(&self) -> &[u16] {
        &self.in_clusters
    }

    pub fn out_clusters(&self) -> &[u16] {
        &self.out_clusters
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn accepted_commands(&self) -> &[&'static str] {
        &self.accepts
    }

    pub fn emits(&self) -> &[&'static str] {
        &self.emits
    }

    pub fn reports(&self) -> &[&'static str] {
        &self.reports
    }

    pub fn accepts(&self, command: &str) -> bool {
        self.accepts.contains(&command)
    }
}

/// Raw attribute reading as stored by the gateway, in ZCL units.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub endpoint: u8,
    pub cluster_id: u16,
    pub attr_id: u16,
    pub value: i64,
    pub ts_ms: u64,
}

impl SensorReading {
    /// Canonical state key and value for the readings the dashboard knows how to show.
    pub fn to_state(&self) -> Option<(&'static str, StateValue)> {
        let raw = self.value as f64;

        let state = match (self.cluster_id, self.attr_id) {
            (cluster::TEMPERATURE, 0x0000) => ("temperature_c", StateValue::Float(raw / 100.0)),
            (cluster::HUMIDITY, 0x0000) => ("humidity_pct", StateValue::Float(raw / 100.0)),
            (cluster::POWER_CONFIG, 0x0021) => ("battery_pct", StateValue::Float(raw / 2.0)),
            (cluster::POWER_CONFIG, 0x0020) => ("battery_mv", StateValue::Int(self.value * 100)),
            (cluster::OCCUPANCY, 0x0000) => ("occupancy", StateValue::Bool(self.value != 0)),
            (cluster::ILLUMINANCE, 0x0000) => ("illuminance", StateValue::Int(self.value)),
            (cluster::PRESSURE, 0x0000) => ("pressure_hpa", StateValue::Int(self.value)),
            (cluster::FLOW, 0x0000) => ("flow", StateValue::Float(raw / 10.0)),
            _ => return None,
        };

        Some(state)
    }
}

/// `GET /api/devices/{uid}`: device header, endpoints, raw sensor readings and the
/// device-level state map.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDetail {
    pub device: Device,
    pub sensors: Vec<SensorReading>,
    pub state: Vec<(String, StateValue)>,
}

#[derive(Deserialize)]
struct DetailDoc {
    device_uid: DeviceUid,
    #[serde(default)]
    name: String,
    #[serde(default)]
    short_addr: u16,
    #[serde(default)]
    last_seen_ms: u64,
    #[serde(default)]
    has_onoff: bool,
    #[serde(default)]
    has_button: bool,
    #[serde(default)]
    endpoints: Vec<EndpointDoc>,
    #[serde(default)]
    sensors: Vec<SensorDoc>,
}

#[derive(Deserialize)]
struct EndpointDoc {
    endpoint: u8,
    #[serde(default)]
    profile_id: u16,
    #[serde(default)]
    device_id: u16,
    #[serde(default)]
    in_clusters: Vec<u16>,
    #[serde(default)]
    out_clusters: Vec<u16>,
}

#[derive(Deserialize)]
struct SensorDoc {
    endpoint: u8,
    cluster_id: u16,
    attr_id: u16,
    value_i32: Option<i64>,
    value_u32: Option<i64>,
    #[serde(default)]
    ts_ms: u64,
}

impl DeviceDetail {
    pub fn from_cbor(doc: &Value) -> Result<Self, DecodeError> {
        let parsed: DetailDoc = doc.deserialize()?;

        let endpoints = parsed
            .endpoints
            .into_iter()
            .map(|e| Endpoint::new(e.endpoint, e.profile_id, e.device_id, e.in_clusters, e.out_clusters))
            .collect();

        let sensors = parsed
            .sensors
            .into_iter()
            .filter_map(|s| {
                let value = s.value_i32.or(s.value_u32)?;
                Some(SensorReading {
                    endpoint: s.endpoint,
                    cluster_id: s.cluster_id,
                    attr_id: s.attr_id,
                    value,
                    ts_ms: s.ts_ms,
                })
            })
            .collect();

        let state = match doc.get("state") {
            Some(Value::Map(entries)) => entries
                .iter()
                .filter_map(|(k, v)| StateValue::from_cbor(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => vec![],
        };

        Ok(Self {
            device: Device {
                device_uid: parsed.device_uid,
                short_addr: parsed.short_addr,
                last_seen_ms: parsed.last_seen_ms,
                name: parsed.name.trim().to_owned(),
                has_onoff: parsed.has_onoff,
                has_button: parsed.has_button,
                endpoints,
            },
            sensors,
            state,
        })
    }

    /// Device-level state followed by converted sensor readings, ready for a snapshot merge.
    pub fn state_updates(&self) -> Vec<StateUpdate> {
        let uid = &self.device.device_uid;

        let device_level = self.state.iter().map(|(key, value)| StateUpdate {
            device_uid: uid.clone(),
            endpoint: DEVICE_LEVEL,
            key: key.clone(),
            value: value.clone(),
        });

        let sensors = self.sensors.iter().filter_map(|reading| {
            let (key, value) = reading.to_state()?;
            Some(StateUpdate {
                device_uid: uid.clone(),
                endpoint: reading.endpoint,
                key: key.to_owned(),
                value,
            })
        });

        device_level.chain(sensors).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(cluster_id: u16, attr_id: u16, value: i64) -> SensorReading {
        SensorReading {
            endpoint: 1,
            cluster_id,
            attr_id,
            value,
            ts_ms: 0,
        }
    }

    #[test]
    fn endpoint_capabilities_follow_its_clusters() {
        let ep = Endpoint::new(1, 0x0104, 0x0101, vec![cluster::ONOFF, cluster::LEVEL], vec![]);
        let caps = classify(ep.in_clusters(), ep.out_clusters());

        assert_eq!(ep.kind(), caps.kind);
        assert_eq!(ep.accepted_commands(), caps.accepts.as_slice());
        assert_eq!(ep.emits(), caps.emits.as_slice());
        assert_eq!(ep.reports(), caps.reports.as_slice());
        assert!(ep.accepts("level.move_to_level"));
    }

    #[test]
    fn sensor_conversion() {
        assert_eq!(
            reading(cluster::TEMPERATURE, 0, 2150).to_state(),
            Some(("temperature_c", StateValue::Float(21.5)))
        );
        assert_eq!(
            reading(cluster::HUMIDITY, 0, 4520).to_state(),
            Some(("humidity_pct", StateValue::Float(45.2)))
        );
        assert_eq!(
            reading(cluster::POWER_CONFIG, 0x0021, 200).to_state(),
            Some(("battery_pct", StateValue::Float(100.0)))
        );
        assert_eq!(
            reading(cluster::POWER_CONFIG, 0x0020, 30).to_state(),
            Some(("battery_mv", StateValue::Int(3000)))
        );
        assert_eq!(
            reading(cluster::OCCUPANCY, 0, 1).to_state(),
            Some(("occupancy", StateValue::Bool(true)))
        );
        assert_eq!(reading(cluster::FLOW, 0, 125).to_state(), Some(("flow", StateValue::Float(12.5))));
        assert_eq!(reading(cluster::TEMPERATURE, 0x0001, 2150).to_state(), None);
        assert_eq!(reading(cluster::ONOFF, 0, 1).to_state(), None);
    }

    #[test]
    fn detail_from_cbor() {
        let doc = Value::map([
            ("device_uid", Value::from("0x00124B0011223344")),
            ("name", Value::from("Sensor ")),
            ("short_addr", Value::from(0x1234u16)),
            ("has_onoff", Value::from(false)),
            ("has_button", Value::from(false)),
            ("last_seen_ms", Value::from(5000u64)),
            (
                "endpoints",
                Value::Array(vec![Value::map([
                    ("endpoint", Value::from(1u8)),
                    ("profile_id", Value::from(0x0104u16)),
                    ("device_id", Value::from(0x0302u16)),
                    (
                        "in_clusters",
                        Value::Array(vec![Value::from(cluster::TEMPERATURE), Value::from(cluster::HUMIDITY)]),
                    ),
                    ("out_clusters", Value::Array(vec![])),
                    ("kind", Value::from("temp_humidity_sensor")),
                ])]),
            ),
            (
                "sensors",
                Value::Array(vec![
                    Value::map([
                        ("endpoint", Value::from(1u8)),
                        ("cluster_id", Value::from(cluster::TEMPERATURE)),
                        ("attr_id", Value::from(0u16)),
                        ("value_i32", Value::from(-250i64)),
                        ("ts_ms", Value::from(4000u64)),
                    ]),
                    Value::map([
                        ("endpoint", Value::from(1u8)),
                        ("cluster_id", Value::from(cluster::HUMIDITY)),
                        ("attr_id", Value::from(0u16)),
                        ("value_u32", Value::from(5000u32)),
                        ("ts_ms", Value::from(4000u64)),
                    ]),
                ]),
            ),
            ("state", Value::map([("lqi", Value::from(180u8)), ("nested", Value::Array(vec![]))])),
        ]);

        let detail = DeviceDetail::from_cbor(&doc).unwrap();

        assert_eq!(detail.device.device_uid.as_str(), "0x00124b0011223344");
        assert_eq!(detail.device.name, "Sensor");
        assert_eq!(detail.device.endpoints[0].kind(), EndpointKind::TempHumiditySensor);
        assert_eq!(detail.sensors.len(), 2);
        assert_eq!(detail.state, vec![("lqi".to_owned(), StateValue::Int(180))]);

        let updates = detail.state_updates();
        let keys: Vec<(u8, &str)> = updates.iter().map(|u| (u.endpoint, u.key.as_str())).collect();
        assert_eq!(keys, vec![(0, "lqi"), (1, "temperature_c"), (1, "humidity_pct")]);
        assert_eq!(updates[1].value, StateValue::Float(-2.5));
    }

    #[test]
    fn detail_requires_uid() {
        let doc = Value::map([("name", Value::from("x"))]);

        assert!(matches!(DeviceDetail::from_cbor(&doc), Err(DecodeError::Shape(_))));
    }

    #[test]
    fn display_name_falls_back_to_uid() {
        let device = Device::placeholder(DeviceUid::normalized("0x00124b0011223344"), 1);

        assert_eq!(device.display_name(), "0x00124b0011223344");
    }
}
