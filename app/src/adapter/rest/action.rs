use std::fmt;

use super::GatewayApi;
use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::core::id::validate_endpoint;
use crate::error::{Error, ValidationError};

const MAX_LEVEL: u8 = 254;
const MAX_TRANSITION_MS: u32 = 60_000;
const MAX_MIREDS: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Device { device_uid: DeviceUid, endpoint: u8 },
    Group { group_id: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
    Toggle,
    MoveToLevel { level: u8, transition_ms: u32 },
    MoveToColorXy { x: u16, y: u16, transition_ms: u32 },
    MoveToColorTemperature { mireds: u16, transition_ms: u32 },
    SceneStore { scene_id: u8 },
    SceneRecall { scene_id: u8 },
}

/// Optional command arguments, as they come from a command line or a form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandParams {
    pub level: Option<u8>,
    pub transition_ms: Option<u32>,
    pub x: Option<u16>,
    pub y: Option<u16>,
    pub mireds: Option<u16>,
    pub scene_id: Option<u8>,
}

/// Source endpoint cluster bound to a destination endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub src_device_uid: DeviceUid,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub dst_device_uid: DeviceUid,
    pub dst_endpoint: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command { target: Target, command: Command },
    Bind(Binding),
    Unbind(Binding),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::On => "onoff.on",
            Command::Off => "onoff.off",
            Command::Toggle => "onoff.toggle",
            Command::MoveToLevel { .. } => "level.move_to_level",
            Command::MoveToColorXy { .. } => "color.move_to_color_xy",
            Command::MoveToColorTemperature { .. } => "color.move_to_color_temperature",
            Command::SceneStore { .. } => "scene.store",
            Command::SceneRecall { .. } => "scene.recall",
        }
    }

    pub fn from_name(name: &str, params: CommandParams) -> Result<Self, ValidationError> {
        let transition_ms = params.transition_ms.unwrap_or(0);

        let command = match name {
            "onoff.on" => Command::On,
            "onoff.off" => Command::Off,
            "onoff.toggle" => Command::Toggle,
            "level.move_to_level" => Command::MoveToLevel {
                level: required("level", params.level)?,
                transition_ms,
            },
            "color.move_to_color_xy" => Command::MoveToColorXy {
                x: required("x", params.x)?,
                y: required("y", params.y)?,
                transition_ms,
            },
            "color.move_to_color_temperature" => Command::MoveToColorTemperature {
                mireds: required("mireds", params.mireds)?,
                transition_ms,
            },
            "scene.store" => Command::SceneStore {
                scene_id: required("scene_id", params.scene_id)?,
            },
            "scene.recall" => Command::SceneRecall {
                scene_id: required("scene_id", params.scene_id)?,
            },
            other => return Err(ValidationError::field("cmd", format!("unknown command {}", other))),
        };

        Ok(command)
    }

    fn is_scene(&self) -> bool {
        matches!(self, Command::SceneStore { .. } | Command::SceneRecall { .. })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let transition_ms = match *self {
            Command::MoveToLevel { level, transition_ms } => {
                if level > MAX_LEVEL {
                    return Err(ValidationError::field("level", format!("must be 0..={}", MAX_LEVEL)));
                }
                transition_ms
            }
            Command::MoveToColorXy { transition_ms, .. } => transition_ms,
            Command::MoveToColorTemperature { mireds, transition_ms } => {
                if !(1..=MAX_MIREDS).contains(&mireds) {
                    return Err(ValidationError::field("mireds", format!("must be 1..={}", MAX_MIREDS)));
                }
                transition_ms
            }
            Command::SceneStore { scene_id } | Command::SceneRecall { scene_id } => {
                if scene_id == 0 {
                    return Err(ValidationError::field("scene_id", "must be 1..=255"));
                }
                0
            }
            Command::On | Command::Off | Command::Toggle => 0,
        };

        if transition_ms > MAX_TRANSITION_MS {
            return Err(ValidationError::field(
                "transition_ms",
                format!("must be at most {}", MAX_TRANSITION_MS),
            ));
        }
        Ok(())
    }

    fn write_args(&self, entries: &mut Vec<(&'static str, Value)>) {
        match *self {
            Command::On | Command::Off | Command::Toggle => {}
            Command::MoveToLevel { level, transition_ms } => {
                entries.push(("level", level.into()));
                entries.push(("transition_ms", transition_ms.into()));
            }
            Command::MoveToColorXy { x, y, transition_ms } => {
                entries.push(("x", x.into()));
                entries.push(("y", y.into()));
                entries.push(("transition_ms", transition_ms.into()));
            }
            Command::MoveToColorTemperature { mireds, transition_ms } => {
                entries.push(("mireds", mireds.into()));
                entries.push(("transition_ms", transition_ms.into()));
            }
            Command::SceneStore { scene_id } | Command::SceneRecall { scene_id } => {
                entries.push(("scene_id", scene_id.into()));
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn required<T>(field: &'static str, value: Option<T>) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::field(field, "is required"))
}

fn validate_uid(uid: &DeviceUid) -> Result<(), ValidationError> {
    DeviceUid::parse(uid.as_str()).map(|_| ())
}

impl Action {
    pub fn device(device_uid: DeviceUid, endpoint: u8, command: Command) -> Self {
        Action::Command {
            target: Target::Device { device_uid, endpoint },
            command,
        }
    }

    pub fn group(group_id: u16, command: Command) -> Self {
        Action::Command {
            target: Target::Group { group_id },
            command,
        }
    }

    /// Checks everything the gateway would reject, before anything is sent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Action::Command { target, command } => {
                match target {
                    Target::Device { device_uid, endpoint } => {
                        validate_uid(device_uid)?;
                        validate_endpoint(u64::from(*endpoint))?;
                        if command.is_scene() {
                            return Err(ValidationError::field("cmd", "scene commands need a group target"));
                        }
                    }
                    Target::Group { group_id } => {
                        if *group_id == 0 || *group_id == 0xffff {
                            return Err(ValidationError::field("group_id", "must not be 0x0000 or 0xffff"));
                        }
                    }
                }
                command.validate()
            }
            Action::Bind(binding) | Action::Unbind(binding) => {
                validate_uid(&binding.src_device_uid)?;
                validate_endpoint(u64::from(binding.src_endpoint))?;
                validate_uid(&binding.dst_device_uid)?;
                validate_endpoint(u64::from(binding.dst_endpoint))?;
                if binding.cluster_id == 0 {
                    return Err(ValidationError::field("cluster_id", "must not be 0"));
                }
                Ok(())
            }
        }
    }

    pub fn to_cbor(&self) -> Value {
        let mut entries: Vec<(&'static str, Value)> = vec![("type", "zigbee".into())];

        match self {
            Action::Command { target, command } => {
                entries.push(("cmd", command.name().into()));
                match target {
                    Target::Device { device_uid, endpoint } => {
                        entries.push(("device_uid", device_uid.as_str().into()));
                        entries.push(("endpoint", (*endpoint).into()));
                    }
                    Target::Group { group_id } => {
                        entries.push(("group_id", format!("0x{:04x}", group_id).into()));
                    }
                }
                command.write_args(&mut entries);
            }
            Action::Bind(binding) | Action::Unbind(binding) => {
                let cmd = if matches!(self, Action::Bind(_)) { "bind" } else { "unbind" };
                entries.push(("cmd", cmd.into()));
                entries.push(("src_device_uid", binding.src_device_uid.as_str().into()));
                entries.push(("src_endpoint", binding.src_endpoint.into()));
                entries.push(("cluster_id", binding.cluster_id.into()));
                entries.push(("dst_device_uid", binding.dst_device_uid.as_str().into()));
                entries.push(("dst_endpoint", binding.dst_endpoint.into()));
            }
        }

        Value::map(entries)
    }
}

impl GatewayApi {
    /// Sends `{action}`. The decoded response may be `null`.
    #[tracing::instrument(skip(self))]
    pub async fn execute_action(&self, action: &Action) -> Result<Value, Error> {
        action.validate()?;
        let body = Value::map([("action", action.to_cbor())]);
        self.post_cbor(&["api", "actions"], &body).await
    }

    /// Sends `{actions: [...]}`; every action is validated first.
    #[tracing::instrument(skip(self))]
    pub async fn execute_actions(&self, actions: &[Action]) -> Result<Value, Error> {
        if actions.is_empty() {
            return Err(ValidationError::field("actions", "must not be empty").into());
        }
        for action in actions {
            action.validate()?;
        }

        let body = Value::map([("actions", Value::Array(actions.iter().map(Action::to_cbor).collect()))]);
        self.post_cbor(&["api", "actions"], &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    const LAMP: &str = "0x00124b0011223344";

    fn lamp() -> DeviceUid {
        DeviceUid::parse(LAMP).unwrap()
    }

    #[test]
    fn device_action_wire_shape() {
        let action = Action::device(
            lamp(),
            1,
            Command::MoveToLevel {
                level: 128,
                transition_ms: 300,
            },
        );

        assert_json_eq!(
            action.to_cbor().to_json(),
            json!({
                "type": "zigbee",
                "cmd": "level.move_to_level",
                "device_uid": LAMP,
                "endpoint": 1,
                "level": 128,
                "transition_ms": 300
            })
        );
    }

    #[test]
    fn group_action_uses_hex_group_id() {
        let action = Action::group(3, Command::SceneRecall { scene_id: 2 });

        assert!(action.validate().is_ok());
        assert_json_eq!(
            action.to_cbor().to_json(),
            json!({"type": "zigbee", "cmd": "scene.recall", "group_id": "0x0003", "scene_id": 2})
        );
    }

    #[test]
    fn binding_wire_shape() {
        let action = Action::Unbind(Binding {
            src_device_uid: lamp(),
            src_endpoint: 1,
            cluster_id: 0x0006,
            dst_device_uid: DeviceUid::parse("0x00124b00aabbccdd").unwrap(),
            dst_endpoint: 2,
        });

        assert!(action.validate().is_ok());
        assert_json_eq!(
            action.to_cbor().to_json(),
            json!({
                "type": "zigbee",
                "cmd": "unbind",
                "src_device_uid": LAMP,
                "src_endpoint": 1,
                "cluster_id": 6,
                "dst_device_uid": "0x00124b00aabbccdd",
                "dst_endpoint": 2
            })
        );
    }

    #[test]
    fn rejects_invalid_targets() {
        let bad_uid = Action::device(DeviceUid::normalized("0x1234"), 1, Command::On);
        let bad_endpoint = Action::device(lamp(), 241, Command::On);
        let broadcast_group = Action::group(0xffff, Command::Toggle);
        let scene_on_device = Action::device(lamp(), 1, Command::SceneStore { scene_id: 1 });

        assert!(matches!(bad_uid.validate(), Err(ValidationError::DeviceUid(_))));
        assert_eq!(bad_endpoint.validate(), Err(ValidationError::Endpoint(241)));
        assert!(broadcast_group.validate().is_err());
        assert!(scene_on_device.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_arguments() {
        let cases = [
            (Command::MoveToLevel { level: 255, transition_ms: 0 }, "level"),
            (Command::MoveToLevel { level: 10, transition_ms: 60_001 }, "transition_ms"),
            (Command::MoveToColorTemperature { mireds: 0, transition_ms: 0 }, "mireds"),
            (Command::MoveToColorTemperature { mireds: 1001, transition_ms: 0 }, "mireds"),
        ];

        for (command, field) in cases {
            let err = Action::device(lamp(), 1, command).validate().unwrap_err();
            assert!(matches!(err, ValidationError::Field { field: f, .. } if f == field), "{:?}", command);
        }
    }

    #[test]
    fn binding_needs_a_cluster() {
        let action = Action::Bind(Binding {
            src_device_uid: lamp(),
            src_endpoint: 1,
            cluster_id: 0,
            dst_device_uid: lamp(),
            dst_endpoint: 2,
        });

        assert!(matches!(action.validate(), Err(ValidationError::Field { field: "cluster_id", .. })));
    }

    #[test]
    fn commands_parse_by_name() {
        let params = CommandParams {
            level: Some(40),
            transition_ms: Some(500),
            ..CommandParams::default()
        };

        assert_eq!(Command::from_name("onoff.toggle", params), Ok(Command::Toggle));
        assert_eq!(
            Command::from_name("level.move_to_level", params),
            Ok(Command::MoveToLevel {
                level: 40,
                transition_ms: 500
            })
        );
        assert!(matches!(
            Command::from_name("color.move_to_color_xy", params),
            Err(ValidationError::Field { field: "x", .. })
        ));
        assert!(Command::from_name("onoff.blink", params).is_err());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let api = super::super::tests::api("http://127.0.0.1:1");

        let err = api.execute_actions(&[]).await.unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError::Field { field: "actions", .. })));
    }

    #[tokio::test]
    async fn invalid_action_is_never_sent() {
        let api = super::super::tests::api("http://127.0.0.1:1");

        let err = api
            .execute_action(&Action::device(lamp(), 0, Command::On))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(ValidationError::Endpoint(0))));
    }
}
