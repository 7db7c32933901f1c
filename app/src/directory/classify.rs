use std::fmt;

use serde::Serialize;

/// ZCL cluster identifiers the classifier knows about.
pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ONOFF: u16 = 0x0006;
    pub const LEVEL: u16 = 0x0008;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE: u16 = 0x0400;
    pub const TEMPERATURE: u16 = 0x0402;
    pub const PRESSURE: u16 = 0x0403;
    pub const FLOW: u16 = 0x0404;
    pub const HUMIDITY: u16 = 0x0405;
    pub const OCCUPANCY: u16 = 0x0406;
}

const ONOFF_COMMANDS: &[&str] = &[
    "onoff.off",
    "onoff.on",
    "onoff.toggle",
    "onoff.off_with_effect",
    "onoff.on_with_recall_global_scene",
    "onoff.on_with_timed_off",
];

const ONOFF_EMITTED: &[&str] = &["onoff.off", "onoff.on", "onoff.toggle"];

const LEVEL_COMMANDS: &[&str] = &[
    "level.move_to_level",
    "level.move",
    "level.step",
    "level.stop",
    "level.move_to_level_with_onoff",
    "level.move_with_onoff",
    "level.step_with_onoff",
    "level.stop_with_onoff",
];

const COLOR_COMMANDS: &[&str] = &[
    "color.move_to_hue",
    "color.move_hue",
    "color.step_hue",
    "color.move_to_saturation",
    "color.move_saturation",
    "color.step_saturation",
    "color.move_to_hue_saturation",
    "color.move_to_color_xy",
    "color.move_to_color_temperature",
    "color.stop_move_step",
];

const COLOR_EMITTED: &[&str] = &["color.*"];
const GROUPS_COMMANDS: &[&str] = &["groups.add", "groups.remove"];
const SCENES_COMMANDS: &[&str] = &["scenes.recall"];

const ACCEPTS: &[(u16, &[&str])] = &[
    (cluster::ONOFF, ONOFF_COMMANDS),
    (cluster::LEVEL, LEVEL_COMMANDS),
    (cluster::COLOR_CONTROL, COLOR_COMMANDS),
    (cluster::GROUPS, GROUPS_COMMANDS),
    (cluster::SCENES, SCENES_COMMANDS),
];

const EMITS: &[(u16, &[&str])] = &[
    (cluster::ONOFF, ONOFF_EMITTED),
    (cluster::LEVEL, LEVEL_COMMANDS),
    (cluster::COLOR_CONTROL, COLOR_EMITTED),
];

const REPORTS: &[(u16, &str)] = &[
    (cluster::ONOFF, "onoff"),
    (cluster::LEVEL, "level"),
    (cluster::TEMPERATURE, "temperature_c"),
    (cluster::HUMIDITY, "humidity_pct"),
    (cluster::OCCUPANCY, "occupancy"),
    (cluster::ILLUMINANCE, "illuminance"),
    (cluster::POWER_CONFIG, "battery_pct"),
];

const SENSOR_CLUSTERS: &[u16] = &[
    cluster::TEMPERATURE,
    cluster::HUMIDITY,
    cluster::OCCUPANCY,
    cluster::ILLUMINANCE,
    cluster::PRESSURE,
    cluster::FLOW,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    ColorLight,
    DimmableLight,
    Relay,
    DimmerSwitch,
    Switch,
    TempHumiditySensor,
    TemperatureSensor,
    HumiditySensor,
    OccupancySensor,
    IlluminanceSensor,
    PressureSensor,
    FlowSensor,
    Sensor,
    Unknown,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::ColorLight => "color_light",
            EndpointKind::DimmableLight => "dimmable_light",
            EndpointKind::Relay => "relay",
            EndpointKind::DimmerSwitch => "dimmer_switch",
            EndpointKind::Switch => "switch",
            EndpointKind::TempHumiditySensor => "temp_humidity_sensor",
            EndpointKind::TemperatureSensor => "temperature_sensor",
            EndpointKind::HumiditySensor => "humidity_sensor",
            EndpointKind::OccupancySensor => "occupancy_sensor",
            EndpointKind::IlluminanceSensor => "illuminance_sensor",
            EndpointKind::PressureSensor => "pressure_sensor",
            EndpointKind::FlowSensor => "flow_sensor",
            EndpointKind::Sensor => "sensor",
            EndpointKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub kind: EndpointKind,
    pub accepts: Vec<&'static str>,
    pub emits: Vec<&'static str>,
    pub reports: Vec<&'static str>,
}

pub fn classify(in_clusters: &[u16], out_clusters: &[u16]) -> Capabilities {
    Capabilities {
        kind: kind_of(in_clusters, out_clusters),
        accepts: commands_for(ACCEPTS, in_clusters),
        emits: commands_for(EMITS, out_clusters),
        reports: REPORTS
            .iter()
            .filter(|(id, _)| in_clusters.contains(id))
            .map(|(_, key)| *key)
            .collect(),
    }
}

// First match wins: actuators before sensors, color before level before plain on/off.
fn kind_of(in_clusters: &[u16], out_clusters: &[u16]) -> EndpointKind {
    let has_in = |id: u16| in_clusters.contains(&id);
    let has_out = |id: u16| out_clusters.contains(&id);

    if has_in(cluster::COLOR_CONTROL) {
        return EndpointKind::ColorLight;
    }
    if has_in(cluster::LEVEL) && has_in(cluster::ONOFF) {
        return EndpointKind::DimmableLight;
    }
    if has_in(cluster::ONOFF) {
        return EndpointKind::Relay;
    }
    if has_out(cluster::ONOFF) {
        return if has_out(cluster::LEVEL) {
            EndpointKind::DimmerSwitch
        } else {
            EndpointKind::Switch
        };
    }

    if !SENSOR_CLUSTERS.iter().any(|id| has_in(*id)) {
        return EndpointKind::Unknown;
    }

    let temp = has_in(cluster::TEMPERATURE);
    let humidity = has_in(cluster::HUMIDITY);

    if temp && humidity {
        EndpointKind::TempHumiditySensor
    } else if temp {
        EndpointKind::TemperatureSensor
    } else if humidity {
        EndpointKind::HumiditySensor
    } else if has_in(cluster::OCCUPANCY) {
        EndpointKind::OccupancySensor
    } else if has_in(cluster::ILLUMINANCE) {
        EndpointKind::IlluminanceSensor
    } else if has_in(cluster::PRESSURE) {
        EndpointKind::PressureSensor
    } else if has_in(cluster::FLOW) {
        EndpointKind::FlowSensor
    } else {
        EndpointKind::Sensor
    }
}

fn commands_for(table: &[(u16, &[&'static str])], clusters: &[u16]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(id, _)| clusters.contains(id))
        .flat_map(|(_, commands)| commands.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimmable_light() {
        let caps = classify(&[cluster::ONOFF, cluster::LEVEL], &[]);

        assert_eq!(caps.kind, EndpointKind::DimmableLight);
        assert!(caps.accepts.contains(&"onoff.toggle"));
        assert!(caps.accepts.contains(&"level.move_to_level"));
        assert_eq!(caps.accepts.len(), 14);
        assert_eq!(caps.reports, vec!["onoff", "level"]);
        assert!(caps.emits.is_empty());
    }

    #[test]
    fn temp_humidity_sensor() {
        let caps = classify(&[cluster::TEMPERATURE, cluster::HUMIDITY], &[]);

        assert_eq!(caps.kind, EndpointKind::TempHumiditySensor);
        assert_eq!(caps.reports, vec!["temperature_c", "humidity_pct"]);
        assert!(caps.accepts.is_empty());
    }

    #[test]
    fn empty_clusters_are_unknown() {
        let caps = classify(&[], &[]);

        assert_eq!(caps.kind, EndpointKind::Unknown);
        assert!(caps.accepts.is_empty());
        assert!(caps.emits.is_empty());
        assert!(caps.reports.is_empty());
    }

    #[test]
    fn color_outranks_everything() {
        let caps = classify(&[cluster::ONOFF, cluster::LEVEL, cluster::COLOR_CONTROL, cluster::TEMPERATURE], &[]);

        assert_eq!(caps.kind, EndpointKind::ColorLight);
        assert_eq!(caps.accepts.len(), 6 + 8 + 10);
    }

    #[test]
    fn actuators_outrank_sensors() {
        assert_eq!(classify(&[cluster::ONOFF, cluster::OCCUPANCY], &[]).kind, EndpointKind::Relay);
    }

    #[test]
    fn remotes_by_out_clusters() {
        let switch = classify(&[cluster::BASIC], &[cluster::ONOFF]);
        let dimmer = classify(&[cluster::BASIC], &[cluster::ONOFF, cluster::LEVEL, cluster::COLOR_CONTROL]);

        assert_eq!(switch.kind, EndpointKind::Switch);
        assert_eq!(switch.emits, vec!["onoff.off", "onoff.on", "onoff.toggle"]);
        assert_eq!(dimmer.kind, EndpointKind::DimmerSwitch);
        assert_eq!(dimmer.emits.len(), 3 + 8 + 1);
        assert_eq!(dimmer.emits.last(), Some(&"color.*"));
    }

    #[test]
    fn sensor_priority() {
        assert_eq!(classify(&[cluster::TEMPERATURE], &[]).kind, EndpointKind::TemperatureSensor);
        assert_eq!(classify(&[cluster::HUMIDITY], &[]).kind, EndpointKind::HumiditySensor);
        assert_eq!(
            classify(&[cluster::ILLUMINANCE, cluster::OCCUPANCY], &[]).kind,
            EndpointKind::OccupancySensor
        );
        assert_eq!(classify(&[cluster::ILLUMINANCE], &[]).kind, EndpointKind::IlluminanceSensor);
        assert_eq!(classify(&[cluster::PRESSURE], &[]).kind, EndpointKind::PressureSensor);
        assert_eq!(classify(&[cluster::FLOW], &[]).kind, EndpointKind::FlowSensor);
    }

    #[test]
    fn groups_scenes_and_battery() {
        let caps = classify(&[cluster::POWER_CONFIG, cluster::GROUPS, cluster::SCENES], &[]);

        assert_eq!(caps.kind, EndpointKind::Unknown);
        assert_eq!(caps.accepts, vec!["groups.add", "groups.remove", "scenes.recall"]);
        assert_eq!(caps.reports, vec!["battery_pct"]);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EndpointKind::TempHumiditySensor).unwrap(),
            "\"temp_humidity_sensor\""
        );
        assert_eq!(EndpointKind::DimmerSwitch.to_string(), "dimmer_switch");
    }
}
