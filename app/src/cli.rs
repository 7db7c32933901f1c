//! Command line of the gateway client.

use clap::{Args, Parser, Subcommand};

use crate::adapter::rest::CommandParams;

#[derive(Parser, Debug)]
#[command(name = "zigbee-gateway-client", about = "Headless client for the Zigbee gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Follows the gateway event stream and logs connection, device and state changes until Ctrl-C.
    Watch,
    /// Prints the decoded device directory.
    Devices,
    /// Prints one device with its endpoints and current state.
    Device { uid: String },
    /// Renames a device.
    Rename { uid: String, name: String },
    /// Removes a device from the network.
    Remove { uid: String },
    /// Opens the network for joining.
    PermitJoin {
        #[arg(long, default_value_t = crate::adapter::rest::DEFAULT_PERMIT_JOIN_SECONDS,
              value_parser = clap::value_parser!(u8).range(1..))]
        seconds: u8,
    },
    /// Sends a command to a device endpoint, e.g. `exec 0x00124b0011223344 1 onoff.toggle`.
    Exec {
        uid: String,
        endpoint: u8,
        command: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Sends a command to a Zigbee group, e.g. `exec-group 0x0003 scene.recall --scene-id 1`.
    ExecGroup {
        #[arg(value_parser = parse_u16)]
        group_id: u16,
        command: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Binds (or with `--unbind` removes the binding of) a source cluster to a destination endpoint.
    Bind {
        src_uid: String,
        src_endpoint: u8,
        #[arg(value_parser = parse_u16)]
        cluster_id: u16,
        dst_uid: String,
        dst_endpoint: u8,
        #[arg(long)]
        unbind: bool,
    },
    /// Lists automations.
    Automations,
    /// Enables or disables an automation.
    AutomationEnable {
        id: String,
        #[arg(long)]
        disable: bool,
    },
    /// Deletes an automation.
    AutomationDelete { id: String },
    /// Lists groups with their members.
    Groups,
    /// Edits groups and group membership.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Prints the gateway settings document.
    Settings,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupAction {
    Create { name: String },
    Rename { id: String, name: String },
    Delete { id: String },
    /// Moves an endpoint into a group, or out of its group when no group is given.
    Assign { uid: String, endpoint: u8, group_id: Option<String> },
    Label { uid: String, endpoint: u8, label: String },
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct ParamArgs {
    #[arg(long)]
    pub level: Option<u8>,
    #[arg(long)]
    pub transition_ms: Option<u32>,
    #[arg(long)]
    pub x: Option<u16>,
    #[arg(long)]
    pub y: Option<u16>,
    #[arg(long)]
    pub mireds: Option<u16>,
    #[arg(long)]
    pub scene_id: Option<u8>,
}

impl From<ParamArgs> for CommandParams {
    fn from(args: ParamArgs) -> Self {
        CommandParams {
            level: args.level,
            transition_ms: args.transition_ms,
            x: args.x,
            y: args.y,
            mireds: args.mireds,
            scene_id: args.scene_id,
        }
    }
}

/// Decimal or `0x` hex.
fn parse_u16(raw: &str) -> Result<u16, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", raw, e))
}
