use anyhow::Context;
use clap::Parser;
use settings::Settings;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::adapter::rest::{Action, Binding, Command, GatewayApi, GroupStore, SyncBackend};
use crate::cli::{Cli, CliCommand, GroupAction};
use crate::core::DeviceUid;
use crate::core::id::validate_endpoint;
use crate::device_state::{StateMap, device_json};
use crate::sync::{SyncEvent, SyncRunner};

mod adapter;
mod cli;
mod core;
mod device_state;
mod directory;
mod documents;
mod error;
mod settings;
mod sync;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new().expect("Error reading configuration");

    settings.monitoring.init().expect("Error initializing monitoring");

    let api = settings.gateway.new_api()?;

    match cli.command {
        CliCommand::Watch => watch(&settings, api).await,
        CliCommand::Devices => print_devices(&api).await,
        CliCommand::Device { uid } => print_device(&api, &parse_uid(&uid)?).await,
        CliCommand::Rename { uid, name } => Ok(api.rename_device(&parse_uid(&uid)?, &name).await?),
        CliCommand::Remove { uid } => Ok(api.remove_device(&parse_uid(&uid)?).await?),
        CliCommand::PermitJoin { seconds } => {
            let result = api.permit_join(seconds).await?;
            println!("permit join ok={} seconds={}", result.ok, result.seconds);
            Ok(())
        }
        CliCommand::Exec {
            uid,
            endpoint,
            command,
            params,
        } => {
            let uid = parse_uid(&uid)?;
            let endpoint = validate_endpoint(u64::from(endpoint))?;
            let command = Command::from_name(&command, params.into())?;
            warn_if_not_accepted(&api, &uid, endpoint, command).await;
            execute(&api, Action::device(uid, endpoint, command)).await
        }
        CliCommand::ExecGroup {
            group_id,
            command,
            params,
        } => {
            let command = Command::from_name(&command, params.into())?;
            execute(&api, Action::group(group_id, command)).await
        }
        CliCommand::Bind {
            src_uid,
            src_endpoint,
            cluster_id,
            dst_uid,
            dst_endpoint,
            unbind,
        } => {
            let binding = Binding {
                src_device_uid: parse_uid(&src_uid)?,
                src_endpoint,
                cluster_id,
                dst_device_uid: parse_uid(&dst_uid)?,
                dst_endpoint,
            };
            let action = if unbind { Action::Unbind(binding) } else { Action::Bind(binding) };
            execute(&api, action).await
        }
        CliCommand::Automations => {
            for automation in api.fetch_automations().await? {
                let state = if automation.enabled { "enabled" } else { "disabled" };
                println!("{:<24} {:<9} {}", automation.id, state, automation.name);
            }
            Ok(())
        }
        CliCommand::AutomationEnable { id, disable } => Ok(api.set_automation_enabled(&id, !disable).await?),
        CliCommand::AutomationDelete { id } => Ok(api.delete_automation(&id).await?),
        CliCommand::Groups => print_groups(GroupStore::new(api)).await,
        CliCommand::Group { action } => edit_group(GroupStore::new(api), action).await,
        CliCommand::Settings => {
            match api.fetch_settings().await? {
                Some(settings) => println!("{}", serde_json::to_string_pretty(&settings.to_json())?),
                None => println!("no settings"),
            }
            Ok(())
        }
    }
}

async fn watch(settings: &Settings, api: GatewayApi) -> anyhow::Result<()> {
    let groups = GroupStore::new(api.clone());
    let connector = settings.gateway.new_stream_connector()?;
    let runner = SyncRunner::new(settings.sync.clone(), connector, SyncBackend::new(api, groups.clone()));

    let client = runner.client();
    let events = runner.subscribe();
    let mut group_updates = groups.subscribe();

    let cancel = CancellationToken::new();
    let runner_handle = tokio::spawn(runner.run(cancel.clone()));

    tracing::info!("Watching gateway {}", settings.gateway.base_url);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
        _ = log_events(events) => {},
        _ = async {
            while group_updates.changed().await.is_ok() {
                let count = group_updates.borrow_and_update().groups.len();
                tracing::info!("Groups reloaded: {}", count);
            }
        } => {},
    }

    cancel.cancel();
    runner_handle.await.context("Sync runner panicked")?;

    let snapshot = client.snapshot();
    tracing::info!(
        "Stopped with {} devices, {} with state, {} recent events",
        snapshot.devices.len(),
        snapshot.states.device_count(),
        snapshot.events.len()
    );

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::Connection(state)) => tracing::info!("Gateway connection {}", state),
            Ok(SyncEvent::DevicesReloaded { count }) => tracing::info!("Directory reloaded: {} devices", count),
            Ok(SyncEvent::StateChanged(update)) => tracing::info!(
                "State {}/{} {} = {:?}",
                update.device_uid,
                update.endpoint,
                update.key,
                update.value
            ),
            Ok(SyncEvent::AutomationsReloaded { count }) => tracing::info!("Automations reloaded: {}", count),
            Ok(SyncEvent::SettingsReloaded) => tracing::info!("Settings reloaded"),
            Ok(SyncEvent::Envelope(envelope)) => match envelope.timestamp() {
                Some(ts) => tracing::debug!("Event at {}: {}", ts.format("%H:%M:%S%.3f"), envelope.to_json()),
                None => tracing::debug!("Event {}", envelope.to_json()),
            },
            Err(RecvError::Lagged(skipped)) => tracing::warn!("Skipped {} sync events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn print_devices(api: &GatewayApi) -> anyhow::Result<()> {
    for device in api.fetch_devices().await? {
        println!(
            "{} 0x{:04x} {}",
            device.device_uid,
            device.short_addr,
            device.display_name()
        );
        for endpoint in &device.endpoints {
            println!(
                "  ep {:>3} {:<22} accepts [{}]",
                endpoint.endpoint,
                endpoint.kind().as_str(),
                endpoint.accepted_commands().join(", ")
            );
        }
    }
    Ok(())
}

async fn print_device(api: &GatewayApi, uid: &DeviceUid) -> anyhow::Result<()> {
    let detail = api.fetch_device(uid).await?;

    let mut states = StateMap::default();
    for update in detail.state_updates() {
        states.merge_snapshot(update);
    }

    let doc = serde_json::json!({
        "device": detail.device,
        "state": states.device(uid).map(device_json).unwrap_or_default(),
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);

    Ok(())
}

async fn execute(api: &GatewayApi, action: Action) -> anyhow::Result<()> {
    let response = api.execute_action(&action).await?;
    if !response.is_null() {
        println!("{}", response.to_json());
    }
    Ok(())
}

// Advisory only; the gateway decides.
async fn warn_if_not_accepted(api: &GatewayApi, uid: &DeviceUid, endpoint: u8, command: Command) {
    let devices = match api.fetch_devices().await {
        Ok(devices) => devices,
        Err(e) => {
            tracing::debug!("Cannot check capabilities of {}: {}", uid, e);
            return;
        }
    };

    let Some(ep) = devices.iter().find(|d| &d.device_uid == uid).and_then(|d| d.endpoint(endpoint)) else {
        tracing::warn!("Endpoint {}/{} not in gateway directory", uid, endpoint);
        return;
    };

    if !ep.accepts(command.name()) {
        tracing::warn!("Endpoint {}/{} ({}) does not list {}", uid, endpoint, ep.kind(), command);
    }
}

async fn print_groups(groups: GroupStore) -> anyhow::Result<()> {
    groups.reload().await?;

    let set = groups.snapshot();
    for group in &set.groups {
        println!("{} {}", group.id, group.name);
        let mut items: Vec<_> = set.items_in_group(&group.id).collect();
        items.sort_by_key(|it| it.order);
        for item in items {
            println!("  {}::{} {}", item.device_uid, item.endpoint_id, item.label);
        }
    }
    Ok(())
}

async fn edit_group(groups: GroupStore, action: GroupAction) -> anyhow::Result<()> {
    match action {
        GroupAction::Create { name } => {
            let id = groups.create(&name).await?;
            println!("created group {}", id);
        }
        GroupAction::Rename { id, name } => groups.rename(&id, &name).await?,
        GroupAction::Delete { id } => groups.delete(&id).await?,
        GroupAction::Assign { uid, endpoint, group_id } => {
            groups
                .set_for_endpoint(&parse_uid(&uid)?, endpoint, group_id.as_deref())
                .await?
        }
        GroupAction::Label { uid, endpoint, label } => groups.set_label(&parse_uid(&uid)?, endpoint, &label).await?,
    }
    Ok(())
}

fn parse_uid(raw: &str) -> anyhow::Result<DeviceUid> {
    Ok(DeviceUid::parse(raw)?)
}
