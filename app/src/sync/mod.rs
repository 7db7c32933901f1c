//! Keeps a live picture of the gateway: device directory, per-endpoint state, automations,
//! groups and settings.
//!
//! [`SyncRunner`] owns a single stream session at a time and a set of in-flight REST resyncs,
//! all driven from one `select!` loop. Consumers read immutable [`SyncSnapshot`]s through a
//! [`SyncClient`] or follow [`SyncEvent`]s.

mod connection;
mod envelope;
mod event_log;
mod resync;
mod runner;

pub use connection::{ConnectionState, ConnectionTracker};
pub use envelope::{ChangeNotice, Envelope, Route};
pub use event_log::EventLog;
pub use resync::{ResyncGuard, ResyncTarget};
pub use runner::SyncRunner;

use std::future::Future;
use std::time::Duration;

use futures::Stream;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::core::cbor::Value;
use crate::core::{DeviceUid, ExponentialBackoff};
use crate::device_state::{StateMap, StateUpdate};
use crate::directory::{Device, DeviceDetail};
use crate::documents::Automation;
use crate::error::{Error, TransportError};

/// One inbound stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

/// Opens stream sessions. Each returned stream is one session; it ends when the session closes.
pub trait StreamConnector: Clone + Send + Sync + 'static {
    type Stream: Stream<Item = Result<Frame, TransportError>> + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

/// Request/response side of the gateway as the sync engine needs it.
pub trait GatewayRest: Clone + Send + Sync + 'static {
    fn fetch_directory(&self) -> impl Future<Output = Result<Vec<Device>, Error>> + Send;
    fn fetch_state_snapshot(&self) -> impl Future<Output = Result<Vec<StateUpdate>, Error>> + Send;
    fn fetch_device_detail(&self, uid: &DeviceUid) -> impl Future<Output = Result<DeviceDetail, Error>> + Send;
    fn fetch_automations(&self) -> impl Future<Output = Result<Vec<Automation>, Error>> + Send;
    fn fetch_settings(&self) -> impl Future<Output = Result<Option<Value>, Error>> + Send;
    /// Groups are owned by the group store; the engine only asks it to reload.
    fn reload_groups(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_exponent: u32,
    pub bring_up_max_attempts: u32,
    pub event_log_capacity: usize,
    pub per_device_detail: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 250,
            reconnect_max_ms: 5000,
            reconnect_max_exponent: 5,
            bring_up_max_attempts: 20,
            event_log_capacity: event_log::DEFAULT_CAPACITY,
            per_device_detail: false,
        }
    }
}

impl SyncConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            self.reconnect_max_exponent,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub connection: ConnectionState,
    pub session: u64,
    pub devices: Vec<Device>,
    pub states: StateMap,
    pub automations: Vec<Automation>,
    pub settings: Option<Value>,
    pub events: EventLog,
}

impl SyncSnapshot {
    fn new(event_log_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session: 0,
            devices: vec![],
            states: StateMap::default(),
            automations: vec![],
            settings: None,
            events: EventLog::new(event_log_capacity),
        }
    }

    pub fn device(&self, uid: &DeviceUid) -> Option<&Device> {
        self.devices.iter().find(|d| &d.device_uid == uid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connection(ConnectionState),
    DevicesReloaded { count: usize },
    StateChanged(StateUpdate),
    AutomationsReloaded { count: usize },
    SettingsReloaded,
    Envelope(Envelope),
}

#[derive(Debug)]
enum SyncCommand {
    Resync(ResyncTarget),
}

#[derive(Clone)]
pub struct SyncClient {
    snapshot_rx: watch::Receiver<SyncSnapshot>,
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncClient {
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_rx.clone()
    }

    pub async fn request_resync(&self, target: ResyncTarget) -> anyhow::Result<()> {
        self.command_tx
            .send(SyncCommand::Resync(target))
            .await
            .map_err(|e| anyhow::anyhow!("Sync runner stopped: {}", e))
    }
}
