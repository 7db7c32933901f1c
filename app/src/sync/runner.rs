use std::collections::HashSet;
use std::pin::Pin;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use super::*;

enum ResyncOutcome {
    Directory(Result<(Vec<Device>, Vec<DeviceDetail>), Error>),
    StateSnapshot(Result<Vec<StateUpdate>, Error>),
    Automations(Result<Vec<Automation>, Error>),
    Groups(Result<(), Error>),
    Settings(Result<Option<Value>, Error>),
}

impl ResyncOutcome {
    fn target(&self) -> ResyncTarget {
        match self {
            ResyncOutcome::Directory(_) => ResyncTarget::Directory,
            ResyncOutcome::StateSnapshot(_) => ResyncTarget::StateSnapshot,
            ResyncOutcome::Automations(_) => ResyncTarget::Automations,
            ResyncOutcome::Groups(_) => ResyncTarget::Groups,
            ResyncOutcome::Settings(_) => ResyncTarget::Settings,
        }
    }
}

type Session<S> = (u64, S);

pub struct SyncRunner<C: StreamConnector, G: GatewayRest> {
    config: SyncConfig,
    connector: C,
    rest: G,
    tracker: ConnectionTracker,
    guard: ResyncGuard,
    bring_up: ExponentialBackoff,
    bring_up_retries: u32,
    directory_populated: bool,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    event_tx: broadcast::Sender<SyncEvent>,
    command_tx: mpsc::Sender<SyncCommand>,
    command_rx: mpsc::Receiver<SyncCommand>,
}

impl<C: StreamConnector, G: GatewayRest> SyncRunner<C, G> {
    pub fn new(config: SyncConfig, connector: C, rest: G) -> Self {
        let (snapshot_tx, _) = watch::channel(SyncSnapshot::new(config.event_log_capacity));
        let (event_tx, _) = broadcast::channel(256);
        let (command_tx, command_rx) = mpsc::channel(16);

        Self {
            tracker: ConnectionTracker::new(config.backoff()),
            bring_up: config.backoff(),
            bring_up_retries: 0,
            directory_populated: false,
            guard: ResyncGuard::default(),
            config,
            connector,
            rest,
            snapshot_tx,
            event_tx,
            command_tx,
            command_rx,
        }
    }

    pub fn client(&self) -> SyncClient {
        SyncClient {
            snapshot_rx: self.snapshot_tx.subscribe(),
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut resyncs: FuturesUnordered<BoxFuture<'static, ResyncOutcome>> = FuturesUnordered::new();
        for target in ResyncTarget::ALL {
            self.request_resync(target, &mut resyncs);
        }

        let mut connecting = Some(self.start_connect());
        let mut session: Option<Session<C::Stream>> = None;
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;
        let mut bring_up_retry: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sync runner cancelled, shutting down");
                    break;
                }

                result = poll_connect(&mut connecting) => {
                    connecting = None;
                    match result {
                        Ok(stream) => {
                            let id = self.session_opened(&mut resyncs);
                            session = Some((id, stream));
                        }
                        Err(e) => {
                            tracing::warn!("Error connecting event stream: {}", e);
                            reconnect = Some(self.session_lost(true));
                        }
                    }
                }

                (id, frame) = next_frame(&mut session) => {
                    match frame {
                        Some(Ok(frame)) => self.handle_frame(id, frame, &mut resyncs),
                        Some(Err(e)) => {
                            tracing::warn!("Event stream session {} failed: {}", id, e);
                            session = None;
                            reconnect = Some(self.session_lost(true));
                        }
                        None => {
                            tracing::info!("Event stream session {} closed", id);
                            session = None;
                            reconnect = Some(self.session_lost(false));
                        }
                    }
                }

                () = wait_for(&mut reconnect) => {
                    reconnect = None;
                    connecting = Some(self.start_connect());
                }

                () = wait_for(&mut bring_up_retry) => {
                    bring_up_retry = None;
                    self.request_resync(ResyncTarget::Directory, &mut resyncs);
                }

                Some(outcome) = resyncs.next(), if !resyncs.is_empty() => {
                    let target = outcome.target();
                    if let Some(delay) = self.apply_outcome(outcome) {
                        bring_up_retry = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                    if self.guard.complete(target) {
                        resyncs.push(self.resync_future(target));
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    match command {
                        SyncCommand::Resync(target) => self.request_resync(target, &mut resyncs),
                    }
                }
            }
        }

        drop(session);
        drop(connecting);
        let state = self.tracker.shutdown();
        self.publish_connection(state);
    }

    fn start_connect(&mut self) -> BoxFuture<'static, Result<C::Stream, TransportError>> {
        let state = self.tracker.connecting();
        self.publish_connection(state);

        let connector = self.connector.clone();
        async move { connector.connect().await }.boxed()
    }

    fn session_opened(&mut self, resyncs: &mut FuturesUnordered<BoxFuture<'static, ResyncOutcome>>) -> u64 {
        let id = self.tracker.opened();
        tracing::info!("Event stream session {} connected", id);

        self.snapshot_tx.send_modify(|s| {
            s.connection = ConnectionState::Connected;
            s.session = id;
            if id > 1 {
                s.states.demote_live();
            }
        });
        self.emit(SyncEvent::Connection(ConnectionState::Connected));

        // Updates may have been missed while the previous session was down.
        if id > 1 {
            self.request_resync(ResyncTarget::Directory, resyncs);
            self.request_resync(ResyncTarget::StateSnapshot, resyncs);
        }

        id
    }

    fn session_lost(&mut self, failed: bool) -> Pin<Box<Sleep>> {
        let (states, delay) = self.tracker.lost(failed);
        for state in states {
            self.publish_connection(state);
        }
        tracing::debug!(
            "Reconnecting event stream in {:?} (attempt {})",
            delay,
            self.tracker.attempts()
        );
        Box::pin(tokio::time::sleep(delay))
    }

    fn publish_connection(&self, state: ConnectionState) {
        self.snapshot_tx.send_if_modified(|s| {
            let changed = s.connection != state;
            s.connection = state;
            changed
        });
        self.emit(SyncEvent::Connection(state));
    }

    fn handle_frame(
        &mut self,
        session: u64,
        frame: Frame,
        resyncs: &mut FuturesUnordered<BoxFuture<'static, ResyncOutcome>>,
    ) {
        if session != self.tracker.session() {
            tracing::debug!("Ignoring frame from stale session {}", session);
            return;
        }

        let bytes = match frame {
            Frame::Binary(bytes) => bytes,
            Frame::Text(_) => {
                tracing::debug!("Ignoring non-binary frame");
                return;
            }
        };

        let envelope = match Envelope::decode(&bytes) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("Ignoring undecodable frame: {}", e);
                return;
            }
        };

        let route = envelope.route();

        self.snapshot_tx.send_modify(|s| s.events.push(envelope.clone()));
        self.emit(SyncEvent::Envelope(envelope));

        match route {
            Route::State(update) => self.apply_live(update),
            Route::Changed(notice) => {
                let targets: &[ResyncTarget] = match notice {
                    ChangeNotice::Devices => &[ResyncTarget::Directory, ResyncTarget::StateSnapshot],
                    ChangeNotice::Automations => &[ResyncTarget::Automations],
                    ChangeNotice::Groups => &[ResyncTarget::Groups],
                    ChangeNotice::Settings => &[ResyncTarget::Settings],
                };
                for target in targets {
                    self.request_resync(*target, resyncs);
                }
            }
            Route::Ignore => {}
        }
    }

    fn apply_live(&self, update: StateUpdate) {
        let mut changed = false;
        self.snapshot_tx.send_if_modified(|s| {
            changed = s.states.apply_live(update.clone());
            changed
        });
        if changed {
            self.emit(SyncEvent::StateChanged(update));
        }
    }

    fn merge_snapshot(&self, updates: Vec<StateUpdate>) {
        let mut changed = vec![];
        self.snapshot_tx.send_if_modified(|s| {
            for update in updates {
                if s.states.merge_snapshot(update.clone()) {
                    changed.push(update);
                }
            }
            !changed.is_empty()
        });
        for update in changed {
            self.emit(SyncEvent::StateChanged(update));
        }
    }

    fn request_resync(&mut self, target: ResyncTarget, resyncs: &mut FuturesUnordered<BoxFuture<'static, ResyncOutcome>>) {
        if self.guard.request(target) {
            resyncs.push(self.resync_future(target));
        } else {
            tracing::debug!("Resync of {:?} already in flight, scheduling rerun", target);
        }
    }

    fn resync_future(&self, target: ResyncTarget) -> BoxFuture<'static, ResyncOutcome> {
        let rest = self.rest.clone();
        let per_device_detail = self.config.per_device_detail;

        match target {
            ResyncTarget::Directory => {
                async move { ResyncOutcome::Directory(load_directory(rest, per_device_detail).await) }.boxed()
            }
            ResyncTarget::StateSnapshot => {
                async move { ResyncOutcome::StateSnapshot(rest.fetch_state_snapshot().await) }.boxed()
            }
            ResyncTarget::Automations => {
                async move { ResyncOutcome::Automations(rest.fetch_automations().await) }.boxed()
            }
            ResyncTarget::Groups => async move { ResyncOutcome::Groups(rest.reload_groups().await) }.boxed(),
            ResyncTarget::Settings => async move { ResyncOutcome::Settings(rest.fetch_settings().await) }.boxed(),
        }
    }

    /// Applies a finished resync. Returns a delay when the directory should be fetched again.
    fn apply_outcome(&mut self, outcome: ResyncOutcome) -> Option<Duration> {
        match outcome {
            ResyncOutcome::Directory(Ok((devices, details))) => {
                if devices.is_empty() && !self.directory_populated {
                    tracing::debug!("Gateway directory still empty");
                    return self.schedule_bring_up_retry();
                }
                self.apply_directory(devices, details);
                None
            }
            ResyncOutcome::Directory(Err(e)) => {
                tracing::error!("Error loading device directory: {}", e);
                self.schedule_bring_up_retry()
            }
            ResyncOutcome::StateSnapshot(Ok(updates)) => {
                tracing::debug!("Merging state snapshot with {} items", updates.len());
                self.merge_snapshot(updates);
                None
            }
            ResyncOutcome::StateSnapshot(Err(e)) => {
                tracing::error!("Error loading state snapshot: {}", e);
                None
            }
            ResyncOutcome::Automations(Ok(automations)) => {
                let count = automations.len();
                self.snapshot_tx.send_modify(|s| s.automations = automations);
                self.emit(SyncEvent::AutomationsReloaded { count });
                None
            }
            ResyncOutcome::Automations(Err(e)) => {
                tracing::error!("Error loading automations: {}", e);
                None
            }
            ResyncOutcome::Groups(Ok(())) => None,
            ResyncOutcome::Groups(Err(e)) => {
                tracing::error!("Error reloading groups: {}", e);
                None
            }
            ResyncOutcome::Settings(Ok(settings)) => {
                self.snapshot_tx.send_modify(|s| s.settings = settings);
                self.emit(SyncEvent::SettingsReloaded);
                None
            }
            ResyncOutcome::Settings(Err(e)) => {
                tracing::error!("Error loading settings: {}", e);
                None
            }
        }
    }

    fn schedule_bring_up_retry(&mut self) -> Option<Duration> {
        if self.bring_up_retries >= self.config.bring_up_max_attempts {
            tracing::debug!("Giving up on directory retries after {} attempts", self.bring_up_retries);
            return None;
        }
        self.bring_up_retries += 1;
        self.bring_up.bump();
        Some(self.bring_up.next_delay())
    }

    fn apply_directory(&mut self, devices: Vec<Device>, details: Vec<DeviceDetail>) {
        self.directory_populated = self.directory_populated || !devices.is_empty();
        self.bring_up_retries = 0;
        self.bring_up.reset();

        let count = devices.len();
        let removed: Vec<DeviceUid> = {
            let kept: HashSet<&DeviceUid> = devices.iter().map(|d| &d.device_uid).collect();
            self.snapshot_tx
                .borrow()
                .devices
                .iter()
                .filter(|d| !kept.contains(&d.device_uid))
                .map(|d| d.device_uid.clone())
                .collect()
        };

        self.snapshot_tx.send_modify(|s| {
            for uid in &removed {
                tracing::info!("Device {} removed, dropping its state", uid);
                s.states.remove_device(uid);
            }
            s.devices = devices;
        });

        self.merge_snapshot(details.iter().flat_map(DeviceDetail::state_updates).collect());

        tracing::info!("Device directory loaded with {} devices", count);
        self.emit(SyncEvent::DevicesReloaded { count });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

#[tracing::instrument(skip(rest))]
async fn load_directory<G: GatewayRest>(rest: G, per_device_detail: bool) -> Result<(Vec<Device>, Vec<DeviceDetail>), Error> {
    let devices = rest.fetch_directory().await?;

    let mut details = vec![];
    if per_device_detail {
        for device in &devices {
            match rest.fetch_device_detail(&device.device_uid).await {
                Ok(detail) => details.push(detail),
                Err(e) => tracing::warn!("Error loading detail of device {}: {}", device.device_uid, e),
            }
        }
    }

    Ok((devices, details))
}

async fn poll_connect<S>(connecting: &mut Option<BoxFuture<'static, Result<S, TransportError>>>) -> Result<S, TransportError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame<S>(session: &mut Option<Session<S>>) -> (u64, Option<S::Item>)
where
    S: Stream + Unpin,
{
    match session {
        Some((id, stream)) => (*id, stream.next().await),
        None => std::future::pending().await,
    }
}

async fn wait_for(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use futures::channel::mpsc as frames;
    use tokio::time::Instant;

    use super::*;
    use crate::core::cbor::encode;
    use crate::device_state::{Origin, StateValue};
    use crate::directory::{Endpoint, SensorReading, cluster};
    use crate::error::BlobError;

    type FrameTx = frames::UnboundedSender<Result<Frame, TransportError>>;
    type FrameRx = frames::UnboundedReceiver<Result<Frame, TransportError>>;

    #[derive(Clone, Default)]
    struct FakeConnector {
        inner: Arc<Mutex<ConnectorState>>,
    }

    #[derive(Default)]
    struct ConnectorState {
        script: VecDeque<Result<FrameRx, TransportError>>,
        attempts: Vec<Instant>,
    }

    impl FakeConnector {
        fn session(&self) -> FrameTx {
            let (tx, rx) = frames::unbounded();
            self.inner.lock().unwrap().script.push_back(Ok(rx));
            tx
        }

        fn refuse(&self) {
            self.inner
                .lock()
                .unwrap()
                .script
                .push_back(Err(TransportError::Stream("connection refused".to_owned())));
        }

        fn attempts(&self) -> Vec<Instant> {
            self.inner.lock().unwrap().attempts.clone()
        }
    }

    impl StreamConnector for FakeConnector {
        type Stream = FrameRx;

        // Unscripted attempts never complete.
        async fn connect(&self) -> Result<FrameRx, TransportError> {
            let next = {
                let mut state = self.inner.lock().unwrap();
                state.attempts.push(Instant::now());
                state.script.pop_front()
            };
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakeRest {
        inner: Arc<Mutex<RestState>>,
    }

    #[derive(Default)]
    struct RestState {
        directories: VecDeque<Result<Vec<Device>, Error>>,
        directory: Vec<Device>,
        snapshots: VecDeque<Vec<StateUpdate>>,
        details: HashMap<DeviceUid, DeviceDetail>,
        calls: HashMap<&'static str, usize>,
    }

    impl FakeRest {
        fn with_directory(devices: Vec<Device>) -> Self {
            let rest = FakeRest::default();
            rest.set_directory(devices);
            rest
        }

        fn set_directory(&self, devices: Vec<Device>) {
            self.inner.lock().unwrap().directory = devices;
        }

        fn queue_directory(&self, result: Result<Vec<Device>, Error>) {
            self.inner.lock().unwrap().directories.push_back(result);
        }

        fn queue_snapshot(&self, updates: Vec<StateUpdate>) {
            self.inner.lock().unwrap().snapshots.push_back(updates);
        }

        fn calls(&self, name: &str) -> usize {
            self.inner.lock().unwrap().calls.get(name).copied().unwrap_or(0)
        }

        fn count(&self, name: &'static str) {
            *self.inner.lock().unwrap().calls.entry(name).or_default() += 1;
        }
    }

    impl GatewayRest for FakeRest {
        async fn fetch_directory(&self) -> Result<Vec<Device>, Error> {
            self.count("directory");
            let mut state = self.inner.lock().unwrap();
            match state.directories.pop_front() {
                Some(result) => result,
                None => Ok(state.directory.clone()),
            }
        }

        async fn fetch_state_snapshot(&self) -> Result<Vec<StateUpdate>, Error> {
            self.count("state");
            Ok(self.inner.lock().unwrap().snapshots.pop_front().unwrap_or_default())
        }

        async fn fetch_device_detail(&self, uid: &DeviceUid) -> Result<DeviceDetail, Error> {
            self.count("detail");
            self.inner.lock().unwrap().details.get(uid).cloned().ok_or_else(|| {
                TransportError::Status {
                    method: "GET".to_owned(),
                    path: format!("/api/devices/{}", uid),
                    status: 404,
                    details: String::new(),
                }
                .into()
            })
        }

        async fn fetch_automations(&self) -> Result<Vec<Automation>, Error> {
            self.count("automations");
            Ok(vec![])
        }

        async fn fetch_settings(&self) -> Result<Option<Value>, Error> {
            self.count("settings");
            Ok(Some(Value::map([("theme", Value::from("dark"))])))
        }

        async fn reload_groups(&self) -> Result<(), Error> {
            self.count("groups");
            Ok(())
        }
    }

    fn uid(s: &str) -> DeviceUid {
        DeviceUid::normalized(s)
    }

    fn lamp(device_uid: &str) -> Device {
        Device {
            device_uid: uid(device_uid),
            short_addr: 1,
            last_seen_ms: 0,
            name: "Lamp".to_owned(),
            has_onoff: true,
            has_button: false,
            endpoints: vec![Endpoint::new(1, 0x0104, 0x0101, vec![cluster::ONOFF, cluster::LEVEL], vec![])],
        }
    }

    fn envelope(kind: &str, ts_ms: u64, data: Value) -> Result<Frame, TransportError> {
        Ok(Frame::Binary(encode(&Value::map([
            ("ts_ms", Value::from(ts_ms)),
            ("type", Value::from(kind)),
            ("data", data),
        ]))))
    }

    fn state_frame(device_uid: &str, endpoint: u8, key: &str, value: Value) -> Result<Frame, TransportError> {
        envelope(
            "device.state",
            0,
            Value::map([
                ("device_id", Value::from(device_uid)),
                ("endpoint_id", Value::from(endpoint)),
                ("key", Value::from(key)),
                ("value", value),
            ]),
        )
    }

    fn gateway_event(event_type: &str) -> Result<Frame, TransportError> {
        envelope("gateway.event", 0, Value::map([("event_type", Value::from(event_type))]))
    }

    fn start(config: SyncConfig, connector: &FakeConnector, rest: &FakeRest) -> (SyncClient, CancellationToken, tokio::task::JoinHandle<()>) {
        let runner = SyncRunner::new(config, connector.clone(), rest.clone());
        let client = runner.client();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));
        (client, cancel, handle)
    }

    async fn wait_until(client: &SyncClient, condition: impl Fn(&SyncSnapshot) -> bool) {
        let mut rx = client.watch();
        tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|s| condition(s)))
            .await
            .expect("condition not reached in time")
            .expect("sync runner stopped");
    }

    fn connected(s: &SyncSnapshot) -> bool {
        s.connection == ConnectionState::Connected
    }

    #[tokio::test(start_paused = true)]
    async fn live_updates_keep_sibling_keys() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, connected).await;

        frames.unbounded_send(state_frame("0xA", 3, "level", Value::from(120u8))).unwrap();
        frames.unbounded_send(state_frame("0xa", 3, "onoff", Value::from(true))).unwrap();

        wait_until(&client, |s| s.states.get(&uid("0xa"), 3, "onoff").is_some()).await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.states.get(&uid("0xa"), 3, "level"), Some(&StateValue::Int(120)));
        assert_eq!(snapshot.states.get(&uid("0xa"), 3, "onoff"), Some(&StateValue::Bool(true)));
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_follow_backoff() {
        let connector = FakeConnector::default();
        connector.refuse();
        connector.refuse();
        connector.refuse();
        let _frames = connector.session();
        let rest = FakeRest::default();
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);

        wait_until(&client, connected).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<u128> = attempts.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        for (gap, expected) in gaps.iter().zip([500u128, 1000, 2000]) {
            assert!(*gap >= expected && *gap < expected + 10, "gap {} expected {}", gap, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_passes_through_error() {
        let connector = FakeConnector::default();
        connector.refuse();
        let rest = FakeRest::default();
        let runner = SyncRunner::new(SyncConfig::default(), connector.clone(), rest.clone());
        let mut events = runner.subscribe();
        let cancel = CancellationToken::new();
        tokio::spawn(runner.run(cancel.clone()));

        let mut states = vec![];
        while states.len() < 4 {
            if let SyncEvent::Connection(state) = events.recv().await.unwrap() {
                states.push(state);
            }
        }

        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Error,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_directory_is_retried_during_bring_up() {
        let connector = FakeConnector::default();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        rest.queue_directory(Ok(vec![]));
        rest.queue_directory(Err(BlobError::BadMagic { found: 0 }.into()));
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);

        wait_until(&client, |s| s.devices.len() == 1).await;

        assert_eq!(rest.calls("directory"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bring_up_retries_are_bounded() {
        let connector = FakeConnector::default();
        let rest = FakeRest::default();
        let config = SyncConfig {
            bring_up_max_attempts: 3,
            ..SyncConfig::default()
        };
        let (client, _cancel, _) = start(config, &connector, &rest);

        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(rest.calls("directory"), 4);
        assert!(client.snapshot().devices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn device_changed_reloads_directory_and_state() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, |s| connected(s) && s.devices.len() == 1).await;
        assert_eq!(rest.calls("state"), 1);

        rest.set_directory(vec![lamp("0xa"), lamp("0xb")]);
        rest.queue_snapshot(vec![StateUpdate {
            device_uid: uid("0xb"),
            endpoint: 1,
            key: "onoff".to_owned(),
            value: StateValue::Bool(false),
        }]);
        frames.unbounded_send(gateway_event("device.changed")).unwrap();

        wait_until(&client, |s| s.devices.len() == 2 && s.states.get(&uid("0xb"), 1, "onoff").is_some()).await;
        assert_eq!(rest.calls("directory"), 2);
        assert_eq!(rest.calls("state"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn change_notices_reload_their_resource() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, |s| connected(s) && s.settings.is_some()).await;

        frames.unbounded_send(gateway_event("automation.changed")).unwrap();
        frames.unbounded_send(gateway_event("group.changed")).unwrap();
        frames.unbounded_send(gateway_event("settings.changed")).unwrap();
        wait_until(&client, |s| s.events.len() == 3).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rest.calls("automations"), 2);
        assert_eq!(rest.calls("groups"), 2);
        assert_eq!(rest.calls("settings"), 2);
        assert_eq!(rest.calls("directory"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_devices_lose_their_state() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa"), lamp("0xb")]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, |s| connected(s) && s.devices.len() == 2).await;
        frames.unbounded_send(state_frame("0xa", 1, "onoff", Value::from(true))).unwrap();
        frames.unbounded_send(state_frame("0xb", 1, "onoff", Value::from(true))).unwrap();
        wait_until(&client, |s| s.states.device_count() == 2).await;

        rest.set_directory(vec![lamp("0xa")]);
        frames.unbounded_send(gateway_event("device.changed")).unwrap();

        wait_until(&client, |s| s.devices.len() == 1).await;
        let snapshot = client.snapshot();
        assert!(snapshot.states.device(&uid("0xb")).is_none());
        assert_eq!(snapshot.states.get(&uid("0xa"), 1, "onoff"), Some(&StateValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_does_not_regress_live_values() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, |s| connected(s) && s.devices.len() == 1).await;

        frames.unbounded_send(state_frame("0xa", 1, "onoff", Value::from(true))).unwrap();
        wait_until(&client, |s| s.states.get(&uid("0xa"), 1, "onoff").is_some()).await;

        rest.queue_snapshot(vec![
            StateUpdate {
                device_uid: uid("0xa"),
                endpoint: 1,
                key: "onoff".to_owned(),
                value: StateValue::Bool(false),
            },
            StateUpdate {
                device_uid: uid("0xa"),
                endpoint: 1,
                key: "level".to_owned(),
                value: StateValue::Int(40),
            },
        ]);
        client.request_resync(ResyncTarget::StateSnapshot).await.unwrap();

        wait_until(&client, |s| s.states.get(&uid("0xa"), 1, "level").is_some()).await;
        assert_eq!(
            client.snapshot().states.get(&uid("0xa"), 1, "onoff"),
            Some(&StateValue::Bool(true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resyncs_and_refreshes_previous_session_values() {
        let connector = FakeConnector::default();
        let first = connector.session();
        let second = connector.session();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        rest.queue_snapshot(vec![]);
        rest.queue_snapshot(vec![StateUpdate {
            device_uid: uid("0xa"),
            endpoint: 1,
            key: "onoff".to_owned(),
            value: StateValue::Bool(false),
        }]);
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, |s| connected(s) && s.devices.len() == 1).await;

        first.unbounded_send(state_frame("0xa", 1, "onoff", Value::from(true))).unwrap();
        wait_until(&client, |s| s.states.get(&uid("0xa"), 1, "onoff").is_some()).await;
        drop(first);

        wait_until(&client, |s| {
            s.session == 2 && s.states.get(&uid("0xa"), 1, "onoff") == Some(&StateValue::Bool(false))
        })
        .await;
        assert_eq!(rest.calls("directory"), 2);
        assert_eq!(rest.calls("state"), 2);

        second.unbounded_send(state_frame("0xa", 1, "onoff", Value::from(true))).unwrap();
        wait_until(&client, |s| s.states.get(&uid("0xa"), 1, "onoff") == Some(&StateValue::Bool(true))).await;
        assert_eq!(
            client.snapshot().states.entry(&uid("0xa"), 1, "onoff").map(|e| e.origin),
            Some(Origin::Live)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_frames_are_skipped() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::default();
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, connected).await;

        frames.unbounded_send(Ok(Frame::Text("{\"type\":\"x\"}".to_owned()))).unwrap();
        frames.unbounded_send(Ok(Frame::Binary(vec![0xff]))).unwrap();
        frames
            .unbounded_send(Ok(Frame::Binary(encode(&Value::map([("ts_ms", Value::from(1u8))])))))
            .unwrap();
        frames.unbounded_send(gateway_event("zigbee.joined")).unwrap();

        wait_until(&client, |s| s.events.len() == 1).await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.events.latest().map(|e| e.kind.as_str()), Some("gateway.event"));
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_log_keeps_the_last_thirty() {
        let connector = FakeConnector::default();
        let frames = connector.session();
        let rest = FakeRest::default();
        let (client, _cancel, _) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, connected).await;

        for ts in 0..35u64 {
            frames.unbounded_send(envelope("custom", ts, Value::Null)).unwrap();
        }

        wait_until(&client, |s| s.events.latest().map(|e| e.ts_ms) == Some(34)).await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.events.len(), 30);
        assert_eq!(snapshot.events.iter().next().map(|e| e.ts_ms), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn per_device_detail_merges_sensor_readings() {
        let connector = FakeConnector::default();
        let rest = FakeRest::with_directory(vec![lamp("0xa")]);
        rest.inner.lock().unwrap().details.insert(
            uid("0xa"),
            DeviceDetail {
                device: lamp("0xa"),
                sensors: vec![SensorReading {
                    endpoint: 2,
                    cluster_id: cluster::TEMPERATURE,
                    attr_id: 0,
                    value: 2150,
                    ts_ms: 0,
                }],
                state: vec![("lqi".to_owned(), StateValue::Int(200))],
            },
        );
        let config = SyncConfig {
            per_device_detail: true,
            ..SyncConfig::default()
        };
        let (client, _cancel, _) = start(config, &connector, &rest);

        wait_until(&client, |s| s.states.get(&uid("0xa"), 2, "temperature_c").is_some()).await;

        let snapshot = client.snapshot();
        assert_eq!(
            snapshot.states.get(&uid("0xa"), 2, "temperature_c"),
            Some(&StateValue::Float(21.5))
        );
        assert_eq!(snapshot.states.get(&uid("0xa"), 0, "lqi"), Some(&StateValue::Int(200)));
        assert_eq!(rest.calls("detail"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disconnects() {
        let connector = FakeConnector::default();
        let _frames = connector.session();
        let rest = FakeRest::default();
        let (client, cancel, handle) = start(SyncConfig::default(), &connector, &rest);
        wait_until(&client, connected).await;

        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(client.snapshot().connection, ConnectionState::Disconnected);
    }
}
