// MIT License - Copyright (c) 2026 rnet contributors

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientState};
use crate::config::BusConfig;
use crate::devices::{Controller, Device, LocalDevice, RemoteDevice};
use crate::error::{Result, RnetError};
use crate::event::{
    BusEvent, BusObject, ClientEvent, ClientEventReceiver, CollectionChange, EventReceiver,
    EventSender, client_mailbox, event_channel,
};
use crate::id::{RnetControllerId, RnetDeviceId};
use crate::message::{MessageBody, RequestData, RequestType, RnetMessage};
use crate::path::RnetPath;
use crate::profile::{Profile, ProfileProvider, ProfileTarget};
use crate::transport::{self, Connection, ConnectionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Stopped,
    Starting,
    Started,
    Stopping,
    /// Started, but the connection is currently down
    Reconnecting,
    /// A start attempt failed half way
    Invalid,
}

struct Running {
    client: Arc<Client>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

/// State shared between the bus handle and its background tasks.
struct BusInner {
    config: BusConfig,
    injected: Option<Arc<dyn Connection>>,
    events: EventSender,
    state_tx: watch::Sender<BusState>,
    controllers: RwLock<BTreeMap<RnetControllerId, Arc<Controller>>>,
    local: RwLock<Option<Arc<LocalDevice>>>,
    client: RwLock<Option<Arc<Client>>>,
    providers: RwLock<Vec<Arc<dyn ProfileProvider>>>,
}

/// The bus and everything discovered on it.
///
/// # Example
///
/// ```no_run
/// use rnet::{Bus, BusConfig, RnetDeviceId, RnetPath};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = BusConfig::builder()
///         .uri("rnet.tcp://192.168.1.50:9999".parse()?)
///         .build();
///
///     let bus = Bus::new(config);
///     let mut events = bus.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     bus.start().await?;
///
///     let device = bus.get_or_create_device("00.00.7F".parse::<RnetDeviceId>()?)?;
///     let value = device.handle(RnetPath::new(&[2, 0])?).read().await?;
///     println!("{value:?}");
///
///     bus.stop().await?;
///     Ok(())
/// }
/// ```
pub struct Bus {
    inner: Arc<BusInner>,
    lifecycle: Mutex<Option<Running>>,
}

impl Bus {
    /// Create a stopped bus connecting to `config.uri` when started.
    pub fn new(config: BusConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a stopped bus that uses `connection` instead of `config.uri`.
    pub fn with_connection(config: BusConfig, connection: Arc<dyn Connection>) -> Self {
        Self::build(config, Some(connection))
    }

    fn build(config: BusConfig, injected: Option<Arc<dyn Connection>>) -> Self {
        let (events, _) = event_channel(config.event_capacity);
        let (state_tx, _) = watch::channel(BusState::Stopped);
        Self {
            inner: Arc::new(BusInner {
                config,
                injected,
                events,
                state_tx,
                controllers: RwLock::new(BTreeMap::new()),
                local: RwLock::new(None),
                client: RwLock::new(None),
                providers: RwLock::new(Vec::new()),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Subscribe to bus events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> BusState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BusState> {
        self.inner.state_tx.subscribe()
    }

    /// Connect and start routing.
    ///
    /// Builds the connection and client, creates the controller, zone and
    /// device of this process, then probes the configured controllers in the
    /// background.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(RnetError::invalid_state("bus is already started"));
        }

        let inner = &self.inner;
        inner.set_state(BusState::Starting);
        inner.clear();

        let connection = match &inner.injected {
            Some(connection) => connection.clone(),
            None => transport::connect(&inner.config.uri),
        };
        info!("Starting bus on {}", connection.describe());

        let (mailbox_tx, mailbox_rx) = client_mailbox();
        let client = Arc::new(Client::new(
            connection.clone(),
            inner.config.reconnect_delay,
            mailbox_tx,
        ));

        let local = Arc::new(LocalDevice::new(
            inner.config.local_device_id,
            inner.config.activity_timeout,
            inner.events.clone(),
        ));
        inner
            .get_or_create_controller(local.id().controller)
            .get_or_create_zone(local.id().zone)
            .get_or_insert_device(local.id().keypad, || Device::Local(local.clone()));
        *inner.local.write().unwrap_or_else(PoisonError::into_inner) = Some(local);

        if let Err(e) = client.start().await {
            warn!("Client failed to start: {}", e);
            inner.set_state(BusState::Invalid);
            return Err(e);
        }
        *inner.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());

        let connection_state = connection.subscribe_state();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            inner.clone(),
            client.clone(),
            mailbox_rx,
            connection_state,
            cancel.clone(),
        ));
        let sweeper = inner
            .config
            .eviction_age
            .map(|age| tokio::spawn(run_sweeper(inner.clone(), age, cancel.clone())));

        *lifecycle = Some(Running {
            client: client.clone(),
            cancel,
            pump,
            sweeper,
        });

        inner.set_state(BusState::Started);
        inner.activate(&client, inner.config.local_device_id);
        drop(lifecycle);

        let scanner = inner.clone();
        tokio::spawn(async move {
            if let Err(e) = scanner.scan(&client).await {
                debug!("Scan ended early: {}", e);
            }
        });

        info!("Bus started");
        Ok(())
    }

    /// Stop routing and close the connection. The discovered tree is kept
    /// until the next start.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(self.state(), BusState::Started | BusState::Reconnecting) {
            return Err(RnetError::invalid_state(format!(
                "bus cannot stop while {:?}",
                self.state()
            )));
        }
        let Some(running) = lifecycle.take() else {
            return Err(RnetError::invalid_state("bus is not started"));
        };

        self.inner.set_state(BusState::Stopping);
        let stopped = running.client.stop().await;
        running.cancel.cancel();
        if let Err(e) = running.pump.await {
            warn!("Bus pump ended abnormally: {}", e);
        }
        if let Some(sweeper) = running.sweeper {
            sweeper.abort();
        }
        *self.inner.client.write().unwrap_or_else(PoisonError::into_inner) = None;

        self.inner.set_state(BusState::Stopped);
        info!("Bus stopped");
        stopped
    }

    /// Probe every configured controller.
    ///
    /// Each controller device is asked for the probe path. Whatever answers
    /// shows up in the tree through normal routing.
    pub async fn scan(&self) -> Result<()> {
        let client = self.running_client()?;
        self.inner.scan(&client).await
    }

    /// Whether the bus is started and the link is up.
    pub fn is_available(&self) -> bool {
        let Some(client) = self.current_client() else {
            return false;
        };
        self.state() == BusState::Started
            && client.state() == ClientState::Started
            && client.connection().state() == ConnectionState::Open
    }

    /// Snapshot of the known controllers, ordered by id.
    pub fn controllers(&self) -> Vec<Arc<Controller>> {
        self.inner
            .controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn controller(&self, id: RnetControllerId) -> Option<Arc<Controller>> {
        self.inner.controller(id)
    }

    /// The device of this process, while started.
    pub fn local_device(&self) -> Option<Arc<LocalDevice>> {
        self.inner
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn device(&self, id: RnetDeviceId) -> Option<Device> {
        self.inner
            .controller(id.controller)?
            .zone(id.zone)?
            .device(id.keypad)
    }

    /// Look up a device, creating it when unknown.
    ///
    /// Created devices are not active until they are heard from.
    pub fn get_or_create_device(&self, id: RnetDeviceId) -> Result<Device> {
        if id.is_reserved() {
            return Err(RnetError::ReservedDeviceId { id: id.to_string() });
        }
        let client = self.running_client()?;
        Ok(self.inner.get_or_create_device(&client, id))
    }

    /// Remove remote devices, then empty zones and controllers, that have not
    /// been heard from for `max_idle`. Returns how many objects were removed.
    pub fn evict_inactive(&self, max_idle: Duration) -> usize {
        self.inner.evict_inactive(max_idle)
    }

    pub fn add_profile_provider(&self, provider: Arc<dyn ProfileProvider>) {
        self.inner
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
    }

    /// Profiles offered for `target` by every registered provider.
    pub fn get_profiles(&self, target: &ProfileTarget) -> Vec<Profile> {
        let providers = self
            .inner
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        providers
            .iter()
            .flat_map(|p| p.get_profiles(target))
            .collect()
    }

    fn current_client(&self) -> Option<Arc<Client>> {
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn running_client(&self) -> Result<Arc<Client>> {
        self.current_client()
            .ok_or_else(|| RnetError::invalid_state("bus is not started"))
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.cancel.cancel();
            running.client.abort();
            running.pump.abort();
            if let Some(sweeper) = running.sweeper {
                sweeper.abort();
            }
        }
    }
}

impl BusInner {
    fn set_state(&self, state: BusState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            info!("Bus state {:?} -> {:?}", old, state);
            let _ = self.events.send(BusEvent::StateChanged { old, new: state });
        }
    }

    /// Flip between `Started` and `Reconnecting` to follow the connection.
    /// Transitional connection states leave the bus state alone.
    fn refresh_state(&self, connection: ConnectionState) {
        let mut change = None;
        self.state_tx.send_if_modified(|state| {
            if !matches!(*state, BusState::Started | BusState::Reconnecting) {
                return false;
            }
            let next = match connection {
                ConnectionState::Open => BusState::Started,
                ConnectionState::Closed => BusState::Reconnecting,
                ConnectionState::Opening | ConnectionState::Closing => return false,
            };
            if next == *state {
                return false;
            }
            change = Some((*state, next));
            *state = next;
            true
        });
        if let Some((old, new)) = change {
            info!("Bus state {:?} -> {:?}", old, new);
            let _ = self.events.send(BusEvent::StateChanged { old, new });
        }
    }

    fn clear(&self) {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.local.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn controller(&self, id: RnetControllerId) -> Option<Arc<Controller>> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn get_or_create_controller(&self, id: RnetControllerId) -> Arc<Controller> {
        if let Some(controller) = self.controller(id) {
            return controller;
        }
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| Arc::new(Controller::new(id, self.config.activity_timeout)))
            .clone()
    }

    fn get_or_create_device(&self, client: &Arc<Client>, id: RnetDeviceId) -> Device {
        self.get_or_create_controller(id.controller)
            .get_or_create_zone(id.zone)
            .get_or_insert_device(id.keypad, || {
                debug!("New device {}", id);
                Device::Remote(Arc::new(RemoteDevice::new(
                    id,
                    self.config.local_device_id,
                    self.config.timing,
                    self.config.activity_timeout,
                    client.clone(),
                    self.events.clone(),
                )))
            })
    }

    /// Record contact with `id`, creating it when needed. Raises one
    /// `CollectionChanged` per object that just became active.
    fn activate(&self, client: &Arc<Client>, id: RnetDeviceId) -> Device {
        let controller = self.get_or_create_controller(id.controller);
        let zone = controller.get_or_create_zone(id.zone);
        let device = self.get_or_create_device(client, id);

        let edges = [
            (controller.activity().touch(), BusObject::Controller(id.controller)),
            (zone.activity().touch(), BusObject::Zone(id.controller, id.zone)),
            (device.activity().touch(), BusObject::Device(id)),
        ];
        for (activated, object) in edges {
            if activated {
                debug!("{:?} active", object);
                let _ = self.events.send(BusEvent::CollectionChanged {
                    object,
                    change: CollectionChange::Activated,
                });
            }
        }
        device
    }

    async fn scan(&self, client: &Arc<Client>) -> Result<()> {
        let local_id = self.config.local_device_id;
        for &controller in &self.config.scan_controllers {
            if controller.is_reserved() {
                continue;
            }
            let probe = RnetMessage::new(
                RnetDeviceId::controller_device(controller),
                local_id,
                RequestData {
                    target_path: self.config.probe_path,
                    source_path: RnetPath::EMPTY,
                    request_type: RequestType::Data,
                },
            );
            debug!("Probing controller {}", controller);
            client.send(probe).await?;
        }
        Ok(())
    }

    /// Route one received message into the tree.
    async fn route(&self, client: &Arc<Client>, message: &RnetMessage) {
        let local_id = self.config.local_device_id;
        if message.source == local_id {
            debug!("Ignoring echo of our own message");
            return;
        }
        if message.source.is_reserved() {
            debug!("Ignoring message from reserved id {}", message.source);
            return;
        }

        let device = self.activate(client, message.source);

        let for_us = message.target == local_id
            || message.target == RnetDeviceId::ALL_DEVICES
            || message.target.is_zone_broadcast_for(&local_id);
        if !for_us {
            return;
        }

        if let MessageBody::RequestData(request) = &message.body {
            if message.target == local_id {
                let local = self
                    .local
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(local) = local {
                    local.answer_request(client, message.source, request).await;
                }
            }
            return;
        }
        device.handle_message(message).await;
    }

    async fn handle_client_event(&self, client: &Arc<Client>, event: ClientEvent) {
        match event {
            ClientEvent::MessageSent(message) => {
                let _ = self.events.send(BusEvent::MessageSent(message));
            }
            ClientEvent::MessageReceived(message) => {
                let _ = self.events.send(BusEvent::MessageReceived(message.clone()));
                self.route(client, &message).await;
            }
            ClientEvent::UnhandledError(e) => {
                warn!("Unhandled bus error: {}", e);
                let _ = self.events.send(BusEvent::UnhandledError(Arc::new(e)));
            }
        }
    }

    fn evict_inactive(&self, max_idle: Duration) -> usize {
        let local_id = self.config.local_device_id;
        let mut removed = Vec::new();

        for controller in self
            .controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            for zone in controller.zones() {
                for keypad in zone.evict_devices(max_idle) {
                    removed.push(BusObject::Device(RnetDeviceId::new(
                        controller.id(),
                        zone.id(),
                        keypad,
                    )));
                }
            }
            let keep = (controller.id() == local_id.controller).then_some(local_id.zone);
            for zone in controller.evict_zones(max_idle, keep) {
                removed.push(BusObject::Zone(controller.id(), zone));
            }
        }

        {
            let mut controllers = self.controllers.write().unwrap_or_else(PoisonError::into_inner);
            controllers.retain(|id, c| {
                let evict =
                    *id != local_id.controller && c.is_empty() && c.activity().idle_for(max_idle);
                if evict {
                    removed.push(BusObject::Controller(*id));
                }
                !evict
            });
        }

        for object in &removed {
            debug!("{:?} evicted", object);
            let _ = self.events.send(BusEvent::CollectionChanged {
                object: *object,
                change: CollectionChange::Evicted,
            });
        }
        removed.len()
    }
}

/// Single consumer of the client mailbox and connection state changes.
async fn run_pump(
    inner: Arc<BusInner>,
    client: Arc<Client>,
    mut mailbox: ClientEventReceiver,
    mut connection_state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    debug!("Bus pump running");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = connection_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection_state.borrow_and_update();
                inner.refresh_state(state);
            }
            event = mailbox.recv() => match event {
                Some(event) => inner.handle_client_event(&client, event).await,
                None => break,
            },
        }
    }
    debug!("Bus pump exited");
}

/// Periodic eviction of idle objects.
async fn run_sweeper(inner: Arc<BusInner>, max_idle: Duration, cancel: CancellationToken) {
    let period = (max_idle / 2).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let removed = inner.evict_inactive(max_idle);
                if removed > 0 {
                    info!("Evicted {} idle objects", removed);
                }
            }
        }
    }
}
