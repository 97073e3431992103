// MIT License - Copyright (c) 2026 rnet contributors

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::DeviceTiming;
use crate::constants::MAX_PACKET_DATA;
use crate::devices::Activity;
use crate::devices::assembler::{Assembly, PacketAssembler};
use crate::devices::store::DataStore;
use crate::error::{Result, RnetError};
use crate::event::{BusEvent, EventSender};
use crate::id::RnetDeviceId;
use crate::message::{
    Event, HandshakeType, MessageBody, Priority, RequestData, RequestType, RnetMessage, SetData,
};
use crate::path::RnetPath;

/// Key of a pending conversation: the path it is about and its id.
type ConversationKey = (RnetPath, u64);

enum Waiter {
    /// A read waiting for SetData packets from the requested path
    Data {
        assembler: PacketAssembler,
        done: Option<oneshot::Sender<Vec<u8>>>,
    },
    /// A write or event waiting for its acknowledgement
    Handshake {
        kind: HandshakeType,
        done: Option<oneshot::Sender<()>>,
    },
}

struct Pending {
    /// Replies stamped before this are stale
    since: Instant,
    waiter: Waiter,
}

/// Removes its conversation from the pending table when dropped.
struct PendingGuard<'a> {
    table: &'a StdMutex<BTreeMap<ConversationKey, Pending>>,
    key: ConversationKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

enum Outcome<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// What to do with an inbound SetData packet.
#[derive(Debug, PartialEq, Eq)]
enum PacketAction {
    Ignore,
    Ack,
    AckAndStore(Vec<u8>),
}

impl From<Assembly> for PacketAction {
    fn from(assembly: Assembly) -> Self {
        match assembly {
            Assembly::Complete(data) => Self::AckAndStore(data),
            other if other.needs_ack() => Self::Ack,
            _ => Self::Ignore,
        }
    }
}

/// A device elsewhere on the bus.
///
/// All traffic to the device goes through conversations. At most one
/// conversation (read, write or event) runs at a time; inbound replies are
/// matched against the pending table by the routing task, which never takes
/// the conversation lock.
pub struct RemoteDevice {
    id: RnetDeviceId,
    local_id: RnetDeviceId,
    timing: DeviceTiming,
    client: Arc<Client>,
    events: EventSender,
    store: DataStore,
    activity: Activity,
    conversation: Mutex<()>,
    pending: StdMutex<BTreeMap<ConversationKey, Pending>>,
    /// Transfers the device starts on its own, per source path
    unsolicited: StdMutex<HashMap<RnetPath, PacketAssembler>>,
    next_conversation: AtomicU64,
}

impl RemoteDevice {
    pub fn new(
        id: RnetDeviceId,
        local_id: RnetDeviceId,
        timing: DeviceTiming,
        activity_timeout: Duration,
        client: Arc<Client>,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            local_id,
            timing,
            client,
            events,
            store: DataStore::new(),
            activity: Activity::new(activity_timeout),
            conversation: Mutex::new(()),
            pending: StdMutex::new(BTreeMap::new()),
            unsolicited: StdMutex::new(HashMap::new()),
            next_conversation: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> RnetDeviceId {
        self.id
    }

    pub fn timing(&self) -> &DeviceTiming {
        &self.timing
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Cached value at `path`, or a network read when missing or expired.
    pub async fn read(&self, path: RnetPath, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.store.get_fresh(&path, self.timing.cache_lifetime) {
            return Ok(Some(data));
        }
        self.request(path, cancel).await
    }

    /// Read `path` from the device, ignoring the cache.
    ///
    /// Resolves to `None` when the device does not answer within the request
    /// timeout or `cancel` fires.
    pub async fn request(&self, path: RnetPath, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        let Some(_conversation) = self.begin(cancel).await else {
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        let request = RnetMessage::new(
            self.id,
            self.local_id,
            RequestData {
                target_path: path,
                source_path: RnetPath::EMPTY,
                request_type: RequestType::Data,
            },
        );
        let _pending = self.register(
            path,
            request.timestamp,
            Waiter::Data {
                assembler: PacketAssembler::new(),
                done: Some(tx),
            },
        );

        match self
            .converse(request, rx, self.timing.request_timeout, cancel)
            .await
        {
            Outcome::Done(data) => Ok(Some(data)),
            Outcome::TimedOut => {
                warn!("No data from {} for [{}]", self.id, path);
                Ok(None)
            }
            Outcome::Cancelled => Ok(None),
        }
    }

    /// Write `data` to `path`, then read back what the device kept.
    ///
    /// Returns whether every packet was accepted.
    pub async fn write(&self, path: RnetPath, data: &[u8], cancel: &CancellationToken) -> Result<bool> {
        let packets = split_packets(data);
        let count = u16::try_from(packets.len()).map_err(|_| {
            RnetError::invalid_state(format!("{} bytes do not fit in one transfer", data.len()))
        })?;
        self.store.invalidate(&path);

        {
            let Some(_conversation) = self.begin(cancel).await else {
                return Ok(false);
            };
            for (number, chunk) in packets.into_iter().enumerate() {
                let message = RnetMessage::new(
                    self.id,
                    self.local_id,
                    SetData {
                        target_path: path,
                        source_path: RnetPath::EMPTY,
                        packet_number: number as u16,
                        packet_count: count,
                        data: chunk.to_vec(),
                    },
                );
                let acked = self
                    .send_acknowledged(path, message, HandshakeType::Data, self.timing.write_timeout, cancel)
                    .await;
                if !acked {
                    warn!(
                        "Write to {} [{}] failed at packet {}/{}",
                        self.id,
                        path,
                        number + 1,
                        count
                    );
                    return Ok(false);
                }
            }
        }

        // The device may have adjusted what was written
        self.request(path, cancel).await?;
        Ok(true)
    }

    /// Raise an event on the device. Only high-priority events wait for an
    /// acknowledgement.
    pub async fn send_event(
        &self,
        path: RnetPath,
        event_code: u16,
        event_timestamp: u16,
        event_data: u16,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(_conversation) = self.begin(cancel).await else {
            return Ok(false);
        };
        let message = RnetMessage::new(
            self.id,
            self.local_id,
            Event {
                target_path: path,
                source_path: RnetPath::EMPTY,
                event_code,
                event_timestamp,
                event_data,
                priority,
            },
        );
        if priority == Priority::High {
            Ok(self
                .send_acknowledged(path, message, HandshakeType::Event, self.timing.event_timeout, cancel)
                .await)
        } else {
            Ok(self.send_once(message, self.timing.event_timeout, cancel).await)
        }
    }

    /// Handle a message this device sent to us.
    pub(crate) async fn handle_message(&self, message: &RnetMessage) {
        match &message.body {
            MessageBody::SetData(packet) => self.handle_set_data(message, packet).await,
            MessageBody::Handshake(handshake) => {
                self.complete_handshake(handshake.handshake_type, message.timestamp)
            }
            MessageBody::Event(event) => {
                debug!("Event {:04X} from {}", event.event_code, self.id);
                let _ = self.events.send(BusEvent::DeviceEvent {
                    device: self.id,
                    event: event.clone(),
                });
                if event.priority == Priority::High && self.timing.requires_handshake {
                    self.acknowledge(message.source, HandshakeType::Event).await;
                }
            }
            MessageBody::RequestData(_) => {}
        }
    }

    async fn handle_set_data(&self, message: &RnetMessage, packet: &SetData) {
        let action = self
            .offer_to_conversation(message, packet)
            .unwrap_or_else(|| self.offer_unsolicited(packet));

        match action {
            PacketAction::Ignore => return,
            PacketAction::Ack => {}
            PacketAction::AckAndStore(data) => self.store_value(packet.source_path, data),
        }
        if self.timing.requires_handshake {
            self.acknowledge(message.source, HandshakeType::Data).await;
        }
    }

    /// Feed a packet to the read waiting on its path. `None` when no read is.
    fn offer_to_conversation(&self, message: &RnetMessage, packet: &SetData) -> Option<PacketAction> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = pending.iter_mut().find_map(|((path, _), p)| {
            (path == &packet.source_path && matches!(p.waiter, Waiter::Data { .. })).then_some(p)
        })?;

        if message.timestamp < entry.since {
            debug!("Dropping stale reply from {} for [{}]", self.id, packet.source_path);
            return Some(PacketAction::Ignore);
        }
        let Waiter::Data { assembler, done } = &mut entry.waiter else {
            return None;
        };
        let assembly = assembler.accept(packet);
        if let Assembly::Complete(data) = &assembly {
            if let Some(done) = done.take() {
                let _ = done.send(data.clone());
            }
            // Resends of the last packet may arrive after the read has gone
            let finished = assembler.clone();
            drop(pending);
            self.unsolicited
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(packet.source_path, finished);
        }
        Some(assembly.into())
    }

    fn offer_unsolicited(&self, packet: &SetData) -> PacketAction {
        let mut assemblers = self.unsolicited.lock().unwrap_or_else(PoisonError::into_inner);
        assemblers
            .entry(packet.source_path)
            .or_default()
            .accept(packet)
            .into()
    }

    fn store_value(&self, path: RnetPath, data: Vec<u8>) {
        if self.store.store(path, data.clone()) {
            let _ = self.events.send(BusEvent::BufferChanged {
                device: self.id,
                path,
                data,
            });
        }
    }

    fn complete_handshake(&self, kind: HandshakeType, at: Instant) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let waiting = pending.values_mut().find_map(|p| match &mut p.waiter {
            Waiter::Handshake { kind: k, done } if *k == kind && at >= p.since => done.take(),
            _ => None,
        });
        match waiting {
            Some(done) => {
                let _ = done.send(());
            }
            None => debug!("Unexpected {:?} handshake from {}", kind, self.id),
        }
    }

    async fn acknowledge(&self, to: RnetDeviceId, kind: HandshakeType) {
        let handshake = RnetMessage::handshake(to, self.local_id, kind);
        if let Err(e) = self.client.send_if_open(handshake).await {
            debug!("Could not acknowledge {}: {}", to, e);
        }
    }

    /// Take the conversation lock, unless `cancel` fires first.
    async fn begin(&self, cancel: &CancellationToken) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            guard = self.conversation.lock() => Some(guard),
        }
    }

    fn register(&self, path: RnetPath, since: Instant, waiter: Waiter) -> PendingGuard<'_> {
        let key = (path, self.next_conversation.fetch_add(1, Ordering::Relaxed));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Pending { since, waiter });
        PendingGuard {
            table: &self.pending,
            key,
        }
    }

    /// Send `message` and wait for the matching handshake, retransmitting
    /// until `timeout`. Without handshakes the message is sent once.
    async fn send_acknowledged(
        &self,
        path: RnetPath,
        message: RnetMessage,
        kind: HandshakeType,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if !self.timing.requires_handshake {
            return self.send_once(message, timeout, cancel).await;
        }
        let (tx, rx) = oneshot::channel();
        let _pending = self.register(
            path,
            message.timestamp,
            Waiter::Handshake {
                kind,
                done: Some(tx),
            },
        );
        match self.converse(message, rx, timeout, cancel).await {
            Outcome::Done(()) => true,
            Outcome::TimedOut => {
                warn!("No {:?} handshake from {} for [{}]", kind, self.id, path);
                false
            }
            Outcome::Cancelled => false,
        }
    }

    async fn send_once(&self, message: RnetMessage, timeout: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(timeout) => false,
            sent = self.client.send(message) => match sent {
                Ok(()) => true,
                Err(e) => {
                    warn!("Send to {} failed: {}", self.id, e);
                    false
                }
            },
        }
    }

    /// Send `message` every retry delay until `reply` resolves, `timeout`
    /// elapses or `cancel` fires.
    async fn converse<T>(
        &self,
        message: RnetMessage,
        mut reply: oneshot::Receiver<T>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Outcome<T> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > 1 {
                debug!("Retransmitting to {} (attempt {})", self.id, attempt);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Outcome::Cancelled,
                _ = &mut deadline => return Outcome::TimedOut,
                sent = self.client.send(message.clone()) => {
                    if let Err(e) = sent {
                        warn!("Send to {} failed: {}", self.id, e);
                    }
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                replied = &mut reply => {
                    return match replied {
                        Ok(value) => Outcome::Done(value),
                        Err(_) => Outcome::TimedOut,
                    };
                }
                _ = &mut deadline => return Outcome::TimedOut,
                _ = tokio::time::sleep(self.timing.retry_delay) => {}
            }
        }
    }
}

/// Split a payload into SetData packets. An empty payload is one empty packet.
pub(crate) fn split_packets(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![&[]];
    }
    data.chunks(MAX_PACKET_DATA).collect()
}
