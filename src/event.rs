// MIT License - Copyright (c) 2026 rnet contributors

use std::sync::Arc;

use crate::bus::BusState;
use crate::error::RnetError;
use crate::id::{RnetControllerId, RnetDeviceId, RnetZoneId};
use crate::message::{Event, RnetMessage};
use crate::path::RnetPath;

/// Events raised by the client's receive loop and send path.
///
/// Delivered through a single mailbox to whoever owns the client.
#[derive(Debug)]
pub enum ClientEvent {
    MessageSent(RnetMessage),
    MessageReceived(RnetMessage),
    /// A non-fatal error hit by the receive loop
    UnhandledError(RnetError),
}

pub type ClientEventSender = tokio::sync::mpsc::UnboundedSender<ClientEvent>;
pub type ClientEventReceiver = tokio::sync::mpsc::UnboundedReceiver<ClientEvent>;

/// Create the client mailbox.
pub fn client_mailbox() -> (ClientEventSender, ClientEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// An object of the controller/zone/device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusObject {
    Controller(RnetControllerId),
    Zone(RnetControllerId, RnetZoneId),
    Device(RnetDeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChange {
    /// The object went from inactive (or unknown) to active
    Activated,
    /// The object was removed from the tree
    Evicted,
}

/// All events that can be emitted by the bus.
///
/// Users subscribe via `bus.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BusEvent>`.
#[derive(Debug, Clone)]
pub enum BusEvent {
    StateChanged { old: BusState, new: BusState },
    MessageSent(RnetMessage),
    MessageReceived(RnetMessage),
    UnhandledError(Arc<RnetError>),
    CollectionChanged {
        object: BusObject,
        change: CollectionChange,
    },
    /// A cached data value was replaced by a different one
    BufferChanged {
        device: RnetDeviceId,
        path: RnetPath,
        data: Vec<u8>,
    },
    /// A device raised an event on the bus
    DeviceEvent { device: RnetDeviceId, event: Event },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BusEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BusEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
