// MIT License - Copyright (c) 2026 rnet contributors

//! The controller, zone and device tree and the data protocol spoken with
//! each device.

pub mod assembler;
pub mod controller;
pub mod local;
pub mod remote;
pub mod store;
pub mod zone;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::id::RnetDeviceId;
use crate::message::{Priority, RnetMessage};
use crate::path::RnetPath;

pub use assembler::{Assembly, PacketAssembler};
pub use controller::Controller;
pub use local::LocalDevice;
pub use remote::RemoteDevice;
pub use store::{CachedValue, DataStore};
pub use zone::Zone;

/// Last time an object was heard from.
#[derive(Debug)]
pub struct Activity {
    timeout: Duration,
    last_contact: Mutex<Option<Instant>>,
}

impl Activity {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_contact: Mutex::new(None),
        }
    }

    pub fn last_contact(&self) -> Option<Instant> {
        *self.last_contact.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the last contact lies within the activity timeout.
    pub fn is_active(&self) -> bool {
        self.last_contact()
            .is_some_and(|t| t.elapsed() <= self.timeout)
    }

    /// Whether nothing was heard for longer than `max_idle`.
    pub fn idle_for(&self, max_idle: Duration) -> bool {
        self.last_contact().is_none_or(|t| t.elapsed() > max_idle)
    }

    /// Record a contact now. Returns true when this turned the object from
    /// inactive to active.
    pub fn touch(&self) -> bool {
        let mut last = self.last_contact.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let was_active = last.is_some_and(|t| now.duration_since(t) <= self.timeout);
        *last = Some(now);
        !was_active
    }
}

/// A device of the bus: this process or a remote one.
#[derive(Clone)]
pub enum Device {
    Local(Arc<LocalDevice>),
    Remote(Arc<RemoteDevice>),
}

impl Device {
    pub fn id(&self) -> RnetDeviceId {
        match self {
            Self::Local(d) => d.id(),
            Self::Remote(d) => d.id(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn activity(&self) -> &Activity {
        match self {
            Self::Local(d) => d.activity(),
            Self::Remote(d) => d.activity(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.activity().is_active()
    }

    pub fn store(&self) -> &DataStore {
        match self {
            Self::Local(d) => d.store(),
            Self::Remote(d) => d.store(),
        }
    }

    /// Data view for `path`.
    pub fn handle(&self, path: RnetPath) -> DataHandle {
        DataHandle {
            device: self.clone(),
            path,
        }
    }

    pub(crate) async fn handle_message(&self, message: &RnetMessage) {
        if let Self::Remote(d) = self {
            d.handle_message(message).await;
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(d) => write!(f, "Device::Local({})", d.id()),
            Self::Remote(d) => write!(f, "Device::Remote({})", d.id()),
        }
    }
}

/// The data item at one path of one device.
///
/// Reads and writes on a remote device are network conversations that
/// resolve to `None` / `false` on timeout or cancellation. On the local
/// device they only touch the local store.
#[derive(Debug, Clone)]
pub struct DataHandle {
    device: Device,
    path: RnetPath,
}

impl DataHandle {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn path(&self) -> RnetPath {
        self.path
    }

    /// The cached value, without any network traffic.
    pub fn cached(&self) -> Option<CachedValue> {
        self.device.store().get(&self.path)
    }

    pub fn invalidate(&self) {
        self.device.store().invalidate(&self.path);
    }

    /// Cached value, or a request when nothing fresh is cached.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        self.read_with_cancel(&CancellationToken::new()).await
    }

    pub async fn read_with_cancel(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        match &self.device {
            Device::Local(d) => Ok(d.read(&self.path)),
            Device::Remote(d) => d.read(self.path, cancel).await,
        }
    }

    /// Ask the device for the current value, bypassing the cache.
    pub async fn request(&self) -> Result<Option<Vec<u8>>> {
        self.request_with_cancel(&CancellationToken::new()).await
    }

    pub async fn request_with_cancel(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        match &self.device {
            Device::Local(d) => Ok(d.read(&self.path)),
            Device::Remote(d) => d.request(self.path, cancel).await,
        }
    }

    pub async fn write(&self, data: &[u8]) -> Result<bool> {
        self.write_with_cancel(data, &CancellationToken::new()).await
    }

    pub async fn write_with_cancel(&self, data: &[u8], cancel: &CancellationToken) -> Result<bool> {
        match &self.device {
            Device::Local(d) => Ok(d.write(self.path, data)),
            Device::Remote(d) => d.write(self.path, data, cancel).await,
        }
    }

    pub async fn send_event(
        &self,
        event_code: u16,
        event_timestamp: u16,
        event_data: u16,
        priority: Priority,
    ) -> Result<bool> {
        self.send_event_with_cancel(
            event_code,
            event_timestamp,
            event_data,
            priority,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn send_event_with_cancel(
        &self,
        event_code: u16,
        event_timestamp: u16,
        event_data: u16,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        match &self.device {
            Device::Local(d) => Ok(d.send_event(
                self.path,
                event_code,
                event_timestamp,
                event_data,
                priority,
            )),
            Device::Remote(d) => {
                d.send_event(self.path, event_code, event_timestamp, event_data, priority, cancel)
                    .await
            }
        }
    }
}
