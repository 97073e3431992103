// MIT License - Copyright (c) 2026 rnet contributors

//! Byte-stream links to the bus.
//!
//! A [`Connection`] turns a raw stream into typed messages. The stream itself
//! comes from a [`StreamOpener`]: TCP, serial or anything else that reads and
//! writes bytes.

pub mod serial;
pub mod stream;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::RnetUri;
use crate::error::Result;
use crate::message::RnetMessage;

pub use serial::SerialOpener;
pub use stream::{BoxStream, QueueOpener, StreamConnection, StreamOpener, StreamQueue};
pub use tcp::TcpOpener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// A message-level link to the bus.
#[async_trait]
pub trait Connection: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Watch state transitions.
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Open the link. Fails when it is already open.
    async fn open(&self) -> Result<()>;

    /// Close the link. Closing a closed link is a no-op.
    async fn close(&self) -> Result<()>;

    /// Write one complete frame.
    async fn send(&self, message: &RnetMessage) -> Result<()>;

    /// Wait for the next message.
    ///
    /// Returns `Cancelled` when `cancel` fires and `Disconnected` when the
    /// link drops; the link is closed in the latter case.
    async fn receive(&self, cancel: &CancellationToken) -> Result<RnetMessage>;

    /// Human readable target, for logs.
    fn describe(&self) -> String;

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

/// Build the connection matching `uri`.
pub fn connect(uri: &RnetUri) -> Arc<dyn Connection> {
    match uri {
        RnetUri::Tcp { host, port } => {
            Arc::new(StreamConnection::new(TcpOpener::new(host.clone(), *port)))
        }
        RnetUri::Serial { device, baud_rate } => {
            Arc::new(StreamConnection::new(SerialOpener::new(device.clone(), *baud_rate)))
        }
    }
}
