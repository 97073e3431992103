// MIT License - Copyright (c) 2026 rnet contributors
//
//! # rnet
//!
//! Client stack for the RNET bus spoken by multi-zone audio controllers,
//! over a TCP bridge or an RS-485 serial port.
//!
//! The crate frames and parses RNET messages, keeps a connection open,
//! discovers the controller/zone/device tree from the traffic it sees and
//! runs the data protocol (chunked reads and writes with handshakes,
//! retries and timeouts) against each device.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rnet::{Bus, BusConfig, BusEvent, RnetDeviceId, RnetPath};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BusConfig::builder()
//!         .uri("rnet.serial:///dev/ttyUSB0?baud=19200".parse()?)
//!         .build();
//!
//!     let bus = Bus::new(config);
//!
//!     let mut events = bus.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let BusEvent::CollectionChanged { object, change } = event {
//!                 println!("{object:?} {change:?}");
//!             }
//!         }
//!     });
//!
//!     bus.start().await?;
//!
//!     let controller = bus.get_or_create_device("00.00.7F".parse::<RnetDeviceId>()?)?;
//!     let name = controller.handle("2.0".parse::<RnetPath>()?).request().await?;
//!     println!("{name:?}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     bus.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod devices;
pub mod error;
pub mod event;
pub mod id;
pub mod message;
pub mod path;
pub mod profile;
pub mod transport;

// Re-exports for convenience
pub use bus::{Bus, BusState};
pub use client::{Client, ClientState};
pub use codec::FrameDecoder;
pub use config::{BusConfig, BusConfigBuilder, DeviceTiming, RnetUri};
pub use devices::{Controller, DataHandle, Device, LocalDevice, RemoteDevice, Zone};
pub use error::{ProtocolError, Result, RnetError};
pub use event::{BusEvent, BusObject, CollectionChange, EventReceiver};
pub use id::{RnetControllerId, RnetDeviceId, RnetKeypadId, RnetZoneId};
pub use message::{
    Event, Handshake, HandshakeType, MessageBody, Priority, RequestData, RequestType, RnetMessage,
    SetData,
};
pub use path::RnetPath;
pub use profile::{Profile, ProfileProvider, ProfileTarget};
pub use transport::{Connection, ConnectionState};
