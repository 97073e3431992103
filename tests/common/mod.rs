// MIT License - Copyright (c) 2026 rnet contributors
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use rnet::codec::FrameDecoder;
use rnet::transport::{QueueOpener, StreamConnection, StreamQueue};
use rnet::{Bus, BusConfig, BusConfigBuilder, BusState, RnetDeviceId, RnetMessage};

pub const LOCAL: RnetDeviceId = RnetDeviceId::from_bytes(0x00, 0x00, 0x70);
pub const REMOTE: RnetDeviceId = RnetDeviceId::from_bytes(0x01, 0x02, 0x03);

/// The far end of the link: reads what the bus sends and answers it.
pub struct Peer {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl Peer {
    pub async fn send(&mut self, message: &RnetMessage) {
        self.stream.write_all(&message.to_frame().unwrap()).await.unwrap();
    }

    /// Write bytes as they are, framed or not.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next message written by the bus.
    pub async fn recv(&mut self) -> RnetMessage {
        let mut buf = [0u8; 256];
        loop {
            if let Some(message) = self.decoder.next_message() {
                return message.unwrap();
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "bus closed the link");
            self.decoder.push(&buf[..n]);
        }
    }

    pub async fn recv_within(&mut self, timeout: Duration) -> Option<RnetMessage> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

pub struct Harness {
    pub bus: Bus,
    pub peer: Peer,
    pub queue: StreamQueue,
}

impl Harness {
    /// Drop the link. Returns the bus end of a replacement, to be queued
    /// when the test wants the reconnect to succeed.
    pub fn hang_up(&mut self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(4096);
        self.peer = Peer {
            stream: remote,
            decoder: FrameDecoder::new(),
        };
        local
    }
}

/// Defaults for tests: our usual identity and no scanning.
pub fn config() -> BusConfigBuilder {
    BusConfig::builder()
        .local_device_id(LOCAL)
        .scan_controllers(Vec::new())
}

/// A bus wired to an in-memory link, started and connected.
pub async fn start(config: BusConfig) -> Harness {
    let harness = build(config);
    harness.bus.start().await.unwrap();
    wait_until_available(&harness.bus).await;
    harness
}

/// A stopped bus wired to an in-memory link.
pub fn build(config: BusConfig) -> Harness {
    let (opener, queue) = QueueOpener::new();
    let (local, remote) = tokio::io::duplex(4096);
    queue.push(local).unwrap();
    let bus = Bus::with_connection(config, Arc::new(StreamConnection::new(opener)));
    Harness {
        bus,
        peer: Peer {
            stream: remote,
            decoder: FrameDecoder::new(),
        },
        queue,
    }
}

pub async fn wait_for_state(bus: &Bus, state: BusState) {
    let mut rx = bus.subscribe_state();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .expect("bus state never reached")
        .unwrap();
}

/// Wait for the link to come up after a start or reconnect.
pub async fn wait_until_available(bus: &Bus) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !bus.is_available() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bus never became available");
}
