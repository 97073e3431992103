// MIT License - Copyright (c) 2026 rnet contributors

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, RnetError};
use crate::event::{ClientEvent, ClientEventSender};
use crate::message::RnetMessage;
use crate::transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Stopped,
    Started,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps a connection open and pumps its messages into a mailbox.
///
/// While started, a background task reopens the connection whenever it is
/// down (every `reconnect_delay`) and posts each received message as
/// [`ClientEvent::MessageReceived`]. Errors never end the loop; they are
/// posted as [`ClientEvent::UnhandledError`] instead.
pub struct Client {
    connection: Arc<dyn Connection>,
    events: ClientEventSender,
    reconnect_delay: Duration,
    state_tx: watch::Sender<ClientState>,
    lifecycle: Mutex<Option<Running>>,
    /// Token of the current run, shared with senders
    running: StdMutex<Option<CancellationToken>>,
    /// Serializes open attempts between the loop and senders
    open_gate: Arc<Mutex<()>>,
}

impl Client {
    pub fn new(
        connection: Arc<dyn Connection>,
        reconnect_delay: Duration,
        events: ClientEventSender,
    ) -> Self {
        let (state_tx, _) = watch::channel(ClientState::Stopped);
        Self {
            connection,
            events,
            reconnect_delay,
            state_tx,
            lifecycle: Mutex::new(None),
            running: StdMutex::new(None),
            open_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    fn running_token(&self) -> Option<CancellationToken> {
        match self.running.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_running_token(&self, token: Option<CancellationToken>) {
        match self.running.lock() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    /// Start the receive loop.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(RnetError::invalid_state("client is already started"));
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_receive_loop(
            self.connection.clone(),
            self.open_gate.clone(),
            self.reconnect_delay,
            self.events.clone(),
            cancel.clone(),
        ));
        self.set_running_token(Some(cancel.clone()));
        *lifecycle = Some(Running { cancel, handle });

        info!("Client started on {}", self.connection.describe());
        self.state_tx.send_replace(ClientState::Started);
        Ok(())
    }

    /// Stop the receive loop and close the connection.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return Err(RnetError::invalid_state("client is not started"));
        };

        running.cancel.cancel();
        self.set_running_token(None);
        if let Err(e) = running.handle.await {
            warn!("Receive loop ended abnormally: {}", e);
        }
        self.connection.close().await?;

        info!("Client stopped");
        self.state_tx.send_replace(ClientState::Stopped);
        Ok(())
    }

    /// Send a message, waiting for the connection to come up if needed.
    ///
    /// Fails with `Cancelled` when the client stops while waiting.
    pub async fn send(&self, message: RnetMessage) -> Result<()> {
        let cancel = self
            .running_token()
            .ok_or_else(|| RnetError::invalid_state("client is not started"))?;
        ensure_open(&self.connection, &self.open_gate, self.reconnect_delay, &cancel).await?;
        self.write(message).await
    }

    /// Send a message only when the connection is open right now.
    pub async fn send_if_open(&self, message: RnetMessage) -> Result<()> {
        if self.running_token().is_none() {
            return Err(RnetError::invalid_state("client is not started"));
        }
        if !self.connection.is_open() {
            return Err(RnetError::Disconnected);
        }
        self.write(message).await
    }

    /// Cancel the receive loop without waiting for it. For use from `Drop`.
    pub(crate) fn abort(&self) {
        if let Ok(mut lifecycle) = self.lifecycle.try_lock()
            && let Some(running) = lifecycle.take()
        {
            running.cancel.cancel();
            running.handle.abort();
            self.set_running_token(None);
            self.state_tx.send_replace(ClientState::Stopped);
        }
    }

    async fn write(&self, message: RnetMessage) -> Result<()> {
        self.connection.send(&message).await?;
        let _ = self.events.send(ClientEvent::MessageSent(message));
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}

/// Open the connection unless it already is, retrying every `delay`.
async fn ensure_open(
    connection: &Arc<dyn Connection>,
    gate: &Mutex<()>,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(RnetError::Cancelled);
        }
        if connection.is_open() {
            return Ok(());
        }
        {
            let _gate = tokio::select! {
                _ = cancel.cancelled() => return Err(RnetError::Cancelled),
                guard = gate.lock() => guard,
            };
            if connection.is_open() {
                return Ok(());
            }
            let opened = tokio::select! {
                _ = cancel.cancelled() => return Err(RnetError::Cancelled),
                opened = connection.open() => opened,
            };
            match opened {
                Ok(()) => return Ok(()),
                // Someone else opened it first
                Err(RnetError::InvalidState(_)) if connection.is_open() => return Ok(()),
                Err(e) => warn!(
                    "Failed to open {}: {}, retrying in {:?}",
                    connection.describe(),
                    e,
                    delay
                ),
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(RnetError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_receive_loop(
    connection: Arc<dyn Connection>,
    gate: Arc<Mutex<()>>,
    reconnect_delay: Duration,
    events: ClientEventSender,
    cancel: CancellationToken,
) {
    debug!("Receive loop running");
    loop {
        if ensure_open(&connection, &gate, reconnect_delay, &cancel)
            .await
            .is_err()
        {
            break;
        }
        match connection.receive(&cancel).await {
            Ok(message) => {
                debug!("Received {}", message);
                let _ = events.send(ClientEvent::MessageReceived(message));
            }
            Err(RnetError::Cancelled) => break,
            Err(e) if e.is_retryable() => {
                warn!("Connection to {} lost: {}", connection.describe(), e);
            }
            Err(e) => {
                debug!("Receive error: {}", e);
                let _ = events.send(ClientEvent::UnhandledError(e));
            }
        }
    }
    debug!("Receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::event::{ClientEventReceiver, client_mailbox};
    use crate::id::RnetDeviceId;
    use crate::message::HandshakeType;
    use crate::transport::{ConnectionState, QueueOpener, StreamConnection, StreamQueue};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn client() -> (Client, StreamQueue, ClientEventReceiver) {
        let (opener, queue) = QueueOpener::new();
        let (tx, rx) = client_mailbox();
        let client = Client::new(
            Arc::new(StreamConnection::new(opener)),
            Duration::from_millis(100),
            tx,
        );
        (client, queue, rx)
    }

    fn handshake() -> RnetMessage {
        RnetMessage::handshake(
            RnetDeviceId::from_bytes(0, 0, 0x70),
            RnetDeviceId::from_bytes(1, 2, 3),
            HandshakeType::Data,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let (client, _queue, _rx) = client();
        client.start().await.unwrap();
        assert_eq!(client.state(), ClientState::Started);
        assert!(matches!(client.start().await, Err(RnetError::InvalidState(_))));
        client.stop().await.unwrap();
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(matches!(client.stop().await, Err(RnetError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_messages_reach_mailbox() {
        let (client, queue, mut rx) = client();
        let (local, mut remote) = tokio::io::duplex(1024);
        queue.push(local).unwrap();
        client.start().await.unwrap();

        remote.write_all(&handshake().to_frame().unwrap()).await.unwrap();
        match rx.recv().await.unwrap() {
            ClientEvent::MessageReceived(m) => assert_eq!(m, handshake()),
            other => panic!("unexpected event {other:?}"),
        }
        client.stop().await.unwrap();
        assert_eq!(client.connection().state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_does_not_stop_loop() {
        let (client, queue, mut rx) = client();
        let (local, mut remote) = tokio::io::duplex(1024);
        queue.push(local).unwrap();
        client.start().await.unwrap();

        remote
            .write_all(&encode_frame(&[1, 2, 3, 0, 0, 0x70, 0x09]))
            .await
            .unwrap();
        remote.write_all(&handshake().to_frame().unwrap()).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::UnhandledError(RnetError::Protocol(_))
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::MessageReceived(_)
        ));
        client.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_peer_close() {
        let (client, queue, mut rx) = client();
        let (first, remote) = tokio::io::duplex(1024);
        queue.push(first).unwrap();
        client.start().await.unwrap();
        drop(remote);

        let (second, mut remote) = tokio::io::duplex(1024);
        queue.push(second).unwrap();
        remote.write_all(&handshake().to_frame().unwrap()).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientEvent::MessageReceived(_)
        ));
        client.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_posts_message_sent() {
        let (client, queue, mut rx) = client();
        assert!(matches!(
            client.send(handshake()).await,
            Err(RnetError::InvalidState(_))
        ));

        let (local, mut remote) = tokio::io::duplex(1024);
        queue.push(local).unwrap();
        client.start().await.unwrap();
        client.send(handshake()).await.unwrap();

        let frame = handshake().to_frame().unwrap();
        let mut buf = vec![0u8; frame.len()];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, frame);
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::MessageSent(_)));
        client.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_if_open_fails_fast_when_down() {
        let (client, _queue, _rx) = client();
        client.start().await.unwrap();
        assert!(matches!(
            client.send_if_open(handshake()).await,
            Err(RnetError::Disconnected)
        ));
        client.stop().await.unwrap();
    }
}
