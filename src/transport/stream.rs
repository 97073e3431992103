// MIT License - Copyright (c) 2026 rnet contributors

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::FrameDecoder;
use crate::error::{Result, RnetError};
use crate::message::RnetMessage;
use crate::transport::{Connection, ConnectionState};

const READ_BUFFER_SIZE: usize = 1024;

/// Any bidirectional byte stream usable as a bus link.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

/// Produces a fresh byte stream each time the connection opens.
#[async_trait]
pub trait StreamOpener: Send + Sync + 'static {
    async fn open(&self) -> Result<BoxStream>;

    fn describe(&self) -> String;
}

struct Reader {
    half: ReadHalf<BoxStream>,
    decoder: FrameDecoder,
    buf: Box<[u8]>,
}

/// Framed connection over whatever stream the opener returns.
pub struct StreamConnection<O> {
    opener: O,
    state_tx: watch::Sender<ConnectionState>,
    /// Serializes open and close
    lifecycle: Mutex<()>,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<WriteHalf<BoxStream>>>,
    /// Cancelled when the current link is closed, waking a blocked reader
    link: StdMutex<CancellationToken>,
}

impl<O: StreamOpener> StreamConnection<O> {
    pub fn new(opener: O) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            opener,
            state_tx,
            lifecycle: Mutex::new(()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            link: StdMutex::new(CancellationToken::new()),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn link_token(&self) -> CancellationToken {
        match self.link.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn renew_link_token(&self) {
        let fresh = CancellationToken::new();
        match self.link.lock() {
            Ok(mut token) => *token = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}

#[async_trait]
impl<O: StreamOpener> Connection for StreamConnection<O> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn open(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Open {
            return Err(RnetError::invalid_state(format!(
                "connection to {} is already open",
                self.opener.describe()
            )));
        }

        self.set_state(ConnectionState::Opening);
        let stream = match self.opener.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };

        self.renew_link_token();
        let (read_half, write_half) = tokio::io::split(stream);
        *self.reader.lock().await = Some(Reader {
            half: read_half,
            decoder: FrameDecoder::new(),
            buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        });
        *self.writer.lock().await = Some(write_half);

        info!("Connection to {} open", self.opener.describe());
        self.set_state(ConnectionState::Open);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        self.set_state(ConnectionState::Closing);
        self.link_token().cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down writer: {}", e);
            }
        }
        self.reader.lock().await.take();

        info!("Connection to {} closed", self.opener.describe());
        self.set_state(ConnectionState::Closed);
        Ok(())
    }

    async fn send(&self, message: &RnetMessage) -> Result<()> {
        let frame = message.to_frame()?;
        let mut writer = self.writer.lock().await;
        let Some(half) = writer.as_mut() else {
            return Err(RnetError::Disconnected);
        };
        let written = async {
            half.write_all(&frame).await?;
            half.flush().await
        }
        .await;
        if let Err(e) = written {
            error!("Write to {} failed: {}", self.opener.describe(), e);
            return Err(RnetError::Io(e));
        }
        debug!("Sent {}", message);
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> Result<RnetMessage> {
        let failure = {
            let mut guard = tokio::select! {
                _ = cancel.cancelled() => return Err(RnetError::Cancelled),
                guard = self.reader.lock() => guard,
            };
            let Some(reader) = guard.as_mut() else {
                return Err(RnetError::Disconnected);
            };
            // Read under the reader lock so it matches the installed stream
            let link = self.link_token();

            let failure = loop {
                if let Some(decoded) = reader.decoder.next_message() {
                    return decoded;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RnetError::Cancelled),
                    _ = link.cancelled() => return Err(RnetError::Disconnected),
                    read = reader.half.read(&mut reader.buf[..]) => match read {
                        Ok(0) => break None,
                        Ok(n) => reader.decoder.push(&reader.buf[..n]),
                        Err(e) => break Some(e),
                    },
                }
            };
            if reader.decoder.dropped() > 0 {
                debug!(
                    "Discarded {} corrupt frames from {}",
                    reader.decoder.dropped(),
                    self.opener.describe()
                );
            }
            failure
        };

        match failure {
            None => info!("Connection to {} closed by peer", self.opener.describe()),
            Some(e) => error!("Read from {} failed: {}", self.opener.describe(), e),
        }
        self.close().await?;
        Err(RnetError::Disconnected)
    }

    fn describe(&self) -> String {
        self.opener.describe()
    }
}

/// Opener handing out streams pushed through a [`StreamQueue`].
///
/// Opening fails while the queue is empty, so a reconnect loop simply keeps
/// retrying until the next stream is supplied.
pub struct QueueOpener {
    rx: StdMutex<mpsc::UnboundedReceiver<BoxStream>>,
}

/// Producer side of a [`QueueOpener`].
#[derive(Clone)]
pub struct StreamQueue {
    tx: mpsc::UnboundedSender<BoxStream>,
}

impl QueueOpener {
    pub fn new() -> (Self, StreamQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx: StdMutex::new(rx) }, StreamQueue { tx })
    }
}

impl StreamQueue {
    /// Make `stream` the result of the next open.
    pub fn push(&self, stream: impl AsyncStream) -> Result<()> {
        self.tx
            .send(Box::new(stream))
            .map_err(|_| RnetError::invalid_state("stream queue opener dropped"))
    }
}

#[async_trait]
impl StreamOpener for QueueOpener {
    async fn open(&self) -> Result<BoxStream> {
        let next = match self.rx.lock() {
            Ok(mut rx) => rx.try_recv().ok(),
            Err(poisoned) => poisoned.into_inner().try_recv().ok(),
        };
        next.ok_or_else(|| {
            RnetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no stream queued",
            ))
        })
    }

    fn describe(&self) -> String {
        "queued stream".to_string()
    }
}
