// MIT License - Copyright (c) 2026 rnet contributors

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::error::{Result, RnetError};
use crate::transport::stream::{BoxStream, StreamOpener};

/// Opens TCP connections to a serial-over-IP bridge.
#[derive(Debug, Clone)]
pub struct TcpOpener {
    host: String,
    port: u16,
}

impl TcpOpener {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl StreamOpener for TcpOpener {
    async fn open(&self) -> Result<BoxStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                error!("TCP connect to {}:{} failed: {}", self.host, self.port, e);
                RnetError::Io(e)
            })?;
        // Frames are small and latency matters more than throughput
        stream.set_nodelay(true)?;
        debug!("TCP socket connected to {}:{}", self.host, self.port);
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("tcp {}:{}", self.host, self.port)
    }
}
