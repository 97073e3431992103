// MIT License - Copyright (c) 2026 rnet contributors

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error};

use crate::error::Result;
use crate::transport::stream::{BoxStream, StreamOpener};

/// Opens a local RS-485 adapter. The bus runs 8N1.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    device: String,
    baud_rate: u32,
}

impl SerialOpener {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
        }
    }
}

#[async_trait]
impl StreamOpener for SerialOpener {
    async fn open(&self) -> Result<BoxStream> {
        let port = tokio_serial::new(self.device.as_str(), self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .inspect_err(|e| error!("Failed to open serial port {}: {}", self.device, e))?;
        debug!("Serial port {} opened at {} baud", self.device, self.baud_rate);
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("serial {}@{}", self.device, self.baud_rate)
    }
}
