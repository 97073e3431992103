// MIT License - Copyright (c) 2026 rnet contributors

use std::time::Duration;

/// Protocol framing bytes.
pub const START: u8 = 0xF0; // Start of frame
pub const ESCAPE: u8 = 0xF1; // Next byte is inverted (bit 7 was set)
pub const END: u8 = 0xF7; // End of frame

/// Mask applied to the checksum, keeping it below the escape threshold.
pub const CHECKSUM_MASK: u8 = 0x7F;

/// Bytes with this bit set must be escaped on the wire.
pub const HIGH_BIT: u8 = 0x80;

/// Target id (3) + source id (3) + message type (1).
pub const MIN_BODY_LEN: usize = 7;

/// Frames longer than this are treated as line noise.
pub const MAX_FRAME_LEN: usize = 1024;

/// Maximum number of segments in an [`RnetPath`](crate::path::RnetPath).
pub const MAX_PATH_DEPTH: usize = 8;

/// Largest data payload carried by a single SetData packet.
pub const MAX_PACKET_DATA: usize = 16;

/// Default TCP port of RNET serial bridges.
pub const DEFAULT_TCP_PORT: u16 = 9999;

/// Default baud rate of the RS-485 bus.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

pub const TCP_SCHEME: &str = "rnet.tcp";
pub const SERIAL_SCHEME: &str = "rnet.serial";

/// Wire value of each message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    SetData = 0x00,
    RequestData = 0x01,
    Handshake = 0x02,
    Event = 0x05,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::SetData),
            0x01 => Some(Self::RequestData),
            0x02 => Some(Self::Handshake),
            0x05 => Some(Self::Event),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SetData => "SetData",
            Self::RequestData => "RequestData",
            Self::Handshake => "Handshake",
            Self::Event => "Event",
        }
    }
}

/// Default timings used by remote devices and the client.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_CACHE_LIFETIME: Duration = Duration::from_secs(30);
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Controllers probed by a scan when none are configured (a full RNET
/// installation chains at most six controllers).
pub const DEFAULT_SCAN_CONTROLLERS: std::ops::RangeInclusive<u8> = 0..=5;
