// MIT License - Copyright (c) 2026 rnet contributors

use std::fmt;

use tokio::time::Instant;

use crate::codec::{BodyReader, BodyWriter, encode_frame};
use crate::constants::{MIN_BODY_LEN, MessageType};
use crate::error::{ProtocolError, Result, RnetError};
use crate::id::RnetDeviceId;
use crate::path::RnetPath;

/// Handshake flavours. `Data` acknowledges a SetData packet, `Event` a
/// high-priority event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandshakeType {
    Data = 0x02,
    Event = 0x06,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x02 => Some(Self::Data),
            0x06 => Some(Self::Event),
            _ => None,
        }
    }
}

/// Event priority. Only `High` events are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Low = 0x00,
    High = 0x01,
}

impl Priority {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Low),
            0x01 => Some(Self::High),
            _ => None,
        }
    }
}

/// Kind of data asked for by a RequestData message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestType {
    /// The value stored at the target path.
    #[default]
    Data,
    /// Any other request type, carried through untouched.
    Other(u8),
}

impl RequestType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::Data,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::Other(v) => v,
        }
    }
}

/// One packet of a (possibly multi-packet) data transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetData {
    pub target_path: RnetPath,
    pub source_path: RnetPath,
    pub packet_number: u16,
    pub packet_count: u16,
    pub data: Vec<u8>,
}

impl SetData {
    /// Whether this is the final packet of its transfer.
    pub fn is_last(&self) -> bool {
        self.packet_number.checked_add(1) == Some(self.packet_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestData {
    pub target_path: RnetPath,
    pub source_path: RnetPath,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub target_path: RnetPath,
    pub source_path: RnetPath,
    pub event_code: u16,
    pub event_timestamp: u16,
    pub event_data: u16,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub handshake_type: HandshakeType,
}

/// Typed payload of an [`RnetMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    SetData(SetData),
    RequestData(RequestData),
    Event(Event),
    Handshake(Handshake),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SetData(_) => MessageType::SetData,
            Self::RequestData(_) => MessageType::RequestData,
            Self::Event(_) => MessageType::Event,
            Self::Handshake(_) => MessageType::Handshake,
        }
    }
}

impl From<SetData> for MessageBody {
    fn from(v: SetData) -> Self {
        Self::SetData(v)
    }
}

impl From<RequestData> for MessageBody {
    fn from(v: RequestData) -> Self {
        Self::RequestData(v)
    }
}

impl From<Event> for MessageBody {
    fn from(v: Event) -> Self {
        Self::Event(v)
    }
}

impl From<Handshake> for MessageBody {
    fn from(v: Handshake) -> Self {
        Self::Handshake(v)
    }
}

/// A message on the bus.
///
/// `timestamp` is taken when the message is built or decoded. It never goes
/// on the wire and is ignored by equality.
#[derive(Debug, Clone)]
pub struct RnetMessage {
    pub target: RnetDeviceId,
    pub source: RnetDeviceId,
    pub timestamp: Instant,
    pub body: MessageBody,
}

impl PartialEq for RnetMessage {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target && self.source == other.source && self.body == other.body
    }
}

impl Eq for RnetMessage {}

impl RnetMessage {
    pub fn new(target: RnetDeviceId, source: RnetDeviceId, body: impl Into<MessageBody>) -> Self {
        Self {
            target,
            source,
            timestamp: Instant::now(),
            body: body.into(),
        }
    }

    pub fn handshake(target: RnetDeviceId, source: RnetDeviceId, handshake_type: HandshakeType) -> Self {
        Self::new(target, source, Handshake { handshake_type })
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Serialize to an unescaped body.
    ///
    /// Fails when SetData carries more bytes than its length field can state.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = BodyWriter::new();
        w.put_device_id(self.target)
            .put_device_id(self.source)
            .put_u8(self.message_type() as u8);
        match &self.body {
            MessageBody::SetData(m) => {
                let len = u16::try_from(m.data.len()).map_err(|_| RnetError::PayloadTooLarge {
                    len: m.data.len(),
                })?;
                w.put_path(&m.target_path)
                    .put_path(&m.source_path)
                    .put_u16(m.packet_number)
                    .put_u16(m.packet_count)
                    .put_u16(len)
                    .put_bytes(&m.data);
            }
            MessageBody::RequestData(m) => {
                w.put_path(&m.target_path)
                    .put_path(&m.source_path)
                    .put_u8(m.request_type.as_u8());
            }
            MessageBody::Event(m) => {
                w.put_path(&m.target_path)
                    .put_path(&m.source_path)
                    .put_u16(m.event_code)
                    .put_u16(m.event_timestamp)
                    .put_u16(m.event_data)
                    .put_u8(m.priority as u8);
            }
            MessageBody::Handshake(m) => {
                w.put_u8(m.handshake_type as u8);
            }
        }
        Ok(w.finish())
    }

    /// Serialize to a complete wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        Ok(encode_frame(&self.encode()?))
    }

    /// Parse an unescaped, checksum-verified body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < MIN_BODY_LEN {
            return Err(ProtocolError::BodyTooShort { len: body.len() }.into());
        }
        let mut r = BodyReader::new(body);
        let target = r.get_device_id("target id")?;
        let source = r.get_device_id("source id")?;
        let type_byte = r.get_u8("message type")?;
        let message_type =
            MessageType::from_u8(type_byte).ok_or(ProtocolError::UnknownMessageType(type_byte))?;

        let body = match message_type {
            MessageType::SetData => {
                let target_path = r.get_path("target path")?;
                let source_path = r.get_path("source path")?;
                let packet_number = r.get_u16("packet number")?;
                let packet_count = r.get_u16("packet count")?;
                if packet_number >= packet_count {
                    return Err(ProtocolError::BadPacketNumber {
                        number: packet_number,
                        count: packet_count,
                    }
                    .into());
                }
                let len = r.get_u16("data length")? as usize;
                let data = r.get_bytes(len, "data")?.to_vec();
                MessageBody::SetData(SetData {
                    target_path,
                    source_path,
                    packet_number,
                    packet_count,
                    data,
                })
            }
            MessageType::RequestData => MessageBody::RequestData(RequestData {
                target_path: r.get_path("target path")?,
                source_path: r.get_path("source path")?,
                request_type: RequestType::from_u8(r.get_u8("request type")?),
            }),
            MessageType::Event => {
                let target_path = r.get_path("target path")?;
                let source_path = r.get_path("source path")?;
                let event_code = r.get_u16("event code")?;
                let event_timestamp = r.get_u16("event timestamp")?;
                let event_data = r.get_u16("event data")?;
                let p = r.get_u8("priority")?;
                let priority = Priority::from_u8(p).ok_or(ProtocolError::UnknownPriority(p))?;
                MessageBody::Event(Event {
                    target_path,
                    source_path,
                    event_code,
                    event_timestamp,
                    event_data,
                    priority,
                })
            }
            MessageType::Handshake => {
                let t = r.get_u8("handshake type")?;
                let handshake_type =
                    HandshakeType::from_u8(t).ok_or(ProtocolError::UnknownHandshakeType(t))?;
                MessageBody::Handshake(Handshake { handshake_type })
            }
        };

        Ok(Self {
            target,
            source,
            timestamp: Instant::now(),
            body,
        })
    }
}

impl fmt::Display for RnetMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ", self.source, self.target)?;
        match &self.body {
            MessageBody::SetData(m) => write!(
                f,
                "SetData [{}] from [{}] packet {}/{} ({} bytes)",
                m.target_path,
                m.source_path,
                u32::from(m.packet_number) + 1,
                m.packet_count,
                m.data.len()
            ),
            MessageBody::RequestData(m) => write!(
                f,
                "RequestData [{}] from [{}] type {:02X}",
                m.target_path,
                m.source_path,
                m.request_type.as_u8()
            ),
            MessageBody::Event(m) => write!(
                f,
                "Event [{}] code {:04X} data {:04X} {:?}",
                m.target_path, m.event_code, m.event_data, m.priority
            ),
            MessageBody::Handshake(m) => write!(f, "Handshake {:?}", m.handshake_type),
        }
    }
}
