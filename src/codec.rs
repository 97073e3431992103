// MIT License - Copyright (c) 2026 rnet contributors

//! Byte-level framing of RNET messages.
//!
//! A frame on the wire is `[START][escaped body][checksum][END]`. Body bytes
//! with bit 7 set are sent as `[ESCAPE][byte ^ 0xFF]`, which keeps every
//! marker byte out of the payload. The checksum covers the unescaped body and
//! is masked to 7 bits, so it is never escaped itself.

use std::collections::VecDeque;

use tracing::debug;

use crate::constants::{CHECKSUM_MASK, END, ESCAPE, HIGH_BIT, MAX_FRAME_LEN, MIN_BODY_LEN, START};
use crate::error::{ProtocolError, Result};
use crate::id::RnetDeviceId;
use crate::message::RnetMessage;
use crate::path::RnetPath;

/// Compute the checksum of an unescaped body.
///
/// `(sum of body bytes + body length) & 0x7F`
pub fn checksum(body: &[u8]) -> u8 {
    let sum = body
        .iter()
        .fold(body.len() as u32, |acc, &b| acc.wrapping_add(b as u32));
    (sum as u8) & CHECKSUM_MASK
}

/// Whether `expected` is the checksum of `body`.
pub fn verify_checksum(body: &[u8], expected: u8) -> bool {
    checksum(body) == expected
}

/// Append `byte` to `out`, escaping it when bit 7 is set.
pub fn escape_into(out: &mut Vec<u8>, byte: u8) {
    if byte & HIGH_BIT != 0 {
        out.push(ESCAPE);
        out.push(byte ^ 0xFF);
    } else {
        out.push(byte);
    }
}

/// Wrap an unescaped body into a complete wire frame.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() * 2 + 3);
    frame.push(START);
    for &byte in body {
        escape_into(&mut frame, byte);
    }
    frame.push(checksum(body));
    frame.push(END);
    frame
}

/// Streaming frame scanner.
///
/// Bytes are pushed as they arrive from the transport. Complete frames whose
/// checksum matches are queued and handed out by [`next_body`](Self::next_body)
/// or [`next_message`](Self::next_message). A `START` byte always begins a new
/// frame, so a truncated frame never swallows the next good one. Corrupt
/// frames are dropped here and never reported as errors.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    current: Option<Vec<u8>>,
    escape_next: bool,
    ready: VecDeque<Vec<u8>>,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the wire.
    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            self.push_byte(byte);
        }
    }

    fn push_byte(&mut self, byte: u8) {
        match byte {
            START => {
                if let Some(partial) = self.current.take() {
                    debug!("Frame restarted after {} bytes, dropping partial frame", partial.len());
                    self.dropped += 1;
                }
                self.current = Some(Vec::new());
                self.escape_next = false;
            }
            END => {
                let Some(frame) = self.current.take() else {
                    return;
                };
                let escape_pending = std::mem::take(&mut self.escape_next);
                self.finish_frame(frame, escape_pending);
            }
            ESCAPE if self.current.is_some() => {
                self.escape_next = true;
            }
            _ => {
                let Some(frame) = self.current.as_mut() else {
                    // Noise between frames
                    return;
                };
                let value = if std::mem::take(&mut self.escape_next) {
                    byte ^ 0xFF
                } else {
                    byte
                };
                frame.push(value);
                if frame.len() > MAX_FRAME_LEN {
                    debug!("Frame exceeds {} bytes, dropping", MAX_FRAME_LEN);
                    self.current = None;
                    self.dropped += 1;
                }
            }
        }
    }

    fn finish_frame(&mut self, mut frame: Vec<u8>, escape_pending: bool) {
        if escape_pending {
            debug!("Frame ended inside an escape sequence, dropping");
            self.dropped += 1;
            return;
        }
        let Some(received) = frame.pop() else {
            debug!("Empty frame, dropping");
            self.dropped += 1;
            return;
        };
        if !verify_checksum(&frame, received) {
            debug!(
                "Checksum Not Ok (expected {:02X}, got {:02X}), dropping frame",
                checksum(&frame),
                received
            );
            self.dropped += 1;
            return;
        }
        if frame.len() < MIN_BODY_LEN {
            debug!("Body too short ({} bytes), dropping frame", frame.len());
            self.dropped += 1;
            return;
        }
        self.ready.push_back(frame);
    }

    /// Next checksum-valid body, if any.
    pub fn next_body(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Next parsed message, if any.
    ///
    /// A body that passed the checksum but does not parse is returned as an
    /// error; the following frames remain available.
    pub fn next_message(&mut self) -> Option<Result<RnetMessage>> {
        self.next_body().map(|body| RnetMessage::decode(&body))
    }

    /// Number of frames discarded as noise so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Builder for an unescaped message body.
#[derive(Debug, Default)]
pub(crate) struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Little-endian: low byte first.
    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn put_device_id(&mut self, id: RnetDeviceId) -> &mut Self {
        self.put_bytes(&id.to_bytes())
    }

    /// Length byte, then the segments.
    pub fn put_path(&mut self, path: &RnetPath) -> &mut Self {
        self.put_u8(path.len() as u8).put_bytes(path.as_slice())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an unescaped message body.
#[derive(Debug)]
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn get_u8(&mut self, field: &'static str) -> std::result::Result<u8, ProtocolError> {
        let v = *self
            .buf
            .get(self.pos)
            .ok_or(ProtocolError::Truncated { field })?;
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self, field: &'static str) -> std::result::Result<u16, ProtocolError> {
        let lo = self.get_u8(field)?;
        let hi = self.get_u8(field)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn get_bytes(
        &mut self,
        len: usize,
        field: &'static str,
    ) -> std::result::Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated { field });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn get_device_id(&mut self, field: &'static str) -> std::result::Result<RnetDeviceId, ProtocolError> {
        let bytes = self.get_bytes(3, field)?;
        Ok(RnetDeviceId::from_bytes(bytes[0], bytes[1], bytes[2]))
    }

    pub fn get_path(&mut self, field: &'static str) -> std::result::Result<RnetPath, ProtocolError> {
        let depth = self.get_u8(field)? as usize;
        let segments = self.get_bytes(depth, field)?;
        RnetPath::new(segments).map_err(|_| ProtocolError::PathTooDeep { depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal Handshake body: target, source, type 2, handshake type 2.
    fn handshake_body() -> Vec<u8> {
        vec![0x00, 0x00, 0x70, 0x01, 0x02, 0x03, 0x02, 0x02]
    }

    #[test]
    fn test_checksum_formula() {
        let body = [0x01u8, 0x02, 0x03];
        assert_eq!(checksum(&body), (1 + 2 + 3 + 3) & 0x7F);
        assert_eq!(checksum(&[]), 0);
        // Sum overflowing a byte still masks correctly
        let body = [0xFFu8; 10];
        assert_eq!(checksum(&body), ((0xFF * 10 + 10) & 0x7F) as u8);
    }

    #[test]
    fn test_checksum_detects_any_single_byte_change() {
        let body: Vec<u8> = (0..32u8).map(|b| b.wrapping_mul(37)).collect();
        let sum = checksum(&body);
        for i in 0..body.len() {
            for delta in 1..=0x7Fu8 {
                let mut mutated = body.clone();
                mutated[i] = mutated[i].wrapping_add(delta);
                assert!(
                    !verify_checksum(&mutated, sum),
                    "byte {i} + {delta} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_escape_high_bytes() {
        for byte in 0x80..=0xFFu8 {
            let mut out = Vec::new();
            escape_into(&mut out, byte);
            assert_eq!(out, vec![ESCAPE, byte ^ 0xFF]);
            assert!(out[1] & HIGH_BIT == 0);
        }
        for byte in 0x00..0x80u8 {
            let mut out = Vec::new();
            escape_into(&mut out, byte);
            assert_eq!(out, vec![byte]);
        }
    }

    #[test]
    fn test_frame_layout() {
        let body = handshake_body();
        let frame = encode_frame(&body);
        assert_eq!(frame[0], START);
        assert_eq!(*frame.last().unwrap(), END);
        assert_eq!(frame[frame.len() - 2], checksum(&body));
        assert_eq!(&frame[1..frame.len() - 2], body.as_slice());
    }

    #[test]
    fn test_decode_escaped_body() {
        let body = vec![0x00, 0x00, 0x70, 0x01, 0x02, 0x03, 0x00, 0x80, 0xF0, 0xF7, 0xFF];
        let frame = encode_frame(&body);
        // Markers never appear inside the frame
        assert!(!frame[1..frame.len() - 1].contains(&START));
        assert!(!frame[1..frame.len() - 1].contains(&END));

        let mut decoder = FrameDecoder::new();
        decoder.push(&frame);
        assert_eq!(decoder.next_body(), Some(body));
        assert_eq!(decoder.next_body(), None);
    }

    #[test]
    fn test_decode_split_across_reads() {
        let body = handshake_body();
        let frame = encode_frame(&body);
        let mut decoder = FrameDecoder::new();
        for chunk in frame.chunks(3) {
            decoder.push(chunk);
        }
        assert_eq!(decoder.next_body(), Some(body));
    }

    #[test]
    fn test_bad_checksum_is_dropped_and_next_frame_parses() {
        let body = handshake_body();
        let mut bad = encode_frame(&body);
        let idx = bad.len() - 2;
        bad[idx] = (bad[idx] + 1) & 0x7F;
        let good = encode_frame(&body);

        let mut decoder = FrameDecoder::new();
        decoder.push(&bad);
        decoder.push(&good);
        assert_eq!(decoder.next_body(), Some(body));
        assert_eq!(decoder.next_body(), None);
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn test_short_body_is_noise() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode_frame(&[0x01, 0x02, 0x03]));
        assert_eq!(decoder.next_body(), None);
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn test_restart_on_start_byte() {
        let body = handshake_body();
        let mut stream = vec![START, 0x01, 0x02];
        stream.extend(encode_frame(&body));
        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        assert_eq!(decoder.next_body(), Some(body));
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn test_noise_between_frames_ignored() {
        let body = handshake_body();
        let mut stream = vec![0x11, 0x22, END, 0x33];
        stream.extend(encode_frame(&body));
        stream.extend([0x44, 0x55]);
        stream.extend(encode_frame(&body));
        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        assert_eq!(decoder.next_body(), Some(body.clone()));
        assert_eq!(decoder.next_body(), Some(body));
    }

    #[test]
    fn test_reader_truncation() {
        let mut reader = BodyReader::new(&[0x01]);
        assert_eq!(
            reader.get_u16("packet number"),
            Err(ProtocolError::Truncated { field: "packet number" })
        );
    }

    #[test]
    fn test_u16_is_little_endian() {
        let mut writer = BodyWriter::new();
        writer.put_u16(0x1234);
        assert_eq!(writer.finish(), vec![0x34, 0x12]);
        let mut reader = BodyReader::new(&[0x34, 0x12]);
        assert_eq!(reader.get_u16("x").unwrap(), 0x1234);
    }

    #[test]
    fn test_path_too_deep() {
        let mut reader = BodyReader::new(&[9, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            reader.get_path("target path"),
            Err(ProtocolError::PathTooDeep { depth: 9 })
        );
    }
}
