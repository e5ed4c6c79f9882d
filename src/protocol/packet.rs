//! Data channel packet codec
//!
//! Every packet on a host/viewer connection is length-prefixed:
//!
//! ```text
//! +---------+-------------+----------------+
//! | Kind(1) | Length(4,BE)| Payload(Length)|
//! +---------+-------------+----------------+
//! ```
//!
//! Strings inside payloads are `u16` length-prefixed UTF-8. Frame payloads
//! are split off the read buffer without copying.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::bus::Event;
use crate::error::ProtocolError;
use crate::pipeline::{FrameKind, StreamFrame};
use crate::session::MatchInfo;

use super::constants::*;

/// Why the host turned a viewer away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Host is serving a different live match
    WrongMatch = 1,
    /// Incompatible protocol version
    VersionMismatch = 2,
    /// Viewer limit reached
    Full = 3,
    /// Host session is shutting down
    Stopping = 4,
}

impl RejectReason {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(RejectReason::WrongMatch),
            2 => Some(RejectReason::VersionMismatch),
            3 => Some(RejectReason::Full),
            4 => Some(RejectReason::Stopping),
            _ => None,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::WrongMatch => "wrong live match",
            RejectReason::VersionMismatch => "protocol version mismatch",
            RejectReason::Full => "viewer limit reached",
            RejectReason::Stopping => "host is stopping",
        };
        f.write_str(s)
    }
}

/// A data channel packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Viewer join request
    Hello { version: u16, live_match_id: String },
    /// Host accepted the join
    Accept(MatchInfo),
    /// Host refused the join
    Reject { reason: RejectReason, message: String },
    /// Application event
    Event(Event),
    /// Media frame
    Frame(StreamFrame),
    /// Liveness ping
    Heartbeat,
    /// Orderly close
    Bye,
}

impl Packet {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Hello { .. } => "hello",
            Packet::Accept(_) => "accept",
            Packet::Reject { .. } => "reject",
            Packet::Event(_) => "event",
            Packet::Frame(_) => "frame",
            Packet::Heartbeat => "heartbeat",
            Packet::Bye => "bye",
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Packet::Hello { .. } => PACKET_HELLO,
            Packet::Accept(_) => PACKET_ACCEPT,
            Packet::Reject { .. } => PACKET_REJECT,
            Packet::Event(_) => PACKET_EVENT,
            Packet::Frame(_) => PACKET_FRAME,
            Packet::Heartbeat => PACKET_HEARTBEAT,
            Packet::Bye => PACKET_BYE,
        }
    }
}

/// Encoder/decoder for [`Packet`]s with a payload size limit
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Append the encoded packet to `dst`
    pub fn encode(&self, packet: &Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut payload = BytesMut::new();

        match packet {
            Packet::Hello {
                version,
                live_match_id,
            } => {
                payload.put_u16(*version);
                put_str16(&mut payload, live_match_id, "live_match_id")?;
            }
            Packet::Accept(info) => {
                put_str16(&mut payload, &info.live_match_id, "live_match_id")?;
                put_str16(&mut payload, &info.match_id, "match_id")?;
                put_str16(&mut payload, &info.league_id, "league_id")?;
            }
            Packet::Reject { reason, message } => {
                payload.put_u8(*reason as u8);
                put_str16(&mut payload, message, "message")?;
            }
            Packet::Event(event) => {
                let body = serde_json::to_vec(event)
                    .map_err(|e| ProtocolError::InvalidEvent(e.to_string()))?;
                payload.put_slice(&body);
            }
            Packet::Frame(frame) => {
                payload.reserve(FRAME_HEADER_SIZE + frame.data.len());
                payload.put_u8(frame.kind.as_u8());
                payload.put_u8(if frame.is_keyframe {
                    FRAME_FLAG_KEYFRAME
                } else {
                    0
                });
                payload.put_u32(frame.timestamp);
                payload.put_slice(&frame.data);
            }
            Packet::Heartbeat | Packet::Bye => {}
        }

        if payload.len() > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: payload.len(),
                max: self.max_packet_size,
            });
        }

        dst.reserve(PACKET_HEADER_SIZE + payload.len());
        dst.put_u8(packet.kind());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }

    /// Encode a single packet into a fresh buffer
    pub fn encode_to_bytes(&self, packet: &Packet) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(packet, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one packet from the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed; consumed bytes are
    /// removed from `src` only when a full packet is available.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let kind = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

        if len > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: len,
                max: self.max_packet_size,
            });
        }

        if src.len() < PACKET_HEADER_SIZE + len {
            src.reserve(PACKET_HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(PACKET_HEADER_SIZE + len).freeze();
        payload.advance(PACKET_HEADER_SIZE);

        let packet = match kind {
            PACKET_HELLO => {
                if payload.remaining() < 2 {
                    return Err(ProtocolError::Truncated("version"));
                }
                let version = payload.get_u16();
                let live_match_id = get_str16(&mut payload, "live_match_id")?;
                Packet::Hello {
                    version,
                    live_match_id,
                }
            }
            PACKET_ACCEPT => {
                let live_match_id = get_str16(&mut payload, "live_match_id")?;
                let match_id = get_str16(&mut payload, "match_id")?;
                let league_id = get_str16(&mut payload, "league_id")?;
                Packet::Accept(MatchInfo::new(league_id, match_id, live_match_id))
            }
            PACKET_REJECT => {
                if payload.remaining() < 1 {
                    return Err(ProtocolError::Truncated("reason"));
                }
                let code = payload.get_u8();
                let reason = RejectReason::from_u8(code).unwrap_or(RejectReason::WrongMatch);
                let message = get_str16(&mut payload, "message")?;
                Packet::Reject { reason, message }
            }
            PACKET_EVENT => {
                let event: Event = serde_json::from_slice(&payload)
                    .map_err(|e| ProtocolError::InvalidEvent(e.to_string()))?;
                Packet::Event(event)
            }
            PACKET_FRAME => {
                if payload.remaining() < FRAME_HEADER_SIZE {
                    return Err(ProtocolError::Truncated("frame header"));
                }
                let kind = FrameKind::from_u8(payload.get_u8())
                    .ok_or(ProtocolError::Truncated("frame kind"))?;
                let flags = payload.get_u8();
                let timestamp = payload.get_u32();
                Packet::Frame(StreamFrame {
                    kind,
                    timestamp,
                    data: payload,
                    is_keyframe: flags & FRAME_FLAG_KEYFRAME != 0,
                })
            }
            PACKET_HEARTBEAT => Packet::Heartbeat,
            PACKET_BYE => Packet::Bye,
            other => return Err(ProtocolError::UnknownPacket(other)),
        };

        Ok(Some(packet))
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

fn put_str16(buf: &mut BytesMut, s: &str, field: &'static str) -> Result<(), ProtocolError> {
    if s.len() > u16::MAX as usize {
        return Err(ProtocolError::FieldTooLong(field));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str16(buf: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated(field));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated(field));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}
