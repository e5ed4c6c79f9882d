//! Join handshake
//!
//! A viewer joins a host with a single request/response exchange:
//!
//! ```text
//! Viewer                                   Host
//!   |                                        |
//!   |------- Hello (version, liveMatchId) ->|
//!   |                                        |
//!   |<------ Accept (match info) -----------|   or
//!   |<------ Reject (reason, message) ------|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! The state machine here is transport-agnostic; the transport layer moves
//! packets and applies the timeout.

use crate::error::ProtocolError;
use crate::session::MatchInfo;

use super::constants::PROTOCOL_VERSION;
use super::packet::{Packet, RejectReason};

/// Handshake role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Host,
    Viewer,
}

/// Whether the host can take another viewer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Open,
    Full,
    Stopping,
}

/// Result of feeding a packet into the handshake
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    /// Host must send this packet; `accepted` tells whether the viewer is in
    Reply { packet: Packet, accepted: bool },
    /// Viewer was accepted by the host
    Accepted(MatchInfo),
    /// Viewer was turned away
    Rejected { reason: RejectReason, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Viewer has not sent Hello yet
    Initial,
    /// Host waiting for Hello
    WaitingForHello,
    /// Viewer waiting for Accept/Reject
    WaitingForAnswer,
    /// Handshake complete (accepted or rejected)
    Done,
}

/// Handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    /// Host: the match being served. Viewer: the match being sought.
    live_match_id: String,
    local: Option<MatchInfo>,
}

impl Handshake {
    /// Host side, serving `local`
    pub fn host(local: MatchInfo) -> Self {
        Self {
            role: HandshakeRole::Host,
            state: HandshakeState::WaitingForHello,
            live_match_id: local.live_match_id.clone(),
            local: Some(local),
        }
    }

    /// Viewer side, seeking `live_match_id`
    pub fn viewer(live_match_id: impl Into<String>) -> Self {
        Self {
            role: HandshakeRole::Viewer,
            state: HandshakeState::Initial,
            live_match_id: live_match_id.into(),
            local: None,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Generate the opening packet
    ///
    /// Viewer: returns Hello. Host: returns None (host waits for Hello).
    pub fn generate_initial(&mut self) -> Option<Packet> {
        if self.role != HandshakeRole::Viewer || self.state != HandshakeState::Initial {
            return None;
        }

        self.state = HandshakeState::WaitingForAnswer;
        Some(Packet::Hello {
            version: PROTOCOL_VERSION,
            live_match_id: self.live_match_id.clone(),
        })
    }

    /// Process a packet received from the peer
    pub fn process(
        &mut self,
        packet: Packet,
        admission: Admission,
    ) -> Result<HandshakeStep, ProtocolError> {
        match (self.role, self.state) {
            (HandshakeRole::Host, HandshakeState::WaitingForHello) => {
                self.process_hello(packet, admission)
            }
            (HandshakeRole::Viewer, HandshakeState::WaitingForAnswer) => self.process_answer(packet),
            _ => Err(ProtocolError::UnexpectedPacket(packet.name())),
        }
    }

    fn process_hello(
        &mut self,
        packet: Packet,
        admission: Admission,
    ) -> Result<HandshakeStep, ProtocolError> {
        let (version, live_match_id) = match packet {
            Packet::Hello {
                version,
                live_match_id,
            } => (version, live_match_id),
            other => return Err(ProtocolError::UnexpectedPacket(other.name())),
        };

        self.state = HandshakeState::Done;

        let rejection = if version != PROTOCOL_VERSION {
            Some(RejectReason::VersionMismatch)
        } else if live_match_id != self.live_match_id {
            Some(RejectReason::WrongMatch)
        } else {
            match admission {
                Admission::Open => None,
                Admission::Full => Some(RejectReason::Full),
                Admission::Stopping => Some(RejectReason::Stopping),
            }
        };

        let step = match (rejection, &self.local) {
            (None, Some(local)) => HandshakeStep::Reply {
                packet: Packet::Accept(local.clone()),
                accepted: true,
            },
            (reason, _) => {
                let reason = reason.unwrap_or(RejectReason::Stopping);
                HandshakeStep::Reply {
                    packet: Packet::Reject {
                        reason,
                        message: reason.to_string(),
                    },
                    accepted: false,
                }
            }
        };

        Ok(step)
    }

    fn process_answer(&mut self, packet: Packet) -> Result<HandshakeStep, ProtocolError> {
        let step = match packet {
            Packet::Accept(info) => {
                // A host answering for another match is treated as a refusal
                if info.live_match_id != self.live_match_id {
                    HandshakeStep::Rejected {
                        reason: RejectReason::WrongMatch,
                        message: format!("host serves {}", info.live_match_id),
                    }
                } else {
                    HandshakeStep::Accepted(info)
                }
            }
            Packet::Reject { reason, message } => HandshakeStep::Rejected { reason, message },
            other => return Err(ProtocolError::UnexpectedPacket(other.name())),
        };

        self.state = HandshakeState::Done;
        Ok(step)
    }
}
