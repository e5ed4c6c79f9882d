//! Discovery datagrams
//!
//! Viewers probe the local segment for a live match; the host serving that
//! match answers with an announcement carrying its data channel port.
//!
//! ```text
//! +-----------+---------+-------------+
//! | Magic(4)  | Kind(1) | JSON body   |
//! | "LLV1"    |         |             |
//! +-----------+---------+-------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::session::MatchInfo;

use super::constants::{DATAGRAM_ANNOUNCE, DATAGRAM_PROBE, DISCOVERY_MAGIC, MAX_DATAGRAM_SIZE};

/// Viewer query for a live match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub live_match_id: String,
}

/// Host answer to a matching probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub live_match_id: String,
    pub match_id: String,
    pub league_id: String,
    /// TCP port of the host's data channel listener
    pub port: u16,
}

impl Announcement {
    pub fn new(info: &MatchInfo, port: u16) -> Self {
        Self {
            live_match_id: info.live_match_id.clone(),
            match_id: info.match_id.clone(),
            league_id: info.league_id.clone(),
            port,
        }
    }
}

/// A discovery datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Probe(Probe),
    Announce(Announcement),
}

impl Datagram {
    pub fn probe(live_match_id: impl Into<String>) -> Self {
        Datagram::Probe(Probe {
            live_match_id: live_match_id.into(),
        })
    }

    /// The live match this datagram concerns
    pub fn live_match_id(&self) -> &str {
        match self {
            Datagram::Probe(p) => &p.live_match_id,
            Datagram::Announce(a) => &a.live_match_id,
        }
    }

    pub fn encode(&self) -> Bytes {
        let (kind, body) = match self {
            Datagram::Probe(p) => (DATAGRAM_PROBE, serde_json::to_vec(p)),
            Datagram::Announce(a) => (DATAGRAM_ANNOUNCE, serde_json::to_vec(a)),
        };
        // Plain string-keyed structs always serialize
        let body = body.unwrap_or_default();

        let mut buf = BytesMut::with_capacity(DISCOVERY_MAGIC.len() + 1 + body.len());
        buf.put_slice(DISCOVERY_MAGIC);
        buf.put_u8(kind);
        buf.put_slice(&body);
        buf.freeze()
    }

    /// Parse a received datagram; anything foreign or malformed yields None
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATAGRAM_SIZE || data.len() < DISCOVERY_MAGIC.len() + 1 {
            return None;
        }
        if &data[..DISCOVERY_MAGIC.len()] != DISCOVERY_MAGIC {
            return None;
        }

        let kind = data[DISCOVERY_MAGIC.len()];
        let body = &data[DISCOVERY_MAGIC.len() + 1..];

        match kind {
            DATAGRAM_PROBE => serde_json::from_slice(body).ok().map(Datagram::Probe),
            DATAGRAM_ANNOUNCE => serde_json::from_slice(body).ok().map(Datagram::Announce),
            _ => None,
        }
    }
}
