//! Viewer data channel
//!
//! Connects to a discovered host, performs the join handshake and then runs
//! the viewer's single connection: received events and frames are handed to
//! the bus and pipeline, heartbeats go out on a timer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::Event;
use crate::control::ControlEvent;
use crate::error::{Error, ProtocolError, Result};
use crate::pipeline::InboundFrames;
use crate::protocol::{Admission, Handshake, HandshakeStep, Packet, PacketCodec};
use crate::registry::SessionRegistry;
use crate::session::{MatchInfo, PeerId, SessionHandle};

use super::config::TransportConfig;
use super::connection::{PacketReader, PacketWriter};

/// An accepted connection to a host
pub struct ViewerConnection {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
    host: SocketAddr,
    info: MatchInfo,
}

/// Where a running viewer connection delivers what it receives
pub struct ViewerSinks {
    pub registry: Arc<SessionRegistry>,
    pub handle: SessionHandle,
    /// The host's entry in the viewer session's peer set
    pub host_peer: PeerId,
    pub events: mpsc::Sender<Event>,
    pub frames: InboundFrames,
    pub notices: broadcast::Sender<ControlEvent>,
}

impl ViewerConnection {
    /// Connect to `host` and join `live_match_id`
    ///
    /// Every failure to reach or join the host fails with
    /// `ConnectionRefused`: TCP refusal, a `Reject` answer, a reset or
    /// malformed reply during the handshake, or a handshake that outlasts
    /// `connect_timeout`.
    pub async fn connect(host: SocketAddr, live_match_id: &str, config: &TransportConfig) -> Result<Self> {
        let attempt = async {
            let socket = TcpStream::connect(host)
                .await
                .map_err(|e| Error::ConnectionRefused(format!("{}: {}", host, e)))?;
            if config.tcp_nodelay {
                socket.set_nodelay(true)?;
            }

            let codec = PacketCodec::new(config.max_packet_size);
            let (read_half, write_half) = socket.into_split();
            let mut reader = PacketReader::new(read_half, codec);
            let mut writer = PacketWriter::new(write_half, codec);

            let mut handshake = Handshake::viewer(live_match_id);
            if let Some(hello) = handshake.generate_initial() {
                writer.send(&hello).await?;
            }

            let answer = reader
                .next()
                .await?
                .ok_or_else(|| Error::ConnectionRefused(format!("{} closed during handshake", host)))?;

            match handshake.process(answer, Admission::Open)? {
                HandshakeStep::Accepted(info) => Ok(Self {
                    reader,
                    writer,
                    host,
                    info,
                }),
                HandshakeStep::Rejected { reason, message } => {
                    tracing::info!(host = %host, reason = %reason, "Join rejected");
                    Err(Error::ConnectionRefused(format!("rejected by host: {}", message)))
                }
                HandshakeStep::Reply { .. } => Err(ProtocolError::UnexpectedPacket("handshake").into()),
            }
        };

        match tokio::time::timeout(config.connect_timeout, attempt).await {
            Ok(Ok(connection)) => {
                tracing::info!(host = %host, live_match_id = live_match_id, "Joined host");
                Ok(connection)
            }
            Ok(Err(e @ Error::ConnectionRefused(_))) => Err(e),
            Ok(Err(e)) => {
                tracing::debug!(host = %host, code = e.code(), error = %e, "Handshake failed");
                Err(Error::ConnectionRefused(format!("{}: {}", host, e)))
            }
            Err(_) => Err(Error::ConnectionRefused(format!(
                "handshake with {} timed out",
                host
            ))),
        }
    }

    pub fn host(&self) -> SocketAddr {
        self.host
    }

    /// Match identifiers as announced by the host
    pub fn info(&self) -> &MatchInfo {
        &self.info
    }

    /// Run the connection until the session is cancelled or the link drops
    ///
    /// An unexpected loss fails the session and is reported as
    /// `ConnectionLost` on the notice channel.
    pub fn spawn(self, sinks: ViewerSinks, config: &TransportConfig) -> JoinHandle<()> {
        let heartbeat = config.heartbeat_interval;
        tokio::spawn(async move {
            let Self {
                mut reader,
                mut writer,
                host,
                ..
            } = self;

            match run(&mut reader, &mut writer, &sinks, heartbeat).await {
                None => {
                    writer.close().await;
                    tracing::debug!(host = %host, "Viewer connection closed");
                }
                Some(reason) => {
                    tracing::warn!(host = %host, reason = %reason, "Connection to host lost");
                    if sinks.registry.fail(&sinks.handle, &reason) {
                        let _ = sinks.notices.send(ControlEvent::SessionFailed {
                            live_match_id: sinks.handle.live_match_id().to_string(),
                            error: Error::ConnectionLost(reason),
                        });
                    }
                }
            }
        })
    }
}

/// Returns `Some(reason)` if the link was lost, `None` on cancellation
async fn run(
    reader: &mut PacketReader<OwnedReadHalf>,
    writer: &mut PacketWriter<OwnedWriteHalf>,
    sinks: &ViewerSinks,
    heartbeat: std::time::Duration,
) -> Option<String> {
    let cancel = sinks.handle.cancel_token().clone();

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let packet = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = ticker.tick() => {
                if let Err(e) = writer.send(&Packet::Heartbeat).await {
                    return Some(e.to_string());
                }
                continue;
            }
            packet = reader.next() => packet,
        };

        let packet = match packet {
            Ok(Some(packet)) => packet,
            Ok(None) => return Some("connection closed by host".into()),
            Err(e) => return Some(e.to_string()),
        };

        sinks.registry.touch_peer(&sinks.handle, sinks.host_peer);

        match packet {
            Packet::Event(event) => {
                // Bounded: a stalled consumer backs up into the socket
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    sent = sinks.events.send(event) => {
                        if sent.is_err() {
                            tracing::trace!("Event delivery task gone, event dropped");
                        }
                    }
                }
            }
            Packet::Frame(frame) => {
                sinks.frames.offer(frame);
            }
            Packet::Heartbeat => {}
            Packet::Bye => return Some("host ended the session".into()),
            other => {
                return Some(ProtocolError::UnexpectedPacket(other.name()).to_string());
            }
        }
    }
}
