//! Host data channel listener
//!
//! Handles the TCP accept loop and runs one reader and one writer task per
//! admitted viewer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::control::ControlEvent;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{Handshake, HandshakeStep, Packet, PacketCodec, RejectReason};
use crate::registry::{RegistryError, SessionRegistry};
use crate::session::{OutboundQueues, PeerId, PeerOutbound, SessionHandle};
use crate::stats::SessionCounters;

use super::config::TransportConfig;
use super::connection::{PacketReader, PacketWriter};

/// Everything a viewer connection task needs
struct HostContext {
    config: TransportConfig,
    codec: PacketCodec,
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
    counters: Arc<SessionCounters>,
    notices: broadcast::Sender<ControlEvent>,
}

/// Why a viewer's read loop ended
enum PeerExit {
    /// Peer removed or session ending
    Closed,
    /// Viewer said goodbye
    Bye,
    /// Connection dropped or sent garbage
    Lost(String),
}

/// Data channel listener for one host session
pub struct HostListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<HostContext>,
}

impl HostListener {
    /// Bind the data channel for `handle`'s session
    pub async fn bind(
        config: TransportConfig,
        registry: Arc<SessionRegistry>,
        handle: SessionHandle,
        counters: Arc<SessionCounters>,
        notices: broadcast::Sender<ControlEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            live_match_id = %handle.live_match_id(),
            "Host listening"
        );

        Ok(Self {
            listener,
            local_addr,
            ctx: Arc::new(HostContext {
                codec: PacketCodec::new(config.max_packet_size),
                config,
                registry,
                handle,
                counters,
                notices,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept viewers until the session is cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cancel = self.ctx.handle.cancel_token().clone();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.accept_loop() => {}
            }
            tracing::debug!(addr = %self.local_addr, "Host listener stopped");
        })
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!(peer = %peer_addr, "New connection");

        // Configure socket
        if self.ctx.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if let Err(e) = serve_viewer(ctx, socket, peer_addr).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }
            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }
}

async fn serve_viewer(ctx: Arc<HostContext>, socket: TcpStream, peer_addr: SocketAddr) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = PacketReader::new(read_half, ctx.codec);
    let mut writer = PacketWriter::new(write_half, ctx.codec);
    let session_cancel = ctx.handle.cancel_token().clone();

    let hello = tokio::select! {
        _ = session_cancel.cancelled() => return Ok(()),
        hello = tokio::time::timeout(ctx.config.connect_timeout, reader.next()) => hello,
    };
    let hello = match hello {
        Ok(Ok(Some(packet))) => packet,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            tracing::debug!(peer = %peer_addr, "Join handshake timed out");
            return Ok(());
        }
    };

    let mut handshake = Handshake::host(ctx.handle.info().clone());
    let admission = ctx.registry.admission(&ctx.handle, ctx.config.max_viewers);
    let (accept, accepted) = match handshake.process(hello, admission)? {
        HandshakeStep::Reply { packet, accepted } => (packet, accepted),
        _ => return Err(ProtocolError::UnexpectedPacket("handshake").into()),
    };

    if !accepted {
        tracing::info!(peer = %peer_addr, answer = ?accept, "Viewer rejected");
        writer.send(&accept).await?;
        return Ok(());
    }

    let (outbound, queues) =
        PeerOutbound::channel(ctx.config.event_queue_depth, ctx.config.frame_queue_depth);

    // Registered before Accept goes out so nothing published afterwards is missed
    let (peer_id, close) =
        match ctx.registry.add_peer(&ctx.handle, peer_addr, Some(outbound), ctx.config.max_viewers) {
            Ok(added) => added,
            Err(e) => {
                let reason = match e {
                    RegistryError::PeerLimit(_) => RejectReason::Full,
                    _ => RejectReason::Stopping,
                };
                tracing::info!(peer = %peer_addr, reason = %reason, "Viewer rejected");
                writer
                    .send(&Packet::Reject {
                        reason,
                        message: reason.to_string(),
                    })
                    .await?;
                return Ok(());
            }
        };

    if let Err(e) = writer.send(&accept).await {
        ctx.registry.remove_peer(&ctx.handle, peer_id);
        return Err(e);
    }

    ctx.counters.peer_joined();
    let _ = ctx.notices.send(ControlEvent::PeerJoined {
        peer_id,
        addr: peer_addr,
    });

    let writer_task = tokio::spawn(write_loop(writer, queues, close.clone()));
    let exit = read_loop(&ctx, &mut reader, peer_id, &close).await;

    close.cancel();
    let _ = writer_task.await;

    if session_cancel.is_cancelled() {
        return Ok(());
    }

    // Still registered after a close means our own write failed
    let removed = ctx.registry.remove_peer(&ctx.handle, peer_id).is_some();
    let lost = match exit {
        PeerExit::Bye => None,
        PeerExit::Lost(reason) => Some(reason),
        PeerExit::Closed if removed => Some("write failed".to_string()),
        PeerExit::Closed => None,
    };
    if let Some(reason) = lost {
        tracing::warn!(peer_id = peer_id, peer = %peer_addr, reason = %reason, "Viewer connection lost");
        if removed {
            ctx.counters.peers_lost(1);
        }
    }

    let _ = ctx.notices.send(ControlEvent::PeerLeft {
        peer_id,
        addr: peer_addr,
    });
    Ok(())
}

async fn read_loop<R>(
    ctx: &HostContext,
    reader: &mut PacketReader<R>,
    peer_id: PeerId,
    close: &CancellationToken,
) -> PeerExit
where
    R: AsyncRead + Unpin,
{
    loop {
        let packet = tokio::select! {
            _ = close.cancelled() => return PeerExit::Closed,
            packet = reader.next() => packet,
        };

        match packet {
            Ok(Some(Packet::Bye)) => return PeerExit::Bye,
            Ok(Some(Packet::Heartbeat)) => ctx.registry.touch_peer(&ctx.handle, peer_id),
            Ok(Some(other)) => {
                tracing::trace!(peer_id = peer_id, packet = other.name(), "Ignoring packet from viewer");
                ctx.registry.touch_peer(&ctx.handle, peer_id);
            }
            Ok(None) => return PeerExit::Lost("connection closed".into()),
            Err(e) => return PeerExit::Lost(e.to_string()),
        }
    }
}

/// Drain a viewer's outbound queues onto the socket
///
/// Ends when the peer is closed or a write fails; dropping the queues makes
/// the next fan-out see the peer as closed.
async fn write_loop<W>(mut writer: PacketWriter<W>, mut queues: OutboundQueues, close: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let packet = tokio::select! {
            biased;
            _ = close.cancelled() => {
                writer.close().await;
                return;
            }
            Some(event) = queues.events.recv() => Packet::Event((*event).clone()),
            Some(frame) = queues.frames.recv() => Packet::Frame(frame),
            else => return,
        };

        match writer.send(&packet).await {
            Ok(()) => {}
            // Rejected by the encoder before any byte hit the socket
            Err(Error::Protocol(ProtocolError::PacketTooLarge { size, max })) => {
                tracing::warn!(packet = packet.name(), size = size, max = max, "Packet too large, skipped");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Write to viewer failed");
                close.cancel();
                return;
            }
        }
    }
}
