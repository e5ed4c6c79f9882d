//! LAN discovery
//!
//! The host answers probes on a well-known UDP port; a viewer probes the
//! segment (broadcast by default) until the host serving its live match
//! answers or the discovery timeout elapses.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{Announcement, Datagram};

use super::config::TransportConfig;

/// Receive one well-formed datagram, skipping foreign traffic
async fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> std::io::Result<(Datagram, SocketAddr)> {
    loop {
        let (len, src) = socket.recv_from(buf).await?;
        match Datagram::decode(&buf[..len]) {
            Some(datagram) => return Ok((datagram, src)),
            None => tracing::trace!(from = %src, len = len, "Ignoring foreign datagram"),
        }
    }
}

/// Host-side discovery endpoint
pub struct DiscoveryResponder {
    socket: UdpSocket,
    announcement: Announcement,
}

impl DiscoveryResponder {
    /// Bind the discovery port for `announcement`
    pub async fn bind(addr: SocketAddr, announcement: Announcement) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(
            addr = %socket.local_addr()?,
            live_match_id = %announcement.live_match_id,
            port = announcement.port,
            "Discovery responder listening"
        );

        Ok(Self {
            socket,
            announcement,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer probes until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = self.run() => {}
            }
            tracing::debug!("Discovery responder stopped");
        })
    }

    async fn run(&self) {
        let reply = Datagram::Announce(self.announcement.clone()).encode();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (datagram, src) = match recv_datagram(&self.socket, &mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP unreachable from an earlier reply surfaces here on some platforms
                    tracing::debug!(error = %e, "Discovery receive failed");
                    continue;
                }
            };

            let Datagram::Probe(probe) = datagram else {
                continue;
            };
            if probe.live_match_id != self.announcement.live_match_id {
                tracing::trace!(from = %src, wanted = %probe.live_match_id, "Probe for another match");
                continue;
            }

            match self.socket.send_to(&reply, src).await {
                Ok(_) => tracing::debug!(viewer = %src, "Answered discovery probe"),
                Err(e) => tracing::debug!(viewer = %src, error = %e, "Failed to answer probe"),
            }
        }
    }
}

/// Find the host serving `live_match_id`
///
/// Returns the address of the host's data channel. Fails with
/// `DiscoveryTimeout` once `discovery_timeout` elapses and with
/// `SessionCancelled` if `cancel` fires first.
pub async fn discover(
    live_match_id: &str,
    config: &TransportConfig,
    cancel: &CancellationToken,
) -> Result<SocketAddr> {
    let target = config.discovery_target;
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    if target.is_ipv4() {
        socket.set_broadcast(true)?;
    }

    let probe = Datagram::probe(live_match_id).encode();

    let search = async {
        let mut ticker = tokio::time::interval(config.probe_interval);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = socket.send_to(&probe, target).await {
                        tracing::debug!(target = %target, error = %e, "Probe send failed");
                    }
                }
                received = recv_datagram(&socket, &mut buf) => match received {
                    Ok((Datagram::Announce(announce), src)) if announce.live_match_id == live_match_id => {
                        return SocketAddr::new(src.ip(), announce.port);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "Discovery receive failed"),
                },
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::SessionCancelled),
        found = tokio::time::timeout(config.discovery_timeout, search) => match found {
            Ok(addr) => {
                tracing::info!(live_match_id = live_match_id, host = %addr, "Host discovered");
                Ok(addr)
            }
            Err(_) => {
                tracing::info!(live_match_id = live_match_id, "Discovery timed out");
                Err(Error::DiscoveryTimeout(live_match_id.to_string()))
            }
        },
    }
}
