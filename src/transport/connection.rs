//! Packet I/O over a data channel
//!
//! Both ends split their `TcpStream` into a reader half, driven by the
//! connection's read loop, and a writer half owned by whichever task sends.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::protocol::{Packet, PacketCodec};

/// Bound on the best-effort `Bye` written while closing
pub const BYE_TIMEOUT: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Buffered packet reader
///
/// [`next`](Self::next) is cancel-safe: partially received packets stay in
/// the buffer, so it may be raced in `tokio::select!`.
pub struct PacketReader<R> {
    inner: R,
    codec: PacketCodec,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R, codec: PacketCodec) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read the next packet; `Ok(None)` on a clean close between packets
    pub async fn next(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(packet));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated("packet").into());
            }
        }
    }
}

/// Packet writer reusing one encode buffer
pub struct PacketWriter<W> {
    inner: W,
    codec: PacketCodec,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W, codec: PacketCodec) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.buf.clear();
        self.codec.encode(packet, &mut self.buf)?;
        self.inner.write_all(&self.buf).await?;
        Ok(())
    }

    /// Send `Bye` and shut the write half down, ignoring failures
    pub async fn close(&mut self) {
        let goodbye = async {
            let _ = self.send(&Packet::Bye).await;
            let _ = self.inner.shutdown().await;
        };
        let _ = tokio::time::timeout(BYE_TIMEOUT, goodbye).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Event;
    use serde_json::json;

    #[tokio::test]
    async fn test_packets_survive_split_reads() {
        let (client, server) = tokio::io::duplex(7);
        let codec = PacketCodec::default();
        let mut writer = PacketWriter::new(client, codec);
        let mut reader = PacketReader::new(server, codec);

        let event = Event::new("LM1").with("type", json!("goal"));
        let send = async {
            writer.send(&Packet::Event(event.clone())).await.unwrap();
            writer.send(&Packet::Heartbeat).await.unwrap();
            writer.close().await;
        };
        let recv = async {
            let mut got = Vec::new();
            while let Some(p) = reader.next().await.unwrap() {
                got.push(p);
            }
            got
        };

        let ((), got) = tokio::join!(send, recv);
        assert_eq!(got, vec![Packet::Event(event), Packet::Heartbeat, Packet::Bye]);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(server, PacketCodec::default());

        // Header announces 10 payload bytes, only 2 follow
        client.write_all(&[0x10, 0, 0, 0, 10, b'{', b'}']).await.unwrap();
        drop(client);

        assert!(reader.next().await.is_err());
    }
}
