use crate::framer::{PacketFramer, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// A packet-level view of one client connection.
#[async_trait]
pub trait Channel: Send {
    /// Reads the next logical packet, reassembling split frames.
    async fn fetch_one_packet(&mut self) -> Result<Bytes, TransportError>;

    async fn send_and_flush(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Host part of the peer address, as used for account matching.
    fn remote_address(&self) -> &str;

    /// Called before reading each client command.
    fn reset_sequence(&mut self);
}

pub struct StreamChannel<S> {
    stream: S,
    framer: PacketFramer,
    remote_host: String,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, remote_host: impl Into<String>, max_allowed_packet: usize) -> Self {
        Self {
            stream,
            framer: PacketFramer::new(max_allowed_packet),
            remote_host: remote_host.into(),
        }
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn fetch_one_packet(&mut self) -> Result<Bytes, TransportError> {
        self.framer.read_packet(&mut self.stream).await
    }

    async fn send_and_flush(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.framer.write_packet(&mut self.stream, payload).await
    }

    fn remote_address(&self) -> &str {
        &self.remote_host
    }

    fn reset_sequence(&mut self) {
        self.framer.reset_sequence();
    }
}
