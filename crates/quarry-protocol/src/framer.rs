use crate::codec::CodecError;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a single wire frame can carry (2^24 - 1).
pub const MAX_FRAME_PAYLOAD: usize = 0xff_ffff;
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 64 * 1024 * 1024;
const HEADER_LEN: usize = 4;

/// Fatal channel failure. The connection cannot be used after one of these.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet sequence mismatch: expected {expected}, got {actual}")]
    OutOfOrder { expected: u8, actual: u8 },
    #[error("packet of {size} bytes exceeds max_allowed_packet ({limit})")]
    PacketTooLarge { size: usize, limit: usize },
    #[error("cannot encode outgoing packet: {0}")]
    Encode(#[from] CodecError),
}

/// Splits and reassembles logical packets into `[len:3][seq:1][payload]`
/// frames while tracking the sequence id of the current exchange.
#[derive(Debug, Clone)]
pub struct PacketFramer {
    sequence_id: u8,
    max_allowed_packet: usize,
}

impl PacketFramer {
    pub fn new(max_allowed_packet: usize) -> Self {
        Self {
            sequence_id: 0,
            max_allowed_packet,
        }
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Starts a new exchange; the next frame in either direction is 0.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub async fn read_packet<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Bytes, TransportError> {
        let mut payload = BytesMut::new();
        loop {
            let mut header = [0u8; HEADER_LEN];
            read_exact(reader, &mut header).await?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            let seq = header[3];
            if seq != self.sequence_id {
                return Err(TransportError::OutOfOrder {
                    expected: self.sequence_id,
                    actual: seq,
                });
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let size = payload.len() + len;
            if size > self.max_allowed_packet {
                return Err(TransportError::PacketTooLarge {
                    size,
                    limit: self.max_allowed_packet,
                });
            }
            let start = payload.len();
            payload.resize(size, 0);
            read_exact(reader, &mut payload[start..]).await?;
            if len < MAX_FRAME_PAYLOAD {
                break;
            }
        }
        Ok(payload.freeze())
    }

    /// Writes `payload` as one or more frames and flushes once after the last.
    pub async fn write_packet<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frames = payload.len() / MAX_FRAME_PAYLOAD + 1;
        let mut buf = BytesMut::with_capacity(payload.len() + frames * HEADER_LEN);
        let mut offset = 0;
        loop {
            let end = usize::min(offset + MAX_FRAME_PAYLOAD, payload.len());
            let chunk = &payload[offset..end];
            buf.put_uint_le(chunk.len() as u64, 3);
            buf.put_u8(self.sequence_id);
            buf.extend_from_slice(chunk);
            self.sequence_id = self.sequence_id.wrapping_add(1);
            offset = end;
            // a chunk of exactly MAX_FRAME_PAYLOAD must be followed by another frame,
            // even an empty one
            if chunk.len() < MAX_FRAME_PAYLOAD {
                break;
            }
        }
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALLOWED_PACKET)
    }
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(err) => Err(TransportError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_headers(wire: &[u8]) -> Vec<(usize, u8)> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < wire.len() {
            let len = u32::from_le_bytes([wire[pos], wire[pos + 1], wire[pos + 2], 0]) as usize;
            headers.push((len, wire[pos + 3]));
            pos += HEADER_LEN + len;
        }
        headers
    }

    #[tokio::test]
    async fn small_packet_single_frame() {
        let mut framer = PacketFramer::default();
        let mut wire = Vec::new();
        framer.write_packet(&mut wire, b"abc").await.expect("write");
        assert_eq!(wire, vec![3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(framer.sequence_id(), 1);
    }

    #[tokio::test]
    async fn empty_packet_is_one_empty_frame() {
        let mut framer = PacketFramer::default();
        let mut wire = Vec::new();
        framer.write_packet(&mut wire, b"").await.expect("write");
        assert_eq!(wire, vec![0, 0, 0, 0]);

        let mut reader = PacketFramer::default();
        let payload = reader.read_packet(&mut wire.as_slice()).await.expect("read");
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn exact_max_payload_gets_trailing_empty_frame() {
        let payload = vec![7u8; MAX_FRAME_PAYLOAD];
        let mut framer = PacketFramer::default();
        let mut wire = Vec::new();
        framer.write_packet(&mut wire, &payload).await.expect("write");
        assert_eq!(frame_headers(&wire), vec![(MAX_FRAME_PAYLOAD, 0), (0, 1)]);

        let mut reader = PacketFramer::default();
        let got = reader.read_packet(&mut wire.as_slice()).await.expect("read");
        assert_eq!(got.len(), MAX_FRAME_PAYLOAD);
        assert_eq!(reader.sequence_id(), 2);
    }

    #[tokio::test]
    async fn large_payload_is_split_and_reassembled() {
        let payload: Vec<u8> = (0..MAX_FRAME_PAYLOAD + 10).map(|i| (i % 251) as u8).collect();
        let mut framer = PacketFramer::default();
        let mut wire = Vec::new();
        framer.write_packet(&mut wire, &payload).await.expect("write");
        assert_eq!(frame_headers(&wire), vec![(MAX_FRAME_PAYLOAD, 0), (10, 1)]);

        let mut reader = PacketFramer::default();
        let got = reader.read_packet(&mut wire.as_slice()).await.expect("read");
        assert_eq!(&got[..], &payload[..]);
    }

    #[tokio::test]
    async fn sequence_mismatch_is_fatal() {
        let wire = vec![1, 0, 0, 5, 0xaa];
        let mut reader = PacketFramer::default();
        let err = reader.read_packet(&mut wire.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::OutOfOrder {
                expected: 0,
                actual: 5
            }
        ));
    }

    #[tokio::test]
    async fn closed_stream_reports_closed() {
        let wire: Vec<u8> = vec![10, 0, 0, 0, 1, 2];
        let mut reader = PacketFramer::default();
        let err = reader.read_packet(&mut wire.as_slice()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));

        let empty: Vec<u8> = Vec::new();
        let err = reader.read_packet(&mut empty.as_slice()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn oversized_packet_rejected() {
        let wire = vec![8, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
        let mut reader = PacketFramer::new(4);
        let err = reader.read_packet(&mut wire.as_slice()).await.unwrap_err();
        assert!(matches!(err, TransportError::PacketTooLarge { size: 8, limit: 4 }));
    }
}
