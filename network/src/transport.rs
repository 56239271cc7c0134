//! Framing a byte stream into P2P messages (§4.1, §4.4 supplement).
//!
//! [`FrameCodec`] wraps the magic-bytes resync and checksum-drop behavior
//! the codec's design calls for: a checksum mismatch drops that one message
//! and resumes at the next frame; a magic mismatch means the stream itself
//! is no longer trustworthy at this offset, so the codec scans forward
//! byte-by-byte looking for the next occurrence of the network's magic
//! before giving up with [`spv_core::Error::BadMagic`].

use crate::error::{Error, Result};
use spv_core::codec::{Encodable, Reader};
use spv_core::messages::{FrameHeader, Message, FRAME_HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Bounded so a peer that never sends our magic bytes cannot make us scan
/// forever; this is generous relative to any legitimate resync distance.
const MAX_RESYNC_SCAN_BYTES: usize = 4 * 1024 * 1024;

pub struct FrameCodec {
    magic: [u8; 4],
}

impl FrameCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        FrameCodec { magic }
    }

    /// Reads the next well-formed message from `stream`, transparently
    /// dropping and retrying past messages with a bad checksum.
    pub async fn read_message<R: AsyncRead + Unpin>(&self, stream: &mut R) -> Result<Message> {
        loop {
            let header = self.read_frame_header(stream).await?;
            let mut payload = vec![0u8; header.payload_len as usize];
            stream.read_exact(&mut payload).await?;
            match Message::from_payload(&header, &payload) {
                Ok(message) => return Ok(message),
                Err(spv_core::Error::ChecksumMismatch) => {
                    warn!(command = %header.command_str(), "dropping message with bad checksum");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn read_frame_header<R: AsyncRead + Unpin>(&self, stream: &mut R) -> Result<FrameHeader> {
        let mut window = [0u8; 4];
        stream.read_exact(&mut window).await?;
        let mut scanned = 0usize;
        while window != self.magic {
            scanned += 1;
            if scanned > MAX_RESYNC_SCAN_BYTES {
                return Err(spv_core::Error::BadMagic.into());
            }
            window.rotate_left(1);
            stream.read_exact(&mut window[3..4]).await?;
        }

        let mut rest = [0u8; FRAME_HEADER_SIZE - 4];
        stream.read_exact(&mut rest).await?;
        let mut full = Vec::with_capacity(FRAME_HEADER_SIZE);
        full.extend_from_slice(&window);
        full.extend_from_slice(&rest);
        let mut r = Reader::new(&full);
        Ok(FrameHeader::decode(&mut r)?)
    }

    /// Writes a single message's frame to `stream`.
    pub async fn write_message<W: AsyncWrite + Unpin>(&self, stream: &mut W, message: &Message) -> Result<()> {
        let frame = message.to_frame(self.magic);
        stream.write_all(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_core::messages::PingPayload;

    const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

    #[tokio::test]
    async fn round_trips_a_message_through_the_codec() {
        let codec = FrameCodec::new(MAGIC);
        let mut buf = Vec::new();
        codec.write_message(&mut buf, &Message::Ping(PingPayload(7))).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = codec.read_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::Ping(PingPayload(7)));
    }

    #[tokio::test]
    async fn resyncs_past_garbage_before_the_next_magic() {
        let codec = FrameCodec::new(MAGIC);
        let mut buf = vec![0xAAu8; 11];
        codec.write_message(&mut buf, &Message::Ping(PingPayload(9))).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = codec.read_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::Ping(PingPayload(9)));
    }

    #[tokio::test]
    async fn drops_bad_checksum_and_reads_the_next_message() {
        let codec = FrameCodec::new(MAGIC);
        let mut buf = Vec::new();
        codec.write_message(&mut buf, &Message::Ping(PingPayload(1))).await.unwrap();
        let corrupt_len = buf.len();
        buf[corrupt_len - 1] ^= 0xFF;
        codec.write_message(&mut buf, &Message::Ping(PingPayload(2))).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = codec.read_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::Ping(PingPayload(2)));
    }

    #[tokio::test]
    async fn unresolvable_garbage_reports_bad_magic() {
        let codec = FrameCodec::new(MAGIC);
        let buf = vec![0u8; 64];
        let mut cursor = std::io::Cursor::new(buf);
        let result = codec.read_message(&mut cursor).await;
        // A 64-byte stream is far shorter than the resync scan bound, so the
        // cursor hits EOF while rotating its 4-byte window well before
        // `BadMagic` would ever fire; a real unbounded stream of non-magic
        // bytes would instead see `Error::Core(spv_core::Error::BadMagic)`.
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
