//! Framing codec (spec §4.1).
//!
//! ```text
//! [length:u32][version:u8][type:u8][flags:u8][payload: length-3 bytes]
//! ```
//!
//! `length` counts the version/type/flags header plus payload, so it is
//! always at least 3. Compression is transparent to callers above this
//! module: `Frame::decode` always hands back an uncompressed payload with
//! the compressed flag cleared.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: u8 = 2;
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;
pub const COMPRESSION_THRESHOLD: usize = 512;

pub const FLAG_COMPRESSED: u8 = 0x01;
pub const FLAG_ENCRYPTED: u8 = 0x02;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds maximum size of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge,
    #[error("frame length must be at least 3")]
    InvalidFrameLength,
    #[error("compressed payload declares an invalid uncompressed length")]
    InvalidCompressedLen,
    #[error("LZ4 decompression failed")]
    DecompressionFailed,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FrameResult<T> = Result<T, FrameError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(version: u8, msg_type: u8, payload: Vec<u8>) -> Self {
        Self {
            version,
            msg_type,
            flags: 0,
            payload,
        }
    }

    fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Encode this frame to bytes, compressing the payload when it is
    /// profitable and the peer can understand compressed frames.
    ///
    /// `peer_version` is the protocol version the peer advertised during its
    /// handshake; `None` means "peer version unknown, never compress".
    pub fn encode(&self, peer_version: Option<u8>) -> Vec<u8> {
        let should_compress = !self.is_compressed()
            && self.payload.len() >= COMPRESSION_THRESHOLD
            && matches!(peer_version, Some(v) if (2..=PROTOCOL_VERSION).contains(&v));

        let (flags, payload) = if should_compress {
            match compress_payload(&self.payload) {
                Some(compressed) => (self.flags | FLAG_COMPRESSED, compressed),
                None => (self.flags, self.payload.clone()),
            }
        } else {
            (self.flags, self.payload.clone())
        };

        let length = 3 + payload.len() as u32;
        let mut out = Vec::with_capacity(4 + length as usize);
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.version);
        out.push(self.msg_type);
        out.push(flags);
        out.extend_from_slice(&payload);
        out
    }

    /// Write this frame directly to an async writer, flushing once the
    /// whole frame has been written. Callers hold the connection's write
    /// mutex across this call (spec §4.6) so no interleaving is possible.
    pub async fn write_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        peer_version: Option<u8>,
    ) -> FrameResult<()> {
        let bytes = self.encode(peer_version);
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame from an async reader, transparently decompressing it.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> FrameResult<Self> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let length = BigEndian::read_u32(&len_buf);

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge);
        }
        if length < 3 {
            return Err(FrameError::InvalidFrameLength);
        }

        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;
        let version = header[0];
        let msg_type = header[1];
        let flags = header[2];

        let payload_len = (length - 3) as usize;
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).await?;

        let (flags, payload) = if flags & FLAG_COMPRESSED != 0 {
            (flags & !FLAG_COMPRESSED, decompress_payload(&payload)?)
        } else {
            (flags, payload)
        };

        Ok(Frame {
            version,
            msg_type,
            flags,
            payload,
        })
    }

    /// Decode a complete, already-buffered frame (used by tests and by
    /// callers that already have the bytes for a single frame in hand).
    pub fn decode(mut bytes: &[u8]) -> FrameResult<Self> {
        if bytes.len() < 4 {
            return Err(FrameError::InvalidFrameLength);
        }
        let length = BigEndian::read_u32(&bytes[..4]);
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge);
        }
        if length < 3 {
            return Err(FrameError::InvalidFrameLength);
        }
        bytes = &bytes[4..];
        if bytes.len() < length as usize {
            return Err(FrameError::InvalidFrameLength);
        }
        let version = bytes[0];
        let msg_type = bytes[1];
        let flags = bytes[2];
        let payload = bytes[3..length as usize].to_vec();

        let (flags, payload) = if flags & FLAG_COMPRESSED != 0 {
            (flags & !FLAG_COMPRESSED, decompress_payload(&payload)?)
        } else {
            (flags, payload)
        };

        Ok(Frame {
            version,
            msg_type,
            flags,
            payload,
        })
    }
}

/// `[uncompressed_size:u32][LZ4 block]`. Returns `None` if compressing would
/// not actually shrink the frame, in which case the caller should send it
/// uncompressed.
fn compress_payload(payload: &[u8]) -> Option<Vec<u8>> {
    let block = lz4::block::compress(payload, None, false).ok()?;
    let total = 4 + block.len();
    if total >= payload.len() {
        return None;
    }
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&block);
    Some(out)
}

fn decompress_payload(payload: &[u8]) -> FrameResult<Vec<u8>> {
    if payload.len() < 4 {
        return Err(FrameError::InvalidCompressedLen);
    }
    let uncompressed_size = BigEndian::read_u32(&payload[..4]);
    if uncompressed_size > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidCompressedLen);
    }
    lz4::block::decompress(&payload[4..], Some(uncompressed_size as i32))
        .map_err(|_| FrameError::DecompressionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_uncompressed_frame() {
        let frame = Frame::new(PROTOCOL_VERSION, 0x10, vec![1, 2, 3]);
        let bytes = frame.encode(Some(PROTOCOL_VERSION));
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn compresses_large_repetitive_payload_and_round_trips() {
        let payload = vec![0x42u8; 4096];
        let frame = Frame::new(PROTOCOL_VERSION, 0x0A, payload.clone());
        let bytes = frame.encode(Some(PROTOCOL_VERSION));
        // Smaller on the wire than the naive uncompressed encoding.
        assert!(bytes.len() < 4 + 3 + payload.len());
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.flags & FLAG_COMPRESSED, 0);
    }

    #[test]
    fn does_not_compress_for_unknown_peer_version() {
        let payload = vec![0x42u8; 4096];
        let frame = Frame::new(PROTOCOL_VERSION, 0x0A, payload.clone());
        let bytes = frame.encode(None);
        assert_eq!(bytes.len(), 4 + 3 + payload.len());
    }

    #[test]
    fn does_not_compress_below_threshold() {
        let payload = vec![0x42u8; COMPRESSION_THRESHOLD - 1];
        let frame = Frame::new(PROTOCOL_VERSION, 0x0A, payload.clone());
        let bytes = frame.encode(Some(PROTOCOL_VERSION));
        assert_eq!(bytes.len(), 4 + 3 + payload.len());
    }

    #[test]
    fn rejects_oversized_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge));
    }

    #[test]
    fn rejects_undersized_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::InvalidFrameLength));
    }
}
