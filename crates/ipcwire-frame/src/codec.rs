use std::os::fd::OwnedFd;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipcwire_transport::MemoryTransport;

use crate::error::{FrameError, Result};

/// Frame header: magic (2) + length (4) + handle count (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "IW" (0x49 0x57).
pub const MAGIC: [u8; 2] = [0x49, 0x57];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum handles per frame.
pub const DEFAULT_MAX_HANDLES: usize = 64;

/// One complete message: encoded bytes plus the handles sent with it.
#[derive(Debug, Default)]
pub struct Frame {
    /// The encoded message.
    pub payload: Bytes,
    /// Transferred handles, in the order the encoder attached them.
    pub handles: Vec<OwnedFd>,
}

impl Frame {
    /// Create a frame without handles.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            handles: Vec::new(),
        }
    }

    /// Create a frame carrying `handles`.
    pub fn with_handles(payload: impl Into<Bytes>, handles: Vec<OwnedFd>) -> Self {
        Self {
            payload: payload.into(),
            handles,
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Turn the frame into a transport the decoder can read from.
    pub fn into_transport(self) -> MemoryTransport {
        MemoryTransport::with_handles(self.payload, self.handles)
    }
}

/// A frame whose bytes are complete but whose handles are not yet collected.
#[derive(Debug)]
pub struct PendingFrame {
    pub payload: Bytes,
    pub handle_count: usize,
}

/// Encode a frame header and payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Handle count │ Payload         │
/// │ 0x49 0x57    │ (4B LE)   │ (2B LE)      │ (Length bytes)  │
/// │ "IW"         │           │              │                 │
/// └──────────────┴───────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], handle_count: usize, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    if handle_count > u16::MAX as usize {
        return Err(FrameError::TooManyHandles {
            count: handle_count,
            max: u16::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u16_le(handle_count as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Limits are checked as soon as the header is available, before waiting
/// for the payload.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<PendingFrame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let handle_count = u16::from_le_bytes([src[6], src[7]]) as usize;

    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }
    if handle_count > config.max_handles {
        return Err(FrameError::TooManyHandles {
            count: handle_count,
            max: config.max_handles,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(PendingFrame {
        payload,
        handle_count,
    }))
}

/// Most handles that may belong to frames whose bytes are already in `src`.
///
/// Handles travel with the first byte of their frame, so anything received
/// beyond this budget was never declared by any frame. A header that is only
/// partly buffered may still declare up to `max_handles`.
pub fn buffered_handle_budget(src: &[u8], config: &FrameConfig) -> usize {
    let mut budget = 0usize;
    let mut rest = src;
    while !rest.is_empty() {
        if rest.len() < HEADER_SIZE {
            return budget.saturating_add(config.max_handles);
        }
        if rest[0..2] != MAGIC {
            break;
        }
        let payload_len = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]) as usize;
        let handle_count = u16::from_le_bytes([rest[6], rest[7]]) as usize;
        budget = budget.saturating_add(handle_count.min(config.max_handles));

        let frame_len = HEADER_SIZE.saturating_add(payload_len);
        if frame_len >= rest.len() {
            break;
        }
        rest = &rest[frame_len..];
    }
    budget
}

/// Configuration for framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Maximum handles per frame. Default: 64.
    pub max_handles: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_handles: DEFAULT_MAX_HANDLES,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
