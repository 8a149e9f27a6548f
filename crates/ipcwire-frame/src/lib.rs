//! Message framing for ipcwire.
//!
//! One encoded message travels as one frame:
//! - A 2-byte magic number ("IW") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian count of transferred handles
//!
//! The handles ride as ancillary data on the frame's first bytes, so the
//! reader can hand the decoder a complete message: payload plus handles in
//! the order the encoder attached them.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, PendingFrame, DEFAULT_MAX_HANDLES,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
