/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4957 \"IW\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame declares more handles than the configured maximum.
    #[error("too many handles ({count}, max {max})")]
    TooManyHandles { count: usize, max: usize },

    /// The header promised handles that never arrived on the side channel.
    #[error("frame declared {expected} handles but only {received} arrived")]
    MissingHandles { expected: usize, received: usize },

    /// Handles arrived that no frame declared.
    #[error("{surplus} undeclared handles arrived with a frame declaring {declared}")]
    UnexpectedHandles { declared: usize, surplus: usize },

    /// The peer stopped accepting data within the write timeout.
    #[error("write timed out after {written} of {total} bytes")]
    Timeout { written: usize, total: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport setup failed (timeouts, cloning).
    #[error("transport error: {0}")]
    Transport(#[from] ipcwire_transport::TransportError),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
