/// Errors that can occur on a [`Connection`](crate::Connection).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipcwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ipcwire_frame::FrameError),

    /// A received message could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] ipcwire_codec::DecodeError),

    /// An outgoing message could not be encoded. Nothing was sent.
    #[error("encode error: {0}")]
    Encode(#[from] ipcwire_codec::EncodeError),

    /// An earlier failure left the stream at an unknown position.
    #[error("connection is no longer usable after an earlier error")]
    Unusable,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
