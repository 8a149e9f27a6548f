use ipcwire_transport::TransportError;

/// Errors that can occur while decoding a message.
///
/// Any of these leaves the stream at an unknown position; the connection
/// the bytes came from must not be reused.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The transport failed or ended early.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// A length prefix was rejected by the bounds guard.
    #[error("length {length} exceeds limit {limit}")]
    SizeLimitExceeded { length: u64, limit: u64 },

    /// Capacity for an accepted length could not be reserved.
    #[error("failed to reserve capacity for {length} elements")]
    OutOfMemory { length: usize },

    /// The bytes were read but do not form a valid value.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// A tagged-union discriminant names no alternative.
    #[error("discriminant {index} out of range for {type_name} ({alternatives} alternatives)")]
    MalformedDiscriminant {
        type_name: &'static str,
        index: u64,
        alternatives: usize,
    },

    /// An enumeration value matches no declared enumerator.
    #[error("{value} is not a declared {type_name} value")]
    InvalidEnumValue {
        type_name: &'static str,
        value: String,
    },

    /// A handle was expected at this position but none was delivered.
    #[error("expected a transferred handle but none was delivered")]
    MissingHandle,

    /// A handle was delivered but cannot back the decoded value.
    #[error("invalid transferred handle: {0}")]
    InvalidHandle(String),

    /// A complete message left bytes or handles unconsumed.
    #[error("message has {bytes} unread bytes and {handles} untaken handles")]
    TrailingData { bytes: usize, handles: usize },
}

impl DecodeError {
    pub(crate) fn malformed(what: &'static str, reason: impl ToString) -> Self {
        DecodeError::Malformed {
            what,
            reason: reason.to_string(),
        }
    }

    /// True when the failure came from the transport rather than the content.
    pub fn is_transport(&self) -> bool {
        matches!(self, DecodeError::Transport(_))
    }
}

impl From<TransportError> for DecodeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoHandle => DecodeError::MissingHandle,
            other => DecodeError::Transport(other),
        }
    }
}

/// Errors that can occur while encoding a message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A length does not fit its prefix.
    #[error("length {length} does not fit a {width}-bit length prefix")]
    LengthOverflow { length: usize, width: u32 },

    /// A union's position does not fit its declared index type.
    #[error("discriminant {index} does not fit the index type of {type_name}")]
    DiscriminantOverflow { type_name: &'static str, index: usize },

    /// A handle could not be duplicated into the message.
    #[error("failed to duplicate handle: {0}")]
    Handle(#[source] std::io::Error),

    /// A structured document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from creating or attaching a shared queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Sizing, mapping, or inspecting the backing descriptor failed.
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing memory does not hold a queue of this type.
    #[error("queue layout mismatch: {0}")]
    Layout(String),
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
pub type EncodeResult<T> = std::result::Result<T, EncodeError>;
