//! Typed message decoding and encoding for ipcwire.
//!
//! A message is decoded by naming its type: [`Decoder::decode::<T>()`] runs
//! `T`'s [`Decode`] impl, which reads scalars straight from the transport
//! and recurses into element types for containers, optionals, tuples, and
//! tagged unions. Which strategy applies to a type is settled at compile
//! time; there is no runtime type registry.
//!
//! The bytes come from another process and are not trusted. Every length
//! prefix passes the bounds guard ([`bounds`]) before it sizes an
//! allocation, every discriminant and enumeration value is validated, and
//! any failure is reported as a [`DecodeError`] rather than a panic.
//!
//! ```
//! use std::collections::HashMap;
//!
//! let mut scores = HashMap::new();
//! scores.insert("ada".to_string(), 3u32);
//! let message = ipcwire_codec::encode_message(&(7u16, scores.clone(), Some(true))).unwrap();
//!
//! let mut transport = message.into_transport();
//! let decoded: (u16, HashMap<String, u32>, Option<bool>) =
//!     ipcwire_codec::decode(&mut transport).unwrap();
//! assert_eq!(decoded, (7, scores, Some(true)));
//! ```

pub mod bounds;
pub mod config;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod extended;
pub mod queue;
pub mod scalar;
pub mod variant;

pub use config::{DecoderConfig, DEFAULT_MAX_ALLOCATION, DEFAULT_MAX_LENGTH};
pub use decoder::{decode, decode_message, Decode, Decoder};
pub use encoder::{encode_message, Encode, Encoder, MessageBuffer};
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult, QueueError};
pub use extended::{Dictionary, TransferredFile};
pub use queue::{QueueElement, SharedQueue};

// Used by code generated with `ipc_enum!` and `ipc_variant!`.
pub use ipcwire_transport::{MemoryTransport, Transport};
