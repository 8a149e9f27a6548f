//! Typed IPC messages over Unix domain sockets.
//!
//! This is the "just works" layer: bind a [`Listener`] or call
//! [`Connection::connect`], then `send` and `recv` any type that implements
//! [`Encode`] and [`Decode`]. File descriptors inside a message
//! ([`TransferredFile`], [`SharedQueue`]) travel alongside it as
//! `SCM_RIGHTS` ancillary data.
//!
//! ```
//! use ipcwire::Connection;
//!
//! let (mut left, mut right) = Connection::pair().unwrap();
//! left.send(&(1u8, Some("ready".to_string()))).unwrap();
//! let (code, note): (u8, Option<String>) = right.recv().unwrap();
//! assert_eq!((code, note.as_deref()), (1, Some("ready")));
//! ```
//!
//! The layers underneath are re-exported as [`transport`], [`frame`], and
//! [`codec`].

pub mod connection;
pub mod error;
pub mod listener;

pub use ipcwire_codec as codec;
pub use ipcwire_frame as frame;
pub use ipcwire_transport as transport;

pub use connection::{Connection, ConnectionConfig};
pub use error::{ConnectionError, Result};
pub use listener::Listener;

pub use ipcwire_codec::{
    ipc_enum, ipc_variant, Decode, DecodeError, DecoderConfig, Dictionary, Encode, EncodeError,
    SharedQueue, TransferredFile,
};
