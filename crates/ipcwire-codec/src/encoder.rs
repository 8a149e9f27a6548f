use std::os::fd::{BorrowedFd, OwnedFd};

use bytes::{BufMut, Bytes, BytesMut};
use ipcwire_transport::MemoryTransport;

use crate::error::{EncodeError, EncodeResult};

/// A type that can be written in the layout its [`Decode`](crate::Decode)
/// impl reads.
pub trait Encode {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()>;
}

impl<V: Encode + ?Sized> Encode for &V {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        (**self).encode(encoder)
    }
}

/// An encoded message: bytes plus the handles to send alongside them.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    pub data: BytesMut,
    pub handles: Vec<OwnedFd>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split into frozen bytes and handles, ready for framing.
    pub fn into_parts(self) -> (Bytes, Vec<OwnedFd>) {
        (self.data.freeze(), self.handles)
    }

    /// Feed the message straight back into a decoder.
    pub fn into_transport(self) -> MemoryTransport {
        let (data, handles) = self.into_parts();
        MemoryTransport::with_handles(data, handles)
    }
}

/// Appends typed values to a [`MessageBuffer`].
pub struct Encoder<'a> {
    buffer: &'a mut MessageBuffer,
}

impl<'a> Encoder<'a> {
    pub fn new(buffer: &'a mut MessageBuffer) -> Self {
        Self { buffer }
    }

    /// Encode one value.
    pub fn encode<V: Encode + ?Sized>(&mut self, value: &V) -> EncodeResult<()> {
        value.encode(self)
    }

    /// Append raw bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.data.put_slice(bytes);
    }

    /// Write a `u32` length prefix.
    pub fn encode_size(&mut self, length: usize) -> EncodeResult<()> {
        let prefix = u32::try_from(length)
            .map_err(|_| EncodeError::LengthOverflow { length, width: 32 })?;
        self.encode(&prefix)
    }

    /// Attach a duplicate of `handle`; the caller keeps the original.
    pub fn append_handle(&mut self, handle: BorrowedFd<'_>) -> EncodeResult<()> {
        let owned = handle.try_clone_to_owned().map_err(EncodeError::Handle)?;
        self.buffer.handles.push(owned);
        Ok(())
    }

    /// Attach `handle`, moving it into the message.
    pub fn append_owned_handle(&mut self, handle: OwnedFd) {
        self.buffer.handles.push(handle);
    }
}

/// Encode `value` into a fresh message.
pub fn encode_message<V: Encode + ?Sized>(value: &V) -> EncodeResult<MessageBuffer> {
    let mut buffer = MessageBuffer::new();
    Encoder::new(&mut buffer).encode(value)?;
    Ok(buffer)
}
