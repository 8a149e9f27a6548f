use std::os::fd::OwnedFd;

use ipcwire_transport::{HandleSource, MemoryTransport, Transport};
use tracing::{debug, trace};

use crate::bounds;
use crate::config::DecoderConfig;
use crate::error::{DecodeError, DecodeResult};

/// A type that can be reconstructed from the wire.
///
/// This is the whole dispatch mechanism: the impl chosen for `Self` at
/// compile time is the decoding strategy. Generic impls (sequences, maps,
/// optionals, unions) call back into [`Decoder::decode`] for their element
/// types. A type without an impl cannot be decoded, and that is a build
/// error rather than a runtime one.
pub trait Decode: Sized {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self>;
}

/// Reads typed values from one connection's byte stream and handle queue.
///
/// Borrows the transport mutably for one decode call chain, so a single
/// connection can never be driven by two decoders at once. Reads only move
/// forward.
pub struct Decoder<'a, R: ?Sized> {
    transport: &'a mut R,
    config: DecoderConfig,
}

impl<'a, R: Transport + ?Sized> Decoder<'a, R> {
    /// Create a decoder with default limits.
    pub fn new(transport: &'a mut R) -> Self {
        Self::with_config(transport, DecoderConfig::default())
    }

    /// Create a decoder with explicit limits.
    pub fn with_config(transport: &'a mut R, config: DecoderConfig) -> Self {
        Self { transport, config }
    }

    /// Decode one `V`.
    pub fn decode<V: Decode>(&mut self) -> DecodeResult<V> {
        V::decode(self)
    }

    /// Fill `buf` with the next `buf.len()` bytes.
    pub fn decode_into(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        self.transport.read_exact(buf).map_err(DecodeError::from)
    }

    /// Read a `u32` length prefix for elements of `E` and pass it through
    /// the bounds guard.
    pub fn decode_size<E>(&mut self) -> DecodeResult<usize> {
        let raw: u32 = self.decode()?;
        bounds::check_length::<E>(u64::from(raw), &self.config)
    }

    /// Take the next transferred handle, in stream order.
    pub fn take_handle(&mut self) -> DecodeResult<OwnedFd> {
        let handle = self.transport.take_next_handle().map_err(DecodeError::from)?;
        trace!("took transferred handle");
        Ok(handle)
    }

    /// The limits this decoder enforces.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&mut self) -> &mut R {
        &mut *self.transport
    }
}

/// Decode one `V` from `transport` with default limits.
pub fn decode<V: Decode, R: Transport + ?Sized>(transport: &mut R) -> DecodeResult<V> {
    Decoder::new(transport).decode()
}

/// Decode a complete received message.
///
/// Unlike [`decode`], this also requires that every byte and every handle
/// of the message was consumed; leftovers mean sender and receiver disagree
/// on the message layout.
pub fn decode_message<V: Decode>(
    transport: &mut MemoryTransport,
    config: DecoderConfig,
) -> DecodeResult<V> {
    let value = Decoder::with_config(transport, config).decode()?;
    let (bytes, handles) = (transport.remaining(), transport.pending_handles());
    if bytes != 0 || handles != 0 {
        debug!(bytes, handles, "message not fully consumed");
        return Err(DecodeError::TrailingData { bytes, handles });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_into_reads_exact_bytes() {
        let mut transport = MemoryTransport::new(vec![1u8, 2, 3, 4]);
        let mut decoder = Decoder::new(&mut transport);

        let mut buf = [0u8; 3];
        decoder.decode_into(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(transport.remaining(), 1);
    }

    #[test]
    fn decode_size_applies_guard() {
        let mut transport = MemoryTransport::new(1000u32.to_ne_bytes().to_vec());
        let config = DecoderConfig {
            max_length: 999,
            ..DecoderConfig::default()
        };
        let err = Decoder::with_config(&mut transport, config)
            .decode_size::<u8>()
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SizeLimitExceeded {
                length: 1000,
                limit: 999
            }
        ));
    }

    #[test]
    fn missing_handle_is_typed() {
        let mut transport = MemoryTransport::new(Vec::new());
        let err = Decoder::new(&mut transport).take_handle().unwrap_err();
        assert!(matches!(err, DecodeError::MissingHandle));
    }

    #[test]
    fn short_read_is_transport_error() {
        let mut transport = MemoryTransport::new(vec![0u8; 2]);
        let err = decode::<u32, _>(&mut transport).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn decode_message_rejects_trailing_bytes() {
        let mut bytes = 7u16.to_ne_bytes().to_vec();
        bytes.push(0xFF);
        let mut transport = MemoryTransport::new(bytes);

        let err = decode_message::<u16>(&mut transport, DecoderConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TrailingData {
                bytes: 1,
                handles: 0
            }
        ));
    }

    #[test]
    fn decode_message_rejects_untaken_handles() {
        let handle: OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
        let mut transport = MemoryTransport::with_handles(7u16.to_ne_bytes().to_vec(), [handle]);

        let err = decode_message::<u16>(&mut transport, DecoderConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TrailingData {
                bytes: 0,
                handles: 1
            }
        ));
    }
}
