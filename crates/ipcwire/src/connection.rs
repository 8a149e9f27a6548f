use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use ipcwire_codec::{decode_message, encode_message, Decode, DecoderConfig, Encode};
use ipcwire_frame::{FrameConfig, FrameReader, FrameWriter};
use ipcwire_transport::{IpcStream, UnixDomainSocket};
use tracing::{debug, warn};

use crate::error::{ConnectionError, Result};

/// Limits for one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Frame size, handle count, and socket timeouts.
    pub frame: FrameConfig,
    /// Bounds applied while decoding each received message.
    pub decoder: DecoderConfig,
}

/// A blocking, message-typed connection to one peer.
///
/// Each [`send`](Self::send) writes one frame holding one encoded message
/// and its handles; each [`recv`](Self::recv) reads one frame and decodes
/// all of it. Any frame or decode failure shuts the socket down and poisons
/// the connection, since the stream position can no longer be trusted;
/// every later call returns [`ConnectionError::Unusable`].
pub struct Connection {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    decoder: DecoderConfig,
    usable: bool,
}

impl Connection {
    /// Connect to a listening socket with default limits.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_config(path, ConnectionConfig::default())
    }

    /// Connect to a listening socket with explicit limits.
    pub fn connect_with_config(path: impl AsRef<Path>, config: ConnectionConfig) -> Result<Self> {
        let stream = UnixDomainSocket::connect(path)?;
        Self::from_stream_with_config(stream, config)
    }

    /// Wrap an already-connected stream with default limits.
    pub fn from_stream(stream: IpcStream) -> Result<Self> {
        Self::from_stream_with_config(stream, ConnectionConfig::default())
    }

    /// Wrap an already-connected stream with explicit limits.
    pub fn from_stream_with_config(stream: IpcStream, config: ConnectionConfig) -> Result<Self> {
        // the reader keeps the original so handles already queued on it stay reachable
        let writer_stream = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(stream, config.frame.clone())?;
        let writer = FrameWriter::with_config_ipc(writer_stream, config.frame)?;
        Ok(Self {
            reader,
            writer,
            decoder: config.decoder,
            usable: true,
        })
    }

    /// Two connections joined to each other.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = IpcStream::pair()?;
        Ok((Self::from_stream(left)?, Self::from_stream(right)?))
    }

    /// Encode `message` and send it as one frame.
    ///
    /// An encode failure happens before anything is written and leaves the
    /// connection usable.
    pub fn send<M: Encode + ?Sized>(&mut self, message: &M) -> Result<()> {
        self.ensure_usable()?;
        let (payload, handles) = encode_message(message)?.into_parts();
        let borrowed: Vec<BorrowedFd<'_>> = handles.iter().map(AsFd::as_fd).collect();
        self.writer
            .send(&payload, &borrowed)
            .map_err(|err| self.poison(err.into()))
    }

    /// Receive one frame and decode it as `M`.
    ///
    /// The whole frame must be consumed: leftover bytes or handles are an
    /// error, as is any decode failure.
    pub fn recv<M: Decode>(&mut self) -> Result<M> {
        self.ensure_usable()?;
        let frame = self
            .reader
            .read_frame()
            .map_err(|err| self.poison(err.into()))?;
        let mut transport = frame.into_transport();
        decode_message(&mut transport, self.decoder).map_err(|err| self.poison(err.into()))
    }

    /// Whether the connection can still be used.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Shut the socket down and mark the connection unusable.
    pub fn close(&mut self) -> Result<()> {
        self.usable = false;
        self.reader.get_ref().shutdown()?;
        Ok(())
    }

    /// Credentials of the connected peer as `(uid, gid, pid)`, where the
    /// platform reports them.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.reader.get_ref().peer_credentials()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.usable {
            Ok(())
        } else {
            Err(ConnectionError::Unusable)
        }
    }

    fn poison(&mut self, err: ConnectionError) -> ConnectionError {
        if self.usable {
            warn!(error = %err, "connection poisoned");
            self.usable = false;
            if let Err(shutdown) = self.reader.get_ref().shutdown() {
                debug!(error = %shutdown, "shutdown after poisoning failed");
            }
        }
        err
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("stream", self.reader.get_ref())
            .field("usable", &self.usable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ipcwire_codec::DecodeError;
    use ipcwire_frame::FrameError;

    use super::*;

    #[test]
    fn typed_round_trip() {
        let (mut client, mut server) = Connection::pair().expect("pair should connect");

        client
            .send(&(42u32, "ping".to_string()))
            .expect("send should succeed");
        let (id, text): (u32, String) = server.recv().expect("recv should succeed");

        assert_eq!(id, 42);
        assert_eq!(text, "ping");
        assert!(server.is_usable());
    }

    #[test]
    fn layout_mismatch_poisons_receiver() {
        let (mut client, mut server) = Connection::pair().expect("pair should connect");

        client.send(&7u64).expect("send should succeed");
        let err = server.recv::<u32>().expect_err("extra bytes should fail");
        assert!(matches!(
            err,
            ConnectionError::Decode(DecodeError::TrailingData { bytes: 4, .. })
        ));
        assert!(!server.is_usable());

        let err = server.recv::<u32>().expect_err("poisoned connection should refuse");
        assert!(matches!(err, ConnectionError::Unusable));
    }

    #[test]
    fn poisoning_shuts_down_the_peer_side() {
        let (mut client, mut server) = Connection::pair().expect("pair should connect");

        client.send(&[9u8, 9, 9][..]).expect("send should succeed");
        assert!(server.recv::<bool>().is_err());

        let err = client.recv::<u8>().expect_err("peer was shut down");
        assert!(matches!(
            err,
            ConnectionError::Frame(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn garbage_frame_is_rejected() {
        let (raw, server) = IpcStream::pair().expect("pair should connect");
        let mut server = Connection::from_stream(server).expect("stream should wrap");

        let mut raw = raw;
        raw.write_all(b"XX\x00\x00\x00\x00\x00\x00")
            .expect("raw write should succeed");

        let err = server.recv::<()>().expect_err("bad magic should fail");
        assert!(matches!(err, ConnectionError::Frame(FrameError::InvalidMagic)));
        assert!(!server.is_usable());
    }

    #[test]
    fn close_marks_unusable() {
        let (mut client, _server) = Connection::pair().expect("pair should connect");
        client.close().expect("close should succeed");
        assert!(matches!(
            client.send(&1u8),
            Err(ConnectionError::Unusable)
        ));
    }
}
