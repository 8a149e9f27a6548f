use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use ipcwire_transport::{HandleSource, IpcStream};
use tracing::{debug, trace, warn};

use crate::codec::{buffered_handle_budget, decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames, with their handles, from a stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read + HandleSource> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    /// Handles received beyond what the buffered frames declare are closed
    /// and reported as `FrameError::UnexpectedHandles`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(pending) = decode_frame(&mut self.buf, &self.config)? {
                let mut handles = Vec::with_capacity(pending.handle_count);
                while handles.len() < pending.handle_count {
                    match self.inner.take_next_handle() {
                        Ok(handle) => handles.push(handle),
                        Err(err) => {
                            debug!(%err, expected = pending.handle_count, "frame handles missing");
                            return Err(FrameError::MissingHandles {
                                expected: pending.handle_count,
                                received: handles.len(),
                            });
                        }
                    }
                }
                let surplus = self.inner.pending_handles();
                if surplus > buffered_handle_budget(&self.buf, &self.config) {
                    let discarded = self.discard_handles();
                    warn!(
                        declared = pending.handle_count,
                        discarded, "dropping undeclared handles"
                    );
                    return Err(FrameError::UnexpectedHandles {
                        declared: pending.handle_count,
                        surplus,
                    });
                }
                trace!(
                    payload = pending.payload.len(),
                    handles = handles.len(),
                    "read frame"
                );
                return Ok(Frame {
                    payload: pending.payload,
                    handles,
                });
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn discard_handles(&mut self) -> usize {
        let mut discarded = 0;
        while self.inner.take_next_handle().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
