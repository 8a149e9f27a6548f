use std::io::{ErrorKind, Write};
use std::os::fd::{AsFd, BorrowedFd};

use bytes::BytesMut;
use ipcwire_transport::{HandleSink, IpcStream};
use tracing::{debug, trace};

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames, with their handles, to a stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write + HandleSink> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let handles: Vec<BorrowedFd<'_>> = frame.handles.iter().map(AsFd::as_fd).collect();
        self.send(frame.payload.as_ref(), &handles)
    }

    /// Frame and send a payload with its handles.
    ///
    /// Handles are attached to the first chunk written; continuation writes
    /// carry none. A send timeout on the stream surfaces as
    /// `FrameError::Timeout`, possibly after part of the frame was written,
    /// which leaves the stream unusable for further frames.
    pub fn send(&mut self, payload: &[u8], handles: &[BorrowedFd<'_>]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        if handles.len() > self.config.max_handles {
            return Err(FrameError::TooManyHandles {
                count: handles.len(),
                max: self.config.max_handles,
            });
        }

        self.buf.clear();
        encode_frame(payload, handles.len(), &mut self.buf)?;

        let mut pending = handles;
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write_with_handles(&self.buf[offset..], pending) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => {
                    offset += n;
                    pending = &[];
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => {
                    debug!(written = offset, total = self.buf.len(), "frame write timed out");
                    return Err(FrameError::Timeout {
                        written: offset,
                        total: self.buf.len(),
                    });
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        trace!(payload = payload.len(), handles = handles.len(), "wrote frame");

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// `SO_SNDTIMEO` expiry shows up as `EAGAIN` on a blocking socket.
fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
