use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::os::fd::{BorrowedFd, OwnedFd};

use crate::error::{Result, TransportError};

/// Out-of-band delivery of transferred handles.
///
/// Handles are yielded in the order the peer attached them. The byte stream
/// carries no tag for a handle; position is the only correlation.
pub trait HandleSource {
    /// Take the next delivered handle, or `TransportError::NoHandle`.
    fn take_next_handle(&mut self) -> Result<OwnedFd>;

    /// Handles delivered but not yet taken.
    fn pending_handles(&self) -> usize {
        0
    }
}

/// Sending side of [`HandleSource`].
pub trait HandleSink {
    /// Write some of `buf`, attaching `handles` to the first byte written.
    ///
    /// Returns the number of bytes written. Handles are sent at most once,
    /// so callers pass an empty slice when continuing a partial write.
    fn write_with_handles(&mut self, buf: &[u8], handles: &[BorrowedFd<'_>])
        -> std::io::Result<usize>;
}

/// What the decoder consumes: blocking exact reads plus paired handle delivery.
///
/// Implemented for every `Read + HandleSource`, so a connected [`IpcStream`],
/// a `MemoryTransport`, or a plain `Cursor` all work.
pub trait Transport: HandleSource {
    /// Read exactly `buf.len()` bytes or fail. A short stream is an
    /// `UnexpectedEof` I/O error.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
}

impl<T: Read + HandleSource + ?Sized> Transport for T {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        Read::read_exact(self, buf).map_err(TransportError::Io)
    }
}

impl<T> HandleSource for Cursor<T> {
    fn take_next_handle(&mut self) -> Result<OwnedFd> {
        Err(TransportError::NoHandle)
    }
}

impl HandleSource for &[u8] {
    fn take_next_handle(&mut self) -> Result<OwnedFd> {
        Err(TransportError::NoHandle)
    }
}

impl HandleSink for Vec<u8> {
    fn write_with_handles(
        &mut self,
        buf: &[u8],
        handles: &[BorrowedFd<'_>],
    ) -> std::io::Result<usize> {
        reject_handles(handles)?;
        self.write(buf)
    }
}

impl HandleSink for Cursor<Vec<u8>> {
    fn write_with_handles(
        &mut self,
        buf: &[u8],
        handles: &[BorrowedFd<'_>],
    ) -> std::io::Result<usize> {
        reject_handles(handles)?;
        self.write(buf)
    }
}

fn reject_handles(handles: &[BorrowedFd<'_>]) -> std::io::Result<()> {
    if handles.is_empty() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "in-memory sink cannot carry transferred handles",
        ))
    }
}

/// A connected IPC stream with a queue of received handles.
///
/// Every read goes through `recvmsg`, so descriptors the peer attached with
/// `SCM_RIGHTS` are queued here in arrival order and handed out by
/// [`HandleSource::take_next_handle`].
pub struct IpcStream {
    inner: IpcStreamInner,
    handles: VecDeque<OwnedFd>,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsFd;

                let before = self.handles.len();
                let n = crate::ancillary::recv_with_handles(stream.as_fd(), buf, &mut self.handles)?;
                let received = self.handles.len() - before;
                if received > 0 {
                    tracing::debug!(received, queued = self.handles.len(), "received handles");
                }
                Ok(n)
            }
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl HandleSource for IpcStream {
    fn take_next_handle(&mut self) -> Result<OwnedFd> {
        self.handles.pop_front().ok_or(TransportError::NoHandle)
    }

    fn pending_handles(&self) -> usize {
        self.handles.len()
    }
}

impl HandleSink for IpcStream {
    fn write_with_handles(
        &mut self,
        buf: &[u8],
        handles: &[BorrowedFd<'_>],
    ) -> std::io::Result<usize> {
        if handles.is_empty() {
            return self.write(buf);
        }
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsFd;

                crate::ancillary::send_with_handles(stream.as_fd(), buf, handles)
            }
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
            handles: VecDeque::new(),
        }
    }

    /// Create a connected pair of streams (`socketpair`).
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Shut down both directions. Used when a connection is torn down
    /// after a protocol error.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The clone starts with an empty handle queue; handles already received
    /// stay with `self`.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f
                .debug_struct("IpcStream")
                .field("type", &"unix")
                .field("pending_handles", &self.handles.len())
                .finish(),
        }
    }
}
