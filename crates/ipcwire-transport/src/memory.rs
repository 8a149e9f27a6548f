use std::collections::VecDeque;
use std::io::Read;
use std::os::fd::OwnedFd;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::traits::HandleSource;

/// An already-received message: bytes plus the handles that came with it.
///
/// Decoding a frame runs over this; tests use it to feed hand-built fixtures.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    data: Bytes,
    position: usize,
    handles: VecDeque<OwnedFd>,
}

impl MemoryTransport {
    /// Create a transport over `data` with no handles.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            handles: VecDeque::new(),
        }
    }

    /// Create a transport over `data` delivering `handles` in iteration order.
    pub fn with_handles(data: impl Into<Bytes>, handles: impl IntoIterator<Item = OwnedFd>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            handles: handles.into_iter().collect(),
        }
    }

    /// Queue one more handle behind any already pending.
    pub fn push_handle(&mut self, handle: OwnedFd) {
        self.handles.push_back(handle);
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl HandleSource for MemoryTransport {
    fn take_next_handle(&mut self) -> Result<OwnedFd> {
        self.handles.pop_front().ok_or(TransportError::NoHandle)
    }

    fn pending_handles(&self) -> usize {
        self.handles.len()
    }
}
