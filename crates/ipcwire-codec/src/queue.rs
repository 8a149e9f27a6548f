//! A single-producer, single-consumer ring buffer in shared memory.
//!
//! The queue lives in a file (a memfd on Linux) mapped by both processes;
//! sending a [`SharedQueue`] transfers the descriptor, and decoding one maps
//! it again after checking that the backing memory holds a queue of the
//! expected element type and capacity.
//!
//! Layout: a fixed header (magic, capacity, element size, head and tail
//! counters) followed by `CAPACITY` slots. `head` counts dequeued elements
//! and is written only by the consumer; `tail` counts enqueued elements and
//! is written only by the producer. Every header word is atomic because the
//! peer can write to it at any time.
//!
//! On Linux the memfd is sealed against resizing, and a received queue is
//! only mapped if its backing carries that seal: a peer that could truncate
//! the file would turn the next slot access into `SIGBUS`.

use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use ipcwire_transport::Transport;
use tracing::debug;

use crate::decoder::{Decode, Decoder};
use crate::encoder::{Encode, Encoder};
use crate::error::{DecodeError, DecodeResult, EncodeResult, QueueError};
use crate::extended::TransferredFile;

const QUEUE_MAGIC: u64 = u64::from_le_bytes(*b"IWQUEUE1");

/// Element types that may live in shared memory.
///
/// # Safety
///
/// Every bit pattern of `size_of::<Self>()` bytes must be a valid `Self`,
/// and the type must own no pointers or resources: the peer can write any
/// bytes into a slot.
pub unsafe trait QueueElement: Copy + Send + 'static {}

macro_rules! impl_queue_element {
    ($($ty:ty),+) => {$(
        unsafe impl QueueElement for $ty {}
    )+};
}

impl_queue_element!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

unsafe impl<T: QueueElement, const N: usize> QueueElement for [T; N] {}

#[repr(C)]
struct QueueHeader {
    magic: AtomicU64,
    capacity: AtomicU64,
    element_size: AtomicU64,
    head: AtomicU64,
    tail: AtomicU64,
}

/// A shared ring of `CAPACITY` elements of `T`.
pub struct SharedQueue<T: QueueElement, const CAPACITY: usize> {
    fd: OwnedFd,
    base: NonNull<u8>,
    _marker: PhantomData<T>,
}

// SAFETY: the mapping is owned by this value and its counters are atomics.
unsafe impl<T: QueueElement, const CAPACITY: usize> Send for SharedQueue<T, CAPACITY> {}

impl<T: QueueElement, const CAPACITY: usize> SharedQueue<T, CAPACITY> {
    const SLOTS_OFFSET: usize = size_of::<QueueHeader>().next_multiple_of(align_of::<T>());

    /// Bytes of backing memory a queue of this type occupies.
    pub const SHARED_SIZE: usize = Self::SLOTS_OFFSET + CAPACITY * size_of::<T>();

    /// Create a queue in anonymous shared memory.
    pub fn create() -> Result<Self, QueueError> {
        let queue = Self::create_in(anonymous_file()?)?;
        seal_size(queue.fd.as_fd())?;
        Ok(queue)
    }

    /// Create a queue backed by `file`, resizing and overwriting it.
    ///
    /// On Linux a peer only accepts a queue whose backing is sealed against
    /// shrinking, so a queue meant to be sent should come from [`create`].
    ///
    /// [`create`]: SharedQueue::create
    pub fn create_in(file: File) -> Result<Self, QueueError> {
        Self::check_capacity()?;
        file.set_len(Self::SHARED_SIZE as u64)?;
        let queue = Self::map(OwnedFd::from(file))?;
        // SAFETY: the mapping is at least header-sized and page aligned.
        unsafe {
            ptr::write(
                queue.base.as_ptr().cast::<QueueHeader>(),
                QueueHeader {
                    magic: AtomicU64::new(QUEUE_MAGIC),
                    capacity: AtomicU64::new(CAPACITY as u64),
                    element_size: AtomicU64::new(size_of::<T>() as u64),
                    head: AtomicU64::new(0),
                    tail: AtomicU64::new(0),
                },
            );
        }
        debug!(capacity = CAPACITY, bytes = Self::SHARED_SIZE, "created shared queue");
        Ok(queue)
    }

    /// Attach to a queue created elsewhere.
    ///
    /// Fails if the backing can still be shrunk (Linux), or if the
    /// descriptor's size or the stored header does not match this element
    /// type and capacity.
    pub fn from_fd(fd: OwnedFd) -> Result<Self, QueueError> {
        Self::check_capacity()?;
        check_sealed(fd.as_fd())?;
        let file = File::from(fd);
        let size = file.metadata()?.len();
        if size != Self::SHARED_SIZE as u64 {
            return Err(QueueError::Layout(format!(
                "backing size {size} does not match expected {}",
                Self::SHARED_SIZE
            )));
        }
        let queue = Self::map(OwnedFd::from(file))?;

        let header = queue.header();
        if header.magic.load(Ordering::Relaxed) != QUEUE_MAGIC {
            return Err(QueueError::Layout("missing queue magic".to_string()));
        }
        let capacity = header.capacity.load(Ordering::Relaxed);
        if capacity != CAPACITY as u64 {
            return Err(QueueError::Layout(format!(
                "stored capacity {capacity} does not match {CAPACITY}"
            )));
        }
        let element_size = header.element_size.load(Ordering::Relaxed);
        if element_size != size_of::<T>() as u64 {
            return Err(QueueError::Layout(format!(
                "stored element size {element_size} does not match {}",
                size_of::<T>()
            )));
        }
        Ok(queue)
    }

    fn check_capacity() -> Result<(), QueueError> {
        if CAPACITY == 0 {
            return Err(QueueError::Layout("capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    fn map(fd: OwnedFd) -> Result<Self, QueueError> {
        // SAFETY: mapping a descriptor we own; the result is checked below.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                Self::SHARED_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(QueueError::Io(std::io::Error::last_os_error()));
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| QueueError::Layout("mmap returned null".to_string()))?;
        Ok(Self {
            fd,
            base,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> &QueueHeader {
        // SAFETY: the mapping starts with a header and lives as long as self.
        unsafe { &*self.base.as_ptr().cast::<QueueHeader>() }
    }

    fn slot(&self, counter: u64) -> *mut T {
        let index = (counter % CAPACITY as u64) as usize;
        // SAFETY: index < CAPACITY, so the slot lies inside the mapping.
        unsafe {
            self.base
                .as_ptr()
                .add(Self::SLOTS_OFFSET)
                .cast::<T>()
                .add(index)
        }
    }

    /// Append `value`, or hand it back if the queue is full.
    pub fn try_enqueue(&mut self, value: T) -> Result<(), T> {
        let header = self.header();
        let tail = header.tail.load(Ordering::Relaxed);
        let head = header.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= CAPACITY as u64 {
            return Err(value);
        }
        // SAFETY: the slot is in bounds and not visible to the consumer
        // until `tail` is published.
        unsafe { ptr::write(self.slot(tail), value) };
        header.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Remove the oldest element, if any.
    pub fn try_dequeue(&mut self) -> Option<T> {
        let header = self.header();
        let head = header.head.load(Ordering::Relaxed);
        let tail = header.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: the slot is in bounds and every bit pattern is a valid T.
        let value = unsafe { ptr::read(self.slot(head)) };
        header.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Elements currently queued.
    pub fn len(&self) -> usize {
        let header = self.header();
        let tail = header.tail.load(Ordering::Acquire);
        let head = header.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(CAPACITY as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        CAPACITY
    }
}

impl<T: QueueElement, const CAPACITY: usize> Drop for SharedQueue<T, CAPACITY> {
    fn drop(&mut self) {
        // SAFETY: base/size describe the mapping created in `map`.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), Self::SHARED_SIZE);
        }
    }
}

impl<T: QueueElement, const CAPACITY: usize> AsFd for SharedQueue<T, CAPACITY> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl<T: QueueElement, const CAPACITY: usize> fmt::Debug for SharedQueue<T, CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedQueue")
            .field("fd", &self.fd.as_raw_fd())
            .field("capacity", &CAPACITY)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: QueueElement, const CAPACITY: usize> Decode for SharedQueue<T, CAPACITY> {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let file: TransferredFile = decoder.decode()?;
        Self::from_fd(file.take_fd()).map_err(|err| DecodeError::InvalidHandle(err.to_string()))
    }
}

impl<T: QueueElement, const CAPACITY: usize> Encode for SharedQueue<T, CAPACITY> {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.append_handle(self.fd.as_fd())
    }
}

#[cfg(target_os = "linux")]
fn anonymous_file() -> Result<File, QueueError> {
    // SAFETY: the name is a valid C string; the result is checked below.
    let raw = unsafe {
        libc::memfd_create(
            c"ipcwire-queue".as_ptr(),
            libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING,
        )
    };
    if raw == -1 {
        return Err(QueueError::Io(std::io::Error::last_os_error()));
    }
    // SAFETY: memfd_create returned a fresh descriptor we now own.
    Ok(File::from(unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(raw) }))
}

/// Freeze the size of a freshly created memfd.
#[cfg(target_os = "linux")]
fn seal_size(fd: BorrowedFd<'_>) -> Result<(), QueueError> {
    let seals = libc::F_SEAL_SHRINK | libc::F_SEAL_GROW | libc::F_SEAL_SEAL;
    // SAFETY: fcntl on a live descriptor; only its seals change.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, seals) } == -1 {
        return Err(QueueError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn check_sealed(fd: BorrowedFd<'_>) -> Result<(), QueueError> {
    // SAFETY: fcntl on a live descriptor; only reads its seals.
    let seals = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GET_SEALS) };
    if seals == -1 || seals & libc::F_SEAL_SHRINK == 0 {
        return Err(QueueError::Layout(
            "backing memory is not sealed against shrinking".to_string(),
        ));
    }
    Ok(())
}

// No file sealing outside Linux.
#[cfg(not(target_os = "linux"))]
fn seal_size(_fd: BorrowedFd<'_>) -> Result<(), QueueError> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn check_sealed(_fd: BorrowedFd<'_>) -> Result<(), QueueError> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn anonymous_file() -> Result<File, QueueError> {
    use std::sync::atomic::AtomicUsize;

    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "ipcwire-queue-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use ipcwire_transport::MemoryTransport;

    use super::*;
    use crate::decoder::decode;
    use crate::encoder::encode_message;

    #[test]
    fn fifo_until_full() {
        let mut queue = SharedQueue::<u32, 3>::create().unwrap();
        assert!(queue.is_empty());
        for value in [1, 2, 3] {
            queue.try_enqueue(value).unwrap();
        }
        assert_eq!(queue.try_enqueue(4), Err(4));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.try_dequeue(), Some(1));
        queue.try_enqueue(4).unwrap();
        let drained: Vec<u32> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, [2, 3, 4]);
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn wraps_many_times() {
        let mut queue = SharedQueue::<u64, 2>::create().unwrap();
        for value in 0..100u64 {
            queue.try_enqueue(value).unwrap();
            assert_eq!(queue.try_dequeue(), Some(value));
        }
    }

    #[test]
    fn second_mapping_shares_contents() {
        let mut producer = SharedQueue::<[u16; 2], 4>::create().unwrap();
        let fd = producer.as_fd().try_clone_to_owned().unwrap();
        let mut consumer = SharedQueue::<[u16; 2], 4>::from_fd(fd).unwrap();

        producer.try_enqueue([7, 8]).unwrap();
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.try_dequeue(), Some([7, 8]));
        assert!(producer.is_empty());
    }

    #[test]
    fn rejects_mismatched_capacity() {
        let queue = SharedQueue::<u32, 4>::create().unwrap();
        let fd = queue.as_fd().try_clone_to_owned().unwrap();
        let err = SharedQueue::<u32, 8>::from_fd(fd).unwrap_err();
        assert!(matches!(err, QueueError::Layout(_)));
    }

    #[test]
    fn rejects_same_size_different_element() {
        // 4 x u32 and 2 x u64 occupy the same bytes
        let queue = SharedQueue::<u32, 4>::create().unwrap();
        let fd = queue.as_fd().try_clone_to_owned().unwrap();
        let err = SharedQueue::<u64, 2>::from_fd(fd).unwrap_err();
        assert!(matches!(err, QueueError::Layout(msg) if msg.contains("capacity")));
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            SharedQueue::<u8, 0>::create(),
            Err(QueueError::Layout(_))
        ));
    }

    #[test]
    fn travels_as_a_handle() {
        let mut queue = SharedQueue::<i32, 8>::create().unwrap();
        queue.try_enqueue(-5).unwrap();

        let message = encode_message(&queue).unwrap();
        assert!(message.data.is_empty());
        let mut transport = message.into_transport();
        let mut received: SharedQueue<i32, 8> = decode(&mut transport).unwrap();
        assert_eq!(received.try_dequeue(), Some(-5));
        assert!(queue.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn created_backing_cannot_be_resized() {
        let queue = SharedQueue::<u64, 16>::create().unwrap();
        let file = File::from(queue.as_fd().try_clone_to_owned().unwrap());
        assert!(file.set_len(0).is_err());
        assert!(file.set_len(2 * SharedQueue::<u64, 16>::SHARED_SIZE as u64).is_err());
        assert_eq!(
            file.metadata().unwrap().len(),
            SharedQueue::<u64, 16>::SHARED_SIZE as u64
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn decode_rejects_unsealed_backing() {
        // a correctly laid out queue whose peer could still truncate it
        // SAFETY: the name is a valid C string; the result is checked.
        let raw = unsafe { libc::memfd_create(c"unsealed".as_ptr(), libc::MFD_CLOEXEC) };
        assert!(raw >= 0);
        // SAFETY: memfd_create returned a fresh descriptor.
        let file = File::from(unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(raw) });
        let queue = SharedQueue::<u64, 1024>::create_in(file).unwrap();

        let mut transport = encode_message(&queue).unwrap().into_transport();
        let err = decode::<SharedQueue<u64, 1024>, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHandle(msg) if msg.contains("sealed")));
    }

    #[test]
    fn decode_rejects_wrong_layout() {
        let file: OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
        let mut transport = MemoryTransport::with_handles(Vec::new(), [file]);
        let err = decode::<SharedQueue<u8, 16>, _>(&mut transport).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHandle(_)));
    }
}
