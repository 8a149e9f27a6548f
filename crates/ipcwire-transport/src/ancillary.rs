//! `SCM_RIGHTS` descriptor passing over Unix stream sockets.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Most descriptors the kernel accepts in one `SCM_RIGHTS` message (Linux `SCM_MAX_FD`).
pub const MAX_HANDLES_PER_TRANSFER: usize = 253;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

#[allow(unused_unsafe)]
fn cmsg_space(count: usize) -> usize {
    let bytes = (count * std::mem::size_of::<RawFd>()) as libc::c_uint;
    // SAFETY: pure size arithmetic.
    unsafe { libc::CMSG_SPACE(bytes) as usize }
}

#[allow(unused_unsafe)]
fn cmsg_len(count: usize) -> usize {
    let bytes = (count * std::mem::size_of::<RawFd>()) as libc::c_uint;
    // SAFETY: pure size arithmetic.
    unsafe { libc::CMSG_LEN(bytes) as usize }
}

/// Control buffer aligned for `cmsghdr`.
fn control_buffer(count: usize) -> Vec<u64> {
    vec![0u64; cmsg_space(count).div_ceil(std::mem::size_of::<u64>())]
}

/// `sendmsg` with `handles` attached as `SCM_RIGHTS` to the first byte of `buf`.
pub fn send_with_handles(
    socket: BorrowedFd<'_>,
    buf: &[u8],
    handles: &[BorrowedFd<'_>],
) -> io::Result<usize> {
    if handles.len() > MAX_HANDLES_PER_TRANSFER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} handles exceed the per-transfer limit of {MAX_HANDLES_PER_TRANSFER}",
                handles.len()
            ),
        ));
    }
    if buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "handles must accompany at least one data byte",
        ));
    }

    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut control = control_buffer(handles.len());

    // SAFETY: an all-zero msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = cmsg_space(handles.len()) as _;

    // SAFETY: `control` is sized by CMSG_SPACE for `handles.len()` descriptors and
    // aligned for cmsghdr, so the first header and its data area are in bounds.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = cmsg_len(handles.len()) as _;
        let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
        for (i, handle) in handles.iter().enumerate() {
            data.add(i).write_unaligned(handle.as_raw_fd());
        }
    }

    loop {
        // SAFETY: `msg` points at live iov and control buffers for the duration of the call.
        let rc = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, SEND_FLAGS) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// `recvmsg` into `buf`, pushing any received descriptors onto `handles`.
///
/// Descriptors are close-on-exec. A truncated control message is an error:
/// dropping descriptors would break positional correlation.
pub fn recv_with_handles(
    socket: BorrowedFd<'_>,
    buf: &mut [u8],
    handles: &mut VecDeque<OwnedFd>,
) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    };
    let mut control = control_buffer(MAX_HANDLES_PER_TRANSFER);

    // SAFETY: an all-zero msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = (control.len() * std::mem::size_of::<u64>()) as _;

    let read = loop {
        // SAFETY: `msg` points at live iov and control buffers for the duration of the call.
        let rc = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, RECV_FLAGS) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    // Take ownership of every descriptor before anything can fail, so an
    // error below closes them instead of leaking them.
    let mut received = Vec::new();
    let header_len = cmsg_len(0);
    // SAFETY: the kernel filled `control` with `msg.msg_controllen` bytes of
    // well-formed cmsg headers; CMSG_NXTHDR stays within that range.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header_len)
                    / std::mem::size_of::<RawFd>();
                for i in 0..count {
                    let raw = data.add(i).read_unaligned();
                    received.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::other("transferred handles truncated by the kernel"));
    }
    for handle in &received {
        set_cloexec(handle)?;
    }

    handles.extend(received);
    Ok(read)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_cloexec(_handle: &OwnedFd) -> io::Result<()> {
    // MSG_CMSG_CLOEXEC already applied it.
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(handle: &OwnedFd) -> io::Result<()> {
    // SAFETY: fcntl on an owned, open descriptor.
    let rc = unsafe { libc::fcntl(handle.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
