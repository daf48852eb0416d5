//! Wire format and transport for the broker channel.
//!
//! The channel is a `SOCK_SEQPACKET` socketpair, so every send is delivered
//! as exactly one message and receives never coalesce. A message is a small
//! byte frame plus, optionally, one file descriptor riding along as
//! `SCM_RIGHTS` ancillary data.
//!
//! Requests are one discriminant byte, followed (for `Open`) by a
//! NUL-terminated path. Responses are a 4-byte native-endian errno, 0 on
//! success, with the opened descriptor attached only on success. The `End`
//! acknowledgement is an empty frame.

use nix::errno::Errno;
use nix::sys::socket::{
    ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg,
};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

/// Upper bound on a request path, including the terminating NUL.
pub(crate) const MAX_PATH: usize = libc::PATH_MAX as usize;

/// Largest request frame: discriminant + bounded path.
pub(crate) const FRAME_LEN: usize = 1 + MAX_PATH;

const MSG_OPEN: u8 = 0;
const MSG_END: u8 = 1;

/// A request sent from the supervisor to the broker.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Request {
    /// Open the given path read-only. Bytes of the path, no NUL.
    Open(Vec<u8>),
    /// Shut the broker down.
    End,
}

impl Request {
    /// Encode into `buf`, returning the frame length.
    ///
    /// Paths longer than the wire bound are silently truncated; callers
    /// must not rely on paths longer than [`MAX_PATH`] - 1 bytes.
    pub(crate) fn encode(&self, buf: &mut [u8; FRAME_LEN]) -> usize {
        match self {
            Request::Open(path) => {
                buf[0] = MSG_OPEN;
                let len = path.len().min(MAX_PATH - 1);
                buf[1..1 + len].copy_from_slice(&path[..len]);
                buf[1 + len] = 0;
                1 + len + 1
            }
            Request::End => {
                buf[0] = MSG_END;
                1
            }
        }
    }

    /// Decode a received frame. Returns `None` for anything outside the
    /// two recognized discriminants.
    pub(crate) fn decode(buf: &[u8]) -> Option<Request> {
        match buf.first() {
            Some(&MSG_OPEN) => {
                let rest = &buf[1..];
                let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                Some(Request::Open(rest[..end].to_vec()))
            }
            Some(&MSG_END) => Some(Request::End),
            _ => None,
        }
    }
}

/// Send one message, with at most one descriptor attached.
///
/// `EINTR` is retried transparently. `MSG_NOSIGNAL` keeps a dead peer from
/// raising `SIGPIPE` during best-effort shutdown.
pub(crate) fn send(sock: RawFd, fd: Option<RawFd>, payload: &[u8]) -> nix::Result<()> {
    let iov = [IoSlice::new(payload)];
    loop {
        let res = match fd {
            Some(fd) => {
                let fds = [fd];
                let cmsg = [ControlMessage::ScmRights(&fds)];
                sendmsg::<()>(sock, &iov, &cmsg, MsgFlags::MSG_NOSIGNAL, None)
            }
            None => sendmsg::<()>(sock, &iov, &[], MsgFlags::MSG_NOSIGNAL, None),
        };
        match res {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
            Ok(_) => return Ok(()),
        }
    }
}

/// Receive one message into `buf`, returning the byte count and the
/// attached descriptor, if any.
///
/// A return of `(0, None)` means either an empty message or that the peer
/// closed its endpoint; the two are indistinguishable on purpose, exactly
/// as the callers need them to be. Received descriptors are close-on-exec
/// from the moment they exist (`MSG_CMSG_CLOEXEC`).
pub(crate) fn recv(
    sock: RawFd,
    buf: &mut [u8],
    want_fd: bool,
) -> nix::Result<(usize, Option<OwnedFd>)> {
    loop {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
        let res = recvmsg::<()>(
            sock,
            &mut iov,
            if want_fd { Some(&mut cmsg_buf) } else { None },
            MsgFlags::MSG_CMSG_CLOEXEC,
        );
        let msg = match res {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
            Ok(msg) => msg,
        };
        let bytes = msg.bytes;
        let mut fd = None;
        if want_fd {
            for cmsg in msg.cmsgs()? {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    if let Some(&raw) = fds.first() {
                        fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                    }
                }
            }
        }
        return Ok((bytes, fd));
    }
}
