//! Supervisor startup, privilege drop, and the client side of the channel.
//!
//! [`start`] is the one entry point: it forks the privileged broker child,
//! then irreversibly downgrades the calling process to the invoking user's
//! identity before returning. From that point on the only privileged thing
//! the program can do is ask the broker, over the channel, to open a path
//! under the confinement root.

use crate::broker::{self, Policy};
use crate::error::{Error, Result};
use crate::proto::{self, FRAME_LEN, Request};
use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, Uid, fork, getgid, getuid, setgid, setuid};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

/// A live pairing of the channel and its broker process.
///
/// Single-use: [`finish`](Session::finish) consumes the session, and there
/// is no way to issue a request after it. Dropping an unfinished session
/// performs the same best-effort shutdown, so the child is never left as a
/// zombie.
#[derive(Debug)]
pub struct Session {
    sock: OwnedFd,
    broker: Pid,
    root: PathBuf,
    finished: bool,
}

/// Fork the privileged broker and drop privileges in the caller.
///
/// Must be called with an effective uid of 0 (setuid binary or a
/// privileged service); fails with [`Error::NotPrivileged`] before any
/// other side effect otherwise. On success the calling process is
/// permanently downgraded to the invoking user and group, and the returned
/// [`Session`] is the only remaining route to paths under `root`.
///
/// At most one session per confinement root per process lifetime; the
/// broker is not a multi-client service.
pub fn start(root: impl AsRef<Path>) -> Result<Session> {
    let root = root.as_ref();
    if !Uid::effective().is_root() {
        return Err(Error::NotPrivileged);
    }

    let (parent_sock, child_sock) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(Error::ChannelCreate)?;

    let policy = Policy::new(root);

    // Safety: the child calls nothing but serve(), which only touches its
    // own endpoint and exits via process::exit.
    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Child => {
            drop(parent_sock);
            broker::serve(child_sock, policy)
        }
        ForkResult::Parent { child } => {
            drop(child_sock);
            drop_privileges()?;
            log::debug!(
                "broker pid {} serving {}, privileges dropped",
                child,
                root.display()
            );
            Ok(Session {
                sock: parent_sock,
                broker: child,
                root: root.to_path_buf(),
                finished: false,
            })
        }
    }
}

/// Downgrade to the invoking user, group first, then verify the drop is
/// irreversible.
///
/// Group before user: once the user id is gone, so is the right to change
/// the group id. If root can still be re-acquired afterwards the program
/// must not keep running, whatever the reason.
fn drop_privileges() -> Result<()> {
    setgid(getgid()).map_err(Error::PrivilegeDrop)?;
    setuid(getuid()).map_err(Error::PrivilegeDrop)?;

    if setuid(Uid::from_raw(0)).is_ok() {
        return Err(Error::PrivilegeDropFailed);
    }
    Ok(())
}

impl Session {
    /// Ask the broker to open `path` read-only.
    ///
    /// Returns the transferred descriptor, owned by the caller. A broker-
    /// side open failure comes back as [`Error::DeviceOpen`] carrying the
    /// platform error; the broker keeps serving after it. Requests are
    /// strictly serial: one in flight at a time.
    ///
    /// Paths longer than the wire bound are silently truncated, and a path
    /// outside the confinement root makes the broker terminate itself
    /// without answering, which this call observes as
    /// [`Error::NoResponse`].
    pub fn open(&self, path: impl AsRef<Path>) -> Result<OwnedFd> {
        let path = path.as_ref();
        let mut frame = [0u8; FRAME_LEN];
        let len = Request::Open(path.as_os_str().as_bytes().to_vec()).encode(&mut frame);
        proto::send(self.sock.as_raw_fd(), None, &frame[..len]).map_err(Error::Channel)?;

        let mut code = [0u8; 4];
        let mut retries = 0;
        loop {
            let (n, fd) = proto::recv(self.sock.as_raw_fd(), &mut code, true)
                .map_err(Error::Channel)?;

            // An empty read can race with broker startup; give it a few
            // more chances before concluding the broker is gone.
            if n == 0 && fd.is_none() {
                if retries < 3 {
                    retries += 1;
                    continue;
                }
                return Err(Error::NoResponse);
            }
            if n != code.len() {
                return Err(Error::NoResponse);
            }

            let errno = i32::from_ne_bytes(code);
            return if errno != 0 {
                // Any stray descriptor is discarded when `fd` drops.
                Err(Error::DeviceOpen {
                    path: path.to_path_buf(),
                    errno: Errno::from_raw(errno),
                })
            } else {
                fd.ok_or(Error::NoResponse)
            };
        }
    }

    /// The broker's process id.
    pub fn broker_pid(&self) -> Pid {
        self.broker
    }

    /// The confinement root this session was started with.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shut the broker down and reap it.
    ///
    /// Sends `End`, blocks for the bare acknowledgement, waits for the
    /// child to exit, and closes the channel. Best-effort: reports
    /// nothing, and still reaps the child if the channel is already dead.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut frame = [0u8; FRAME_LEN];
        let len = Request::End.encode(&mut frame);
        if proto::send(self.sock.as_raw_fd(), None, &frame[..len]).is_ok() {
            let mut ack = [0u8; 4];
            let _ = proto::recv(self.sock.as_raw_fd(), &mut ack, false);
        }
        let _ = waitpid(self.broker, None);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// Serializes fork-based tests. Held for a whole test so one session's
    /// endpoints are never inherited by another test's broker child.
    static FORK_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) fn lock() -> MutexGuard<'static, ()> {
        FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fork a broker without the privilege checks, confined to `root`.
    ///
    /// The serve loop itself needs no privilege, so this exercises the
    /// whole request path as an ordinary user.
    pub(crate) fn spawn_unprivileged(root: &Path) -> Session {
        let (parent_sock, child_sock) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .expect("socketpair");
        let policy = Policy::new(root);

        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                drop(parent_sock);
                broker::serve(child_sock, policy)
            }
            ForkResult::Parent { child } => {
                drop(child_sock);
                Session {
                    sock: parent_sock,
                    broker: child,
                    root: root.to_path_buf(),
                    finished: false,
                }
            }
        }
    }
}
