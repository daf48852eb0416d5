//! The privileged request server.
//!
//! [`serve`] runs in the forked child, which keeps the original (root)
//! identity for its whole life. It answers exactly two requests: open a
//! path under the confinement root, and shut down. Everything else about
//! the program runs unprivileged on the other side of the channel.

use crate::proto::{self, FRAME_LEN, Request};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process;

/// Confinement policy: which paths the broker may open.
///
/// The check is a byte-wise leading-substring match against the configured
/// root, fixed for the broker's lifetime. It is purely textual: `..`
/// segments and symlinks are *not* resolved before comparing, so a path
/// like `/dev/input/../foo` passes the check and is left to the kernel.
#[derive(Debug, Clone)]
pub struct Policy {
    root: PathBuf,
}

impl Policy {
    /// Create a policy confining opens to paths under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The configured root prefix.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` begins with the configured root.
    pub fn allows(&self, path: &[u8]) -> bool {
        path.starts_with(self.root.as_os_str().as_bytes())
    }
}

/// Serve open requests until told to stop. Does not return.
///
/// Runs in the privileged child; the supervisor endpoint of the socketpair
/// must already be closed in this process. Exit status is 0 for an
/// `End`-driven shutdown or supervisor disappearance, 1 for a confinement
/// violation.
pub fn serve(sock: OwnedFd, policy: Policy) -> ! {
    let mut buf = [0u8; FRAME_LEN];
    loop {
        let len = match proto::recv(sock.as_raw_fd(), &mut buf, false) {
            // Empty read: the supervisor is gone. Ordinary shutdown.
            Ok((0, _)) => process::exit(0),
            Ok((len, _)) => len,
            Err(_) => process::exit(0),
        };

        match Request::decode(&buf[..len]) {
            Some(Request::Open(path)) => {
                if !policy.allows(&path) {
                    // Confinement bypass attempt. Refuse to continue
                    // existing; no response goes back.
                    log::error!(
                        "broker: request for {:?} outside {}, terminating",
                        String::from_utf8_lossy(&path),
                        policy.root().display(),
                    );
                    process::exit(1);
                }

                let (errno, fd) = open_node(&path);
                let code = errno.to_ne_bytes();
                let _ = proto::send(
                    sock.as_raw_fd(),
                    fd.as_ref().map(|fd| fd.as_raw_fd()),
                    &code,
                );
                // `fd` drops here: the broker never keeps a copy past the
                // transfer attempt.
            }
            Some(Request::End) => {
                let _ = proto::send(sock.as_raw_fd(), None, &[]);
                process::exit(0);
            }
            None => {
                log::warn!("broker: ignoring undecodable {len}-byte message");
            }
        }
    }
}

/// Open a device node read-only, capturing the platform error code.
///
/// Returns `(0, Some(fd))` on success, `(errno, None)` on failure. The
/// flags match what an input backend needs: non-blocking, no controlling
/// terminal, close-on-exec.
fn open_node(path: &[u8]) -> (i32, Option<OwnedFd>) {
    let Ok(cpath) = CString::new(path) else {
        return (libc::EINVAL, None);
    };

    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOCTTY | libc::O_NONBLOCK,
        )
    };
    if fd < 0 {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EIO);
        (errno, None)
    } else {
        (0, Some(unsafe { OwnedFd::from_raw_fd(fd) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_allows_paths_under_root() {
        let policy = Policy::new("/dev/input/");
        assert!(policy.allows(b"/dev/input/event0"));
        assert!(policy.allows(b"/dev/input/by-id/usb-kbd"));
    }

    #[test]
    fn test_policy_rejects_paths_outside_root() {
        let policy = Policy::new("/dev/input/");
        assert!(!policy.allows(b"/etc/shadow"));
        assert!(!policy.allows(b"/dev/inpu"));
        assert!(!policy.allows(b""));
        // A prefix of the root is not under the root.
        assert!(!policy.allows(b"/dev/"));
    }

    #[test]
    fn test_policy_does_not_canonicalize() {
        // The match is textual: traversal that only *starts* under the
        // root still passes. Pinned here so a change is a conscious one.
        let policy = Policy::new("/dev/input/");
        assert!(policy.allows(b"/dev/input/../../etc/shadow"));
    }

    #[test]
    fn test_policy_without_trailing_slash_matches_textually() {
        // "/dev/input" also admits "/dev/inputfoo"; callers who care use
        // a trailing slash, as the conventional prefix does.
        let policy = Policy::new("/dev/input");
        assert!(policy.allows(b"/dev/input/event0"));
        assert!(policy.allows(b"/dev/inputfoo"));
    }

    #[test]
    fn test_open_node_missing_path() {
        let (errno, fd) = open_node(b"/nonexistent/devbroker-test");
        assert_eq!(errno, libc::ENOENT);
        assert!(fd.is_none());
    }

    #[test]
    fn test_open_node_existing_file() {
        let scratch = tempfile::NamedTempFile::new().unwrap();
        let (errno, fd) = open_node(scratch.path().as_os_str().as_bytes());
        assert_eq!(errno, 0);
        assert!(fd.is_some());
    }
}
