//! Error types for the device broker.

use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for devbroker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting or talking to the broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The calling process is not running with elevated privileges.
    ///
    /// Starting the broker requires an effective uid of 0 (typically via a
    /// setuid binary); nothing is forked or opened before this check.
    #[error("needs elevated privilege to read input devices")]
    NotPrivileged,

    /// Creating the broker socketpair failed.
    #[error("failed to create broker channel: {0}")]
    ChannelCreate(Errno),

    /// Forking the broker process failed.
    #[error("failed to fork broker: {0}")]
    Fork(Errno),

    /// Dropping privileges in the supervisor failed.
    #[error("failed to drop privileges: {0}")]
    PrivilegeDrop(Errno),

    /// The privilege drop did not stick: root could still be re-acquired.
    ///
    /// Continuing to run would defeat the separation, so this is fatal
    /// regardless of how far startup got.
    #[error("privilege drop is reversible, refusing to continue")]
    PrivilegeDropFailed,

    /// Sending or receiving on the broker channel failed.
    #[error("broker channel error: {0}")]
    Channel(Errno),

    /// The broker stopped answering (receive retries exhausted, or the
    /// channel reported end-of-file).
    ///
    /// This is also what a caller observes after a confinement violation:
    /// the broker terminates itself without responding.
    #[error("no response from broker")]
    NoResponse,

    /// The broker could not open the requested device node.
    ///
    /// Recoverable: the broker keeps serving, and the caller may skip
    /// this device or try another.
    #[error("failed to open {}: {errno}", path.display())]
    DeviceOpen { path: PathBuf, errno: Errno },

    /// No device node under the confinement root could be opened.
    #[error(
        "no input devices accessible under {}; make sure the binary is \
         setuid root or run from a privileged service",
        .0.display()
    )]
    NoDevices(PathBuf),
}

impl Error {
    /// The raw `-errno` convention used by C-style device-open callbacks
    /// (e.g. libinput's `open_restricted`): the negated platform error
    /// number for an open failure, `None` for every other error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::DeviceOpen { errno, .. } => Some(-(*errno as i32)),
            _ => None,
        }
    }
}
