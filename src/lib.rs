//! # devbroker
//!
//! A privilege-separated broker for read-only access to Linux input
//! device nodes.
//!
//! Reading `/dev/input/event*` normally requires root (or membership in
//! the `input` group), but running a whole program as root to watch
//! keystrokes is a terrible trade. devbroker keeps the privilege in a
//! tiny forked child instead: the child holds root and answers exactly
//! one kind of question — "open this path under the allowed directory,
//! read-only" — handing the resulting file descriptor back over a
//! `SOCK_SEQPACKET` socketpair via `SCM_RIGHTS`. The rest of the program
//! drops to the invoking user before it ever touches a device.
//!
//! ## Features
//!
//! - Fork-and-drop startup: the caller is verifiably unable to regain
//!   root after [`start`] returns
//! - Path-prefix confinement enforced in the privileged child; a request
//!   outside the prefix terminates the broker rather than erroring
//! - Descriptor transfer with single ownership: the broker closes its
//!   copy the moment it has been sent
//! - Strictly serial request/response protocol, no threads, no timeouts
//!
//! ## Quick Start
//!
//! ```no_run
//! use devbroker::devices;
//!
//! fn main() -> devbroker::Result<()> {
//!     // Requires euid 0, e.g. a setuid binary. Privileges are gone by
//!     // the time start() returns.
//!     let session = devbroker::start(devices::INPUT_DEVICE_DIR)?;
//!
//!     let fd = session.open("/dev/input/event3")?;
//!     // Hand `fd` to your event-decoding layer (evdev, libinput, ...).
//!     drop(fd);
//!
//!     session.finish();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Two single-threaded processes. The supervisor side ([`session`])
//! creates the channel, forks, and drops privileges; the broker side
//! ([`broker`]) validates every request against its [`Policy`] and never
//! returns. At most one request is in flight at a time, and a [`Session`]
//! is single-use: [`Session::finish`] consumes it, sends the shutdown
//! message, and reaps the child.

pub mod broker;
pub mod devices;
pub mod error;
mod proto;
pub mod session;

// Re-exports
pub use broker::{Policy, serve};
pub use devices::{INPUT_DEVICE_DIR, enumerate};
pub use error::{Error, Result};
pub use session::{Session, start};
