//! Enumeration of input device nodes through the broker.
//!
//! Every open goes through the session's broker, so this works after the
//! privilege drop. Decoding the events behind the returned descriptors is
//! the caller's business (evdev, libinput, ...); this module only hands
//! out readable handles.

use crate::error::{Error, Result};
use crate::session::Session;
use std::fs;
use std::os::unix::io::OwnedFd;
use std::path::PathBuf;

/// The conventional confinement root for evdev nodes.
pub const INPUT_DEVICE_DIR: &str = "/dev/input/";

/// Open every `event*` node under the session's confinement root.
///
/// Nodes that fail with an ordinary error (vanished between readdir and
/// open, etc.) are skipped with a debug log entry, matching how an input
/// backend treats a flaky device. Fails with [`Error::NoDevices`] if the
/// directory is unreadable or nothing could be opened at all.
pub fn enumerate(session: &Session) -> Result<Vec<(PathBuf, OwnedFd)>> {
    let root = session.root();
    let dir = fs::read_dir(root).map_err(|e| {
        log::debug!("cannot read {}: {}", root.display(), e);
        Error::NoDevices(root.to_path_buf())
    })?;

    let mut nodes = Vec::new();
    for entry in dir.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.starts_with("event") {
            continue;
        }
        match session.open(&path) {
            Ok(fd) => nodes.push((path, fd)),
            Err(e) => log::debug!("skipping {}: {}", path.display(), e),
        }
    }

    if nodes.is_empty() {
        return Err(Error::NoDevices(root.to_path_buf()));
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::{lock, spawn_unprivileged};
    use std::fs;

    #[test]
    fn test_enumerate_opens_only_event_nodes() {
        let _guard = lock();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("event0"), "a").unwrap();
        fs::write(dir.path().join("event1"), "b").unwrap();
        fs::write(dir.path().join("mouse0"), "c").unwrap();
        fs::write(dir.path().join("js0"), "d").unwrap();

        let session = spawn_unprivileged(dir.path());
        let mut nodes = enumerate(&session).unwrap();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let names: Vec<_> = nodes
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["event0", "event1"]);

        session.finish();
    }

    #[test]
    fn test_enumerate_empty_root_is_no_devices() {
        let _guard = lock();
        let dir = tempfile::tempdir().unwrap();
        let session = spawn_unprivileged(dir.path());

        assert!(matches!(enumerate(&session), Err(Error::NoDevices(_))));

        session.finish();
    }
}
