// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

const FIRST_RETRY: Duration = Duration::from_millis(5);
const MAX_RETRY: Duration = Duration::from_millis(200);

/// The kind of access a lock grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockKind {
    /// Any number of shared locks may be held together
    Shared,
    /// Excludes every other lock on the same file
    Exclusive,
}

impl LockKind {
    fn arg(self) -> FlockArg {
        match self {
            Self::Shared => FlockArg::LockSharedNonblock,
            Self::Exclusive => FlockArg::LockExclusiveNonblock,
        }
    }
}

/// An advisory lock on a file, shared between processes.
///
/// The lock is released when this value is dropped. The lock file
/// itself is left in place so that it can be reused.
pub struct FileLock {
    path: PathBuf,
    kind: LockKind,
    _lock: Flock<std::fs::File>,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl FileLock {
    /// Lock the file at `path`, creating it if needed.
    ///
    /// A lock that cannot be acquired within `timeout` is treated as a
    /// likely deadlock and reported as [`Error::LockTimeout`].
    pub async fn acquire<P: AsRef<Path>>(
        path: P,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref().to_owned();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::io("create lock directory", parent, err))?;
        }
        let started = Instant::now();
        let mut delay = FIRST_RETRY;
        loop {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|err| Error::io("open lock file", &path, err))?;
            match Flock::lock(file, kind.arg()) {
                Ok(lock) => {
                    tracing::trace!(path = ?path, %kind, "acquired lock");
                    return Ok(Self {
                        path,
                        kind,
                        _lock: lock,
                    });
                }
                Err((_, Errno::EWOULDBLOCK)) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(Error::LockTimeout { path, waited });
                    }
                    tokio::time::sleep(delay.min(timeout - waited)).await;
                    delay = (delay * 2).min(MAX_RETRY);
                }
                Err((_, errno)) => {
                    return Err(Error::io("lock file", path, std::io::Error::from(errno)));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }
}
