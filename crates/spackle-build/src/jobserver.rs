// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! A pool of job tokens shared by every build process in one install.
//!
//! The pool is a named pipe holding one byte per token, the same
//! protocol that `make` and `ninja` speak through `--jobserver-auth`.
//! Reading a byte takes a token and writing it back returns it, so
//! tools that understand the protocol can share the pool with the
//! installer across process boundaries.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tokio::net::unix::pipe;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./jobserver_test.rs"]
mod jobserver_test;

const TOKEN: u8 = b'+';

/// Counts from shutting down a jobserver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenAudit {
    /// The number of tokens the pool was created with
    pub expected: usize,
    /// The number of tokens found in the pool at shutdown
    pub returned: usize,
}

impl TokenAudit {
    /// Tokens taken from the pool and never given back
    pub fn leaked(&self) -> usize {
        self.expected.saturating_sub(self.returned)
    }

    pub fn is_clean(&self) -> bool {
        self.expected == self.returned
    }
}

pub struct Jobserver {
    size: usize,
    path: PathBuf,
    receiver: pipe::Receiver,
    /// Non-blocking handle used to fill, refill and drain the pool
    pool: Arc<File>,
    // removed last, once both ends are closed
    _dir: tempfile::TempDir,
}

impl Jobserver {
    /// Create a pool holding `size` tokens.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let dir = tempfile::Builder::new()
            .prefix("spackle-jobserver-")
            .tempdir()
            .map_err(|err| Error::io("create jobserver directory", std::env::temp_dir(), err))?;
        let path = dir.path().join("fifo");
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|errno| Error::io("create jobserver fifo", &path, errno.into()))?;
        // opened for both reading and writing so that the fifo never
        // sees end-of-file and tokens stay buffered while no build runs
        let pool = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .map_err(|err| Error::io("open jobserver fifo", &path, err))?;
        (&pool)
            .write_all(&vec![TOKEN; size])
            .map_err(|err| Error::io("fill jobserver fifo", &path, err))?;
        let receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&path)
            .map_err(|err| Error::io("open jobserver fifo for reading", &path, err))?;
        tracing::debug!(%size, path = ?path, "started jobserver");
        Ok(Self {
            size,
            path,
            receiver,
            pool: Arc::new(pool),
            _dir: dir,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The value given to build tools as `--jobserver-auth`
    pub fn auth(&self) -> String {
        format!("fifo:{}", self.path.display())
    }

    /// Wait for a token to become available and take it.
    ///
    /// The token goes back into the pool when dropped.
    pub async fn acquire(&self) -> Result<JobToken> {
        let mut buf = [0u8; 1];
        loop {
            self.receiver
                .readable()
                .await
                .map_err(|err| Error::io("wait on jobserver fifo", &self.path, err))?;
            match self.receiver.try_read(&mut buf) {
                Ok(1) => {
                    return Ok(JobToken {
                        byte: buf[0],
                        pool: Arc::clone(&self.pool),
                    });
                }
                Ok(_) => {
                    return Err(Error::internal("jobserver fifo was closed unexpectedly"));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(Error::io("read jobserver fifo", &self.path, err)),
            }
        }
    }

    /// Shut down the pool and count the tokens that came back.
    ///
    /// A build tool that crashes or misbehaves may keep tokens. This
    /// does not corrupt anything that was installed, so it is logged
    /// as a warning rather than failing the install.
    pub fn finish(self) -> TokenAudit {
        let mut returned = 0;
        let mut buf = [0u8; 64];
        loop {
            match (&*self.pool).read(&mut buf) {
                Ok(0) => break,
                Ok(count) => returned += count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(?err, path = ?self.path, "failed to drain jobserver fifo");
                    break;
                }
            }
        }
        let audit = TokenAudit {
            expected: self.size,
            returned,
        };
        if audit.leaked() > 0 {
            tracing::warn!(
                leaked = audit.leaked(),
                size = self.size,
                "some jobserver tokens were never returned, a build tool may have crashed"
            );
        } else if returned > self.size {
            tracing::warn!(
                extra = returned - self.size,
                size = self.size,
                "more jobserver tokens were returned than were handed out"
            );
        }
        audit
    }
}

/// Permission to run one job, returned to the pool on drop.
pub struct JobToken {
    byte: u8,
    pool: Arc<File>,
}

impl Drop for JobToken {
    fn drop(&mut self) {
        if let Err(err) = (&*self.pool).write_all(&[self.byte]) {
            tracing::warn!(?err, "failed to return a jobserver token");
        }
    }
}
