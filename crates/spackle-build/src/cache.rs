// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::lock::{FileLock, LockKind};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

const LOCK_EXT: &str = "lock";

/// Small files stored by key, each guarded by its own lock.
///
/// Reads of one key share a lock, writes to it are exclusive. Keys
/// are relative paths such as `tools/make`.
#[derive(Clone, Debug)]
pub struct FileCache {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FileCache {
    pub fn new<P: Into<PathBuf>>(root: P, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file holding the value for a key.
    pub fn cache_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| {
                    matches!(c, Component::Normal(n) if !n.to_string_lossy().starts_with('.'))
                });
        if !valid {
            return Err(Error::internal(format!("invalid cache key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn lock_path(&self, path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_owned();
        name.push(format!(".{LOCK_EXT}"));
        path.with_file_name(format!(".{}", name.to_string_lossy()))
    }

    async fn lock(&self, path: &Path, kind: LockKind) -> Result<FileLock> {
        FileLock::acquire(self.lock_path(path), kind, self.lock_timeout).await
    }

    /// Read the value stored for a key, if there is one.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.cache_path(key)?;
        let _lock = self.lock(&path, LockKind::Shared).await?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io("read cache entry", path, err)),
        }
    }

    /// Store a value, replacing any previous one.
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.cache_path(key)?;
        let _lock = self.lock(&path, LockKind::Exclusive).await?;
        let working = path.with_file_name(format!(
            ".{}.{}.work",
            path.file_name().unwrap_or_default().to_string_lossy(),
            ulid::Ulid::new()
        ));
        let mut file = tokio::fs::File::create(&working)
            .await
            .map_err(|err| Error::io("create cache working file", &working, err))?;
        if let Err(err) = file.write_all(data).await {
            if let Err(err) = tokio::fs::remove_file(&working).await {
                tracing::warn!(?err, path = ?working, "failed to clean up cache working file");
            }
            return Err(Error::io("write cache entry", working, err));
        }
        drop(file);
        tokio::fs::rename(&working, &path)
            .await
            .map_err(|err| Error::io("replace cache entry", &path, err))
    }

    /// Remove a value, returning false if there was none.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.cache_path(key)?;
        let _lock = self.lock(&path, LockKind::Exclusive).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::io("remove cache entry", path, err)),
        }
    }
}
