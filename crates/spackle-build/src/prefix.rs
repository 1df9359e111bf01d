// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Crash safe replacement of install prefixes.
//!
//! An existing prefix is never deleted before its replacement is
//! complete. It is first renamed to a hidden sibling backup, which is
//! removed on success or renamed back on failure. Renames within one
//! directory are atomic, so after a crash at any point the original
//! prefix, the new prefix, or a clearly named backup is left behind.
//! See [`recover_prefixes`] for cleaning up after such a crash.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./prefix_test.rs"]
mod prefix_test;

const BACKUP_MARKER: &str = ".backup-";
const FAILED_MARKER: &str = ".failed-";

fn sibling(target: &Path, marker: &str) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::internal(format!("invalid install prefix {target:?}")))?;
    Ok(target.with_file_name(format!(".{name}{marker}{}", ulid::Ulid::new())))
}

/// Split a leftover sibling name into its prefix name and marker.
fn parse_sibling(file_name: &str) -> Option<(&str, &'static str)> {
    let hidden = file_name.strip_prefix('.')?;
    [BACKUP_MARKER, FAILED_MARKER]
        .into_iter()
        .find_map(|marker| hidden.rsplit_once(marker).map(|(name, _)| (name, marker)))
}

/// What to do with the prefix of a build that did not succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailedPrefix {
    Remove,
    /// Move aside under a `.failed-` name for post-mortem debugging
    Keep,
}

/// One install into a prefix, which ends in commit or rollback.
///
/// Dropping an unfinished transaction rolls it back, removing the
/// partial prefix and restoring any backup.
#[derive(Debug)]
pub struct PrefixTransaction {
    target: PathBuf,
    backup: Option<PathBuf>,
    finished: bool,
}

impl PrefixTransaction {
    /// Prepare `target` to be installed into.
    ///
    /// If the prefix exists and `overwrite` is false, this fails with
    /// [`Error::PrefixExists`] without touching anything.
    pub async fn begin<P: Into<PathBuf>>(target: P, overwrite: bool) -> Result<Self> {
        let target = target.into();
        let exists = tokio::fs::symlink_metadata(&target).await.is_ok();
        if exists && !overwrite {
            return Err(Error::PrefixExists(target));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::io("create install root", parent, err))?;
        }
        let backup = if exists {
            let backup = sibling(&target, BACKUP_MARKER)?;
            tokio::fs::rename(&target, &backup)
                .await
                .map_err(|err| Error::io("move existing prefix aside", &target, err))?;
            tracing::debug!(prefix = ?target, backup = ?backup, "moved existing prefix aside");
            Some(backup)
        } else {
            None
        };
        if let Err(err) = tokio::fs::create_dir(&target).await {
            let err = Error::io("create install prefix", &target, err);
            if let Some(backup) = &backup {
                if let Err(err) = tokio::fs::rename(backup, &target).await {
                    tracing::warn!(?err, backup = ?backup, "failed to restore prefix backup");
                }
            }
            return Err(err);
        }
        Ok(Self {
            target,
            backup,
            finished: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The location the previous prefix was moved to, if there was one
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Keep the new prefix and discard the backup.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        if let Some(backup) = self.backup.take() {
            tokio::fs::remove_dir_all(&backup)
                .await
                .map_err(|err| Error::io("remove prefix backup", &backup, err))?;
        }
        Ok(())
    }

    /// Discard the new prefix and restore the backup.
    ///
    /// Returns where a kept prefix was moved to.
    pub async fn rollback(mut self, failed: FailedPrefix) -> Result<Option<PathBuf>> {
        self.finished = true;
        let mut kept = None;
        if tokio::fs::symlink_metadata(&self.target).await.is_ok() {
            match failed {
                FailedPrefix::Keep => {
                    let destination = sibling(&self.target, FAILED_MARKER)?;
                    tokio::fs::rename(&self.target, &destination)
                        .await
                        .map_err(|err| Error::io("move failed prefix aside", &self.target, err))?;
                    tracing::info!(prefix = ?destination, "kept prefix of failed build");
                    kept = Some(destination);
                }
                FailedPrefix::Remove => {
                    tokio::fs::remove_dir_all(&self.target)
                        .await
                        .map_err(|err| Error::io("remove failed prefix", &self.target, err))?;
                }
            }
        }
        if let Some(backup) = self.backup.take() {
            tokio::fs::rename(&backup, &self.target)
                .await
                .map_err(|err| Error::io("restore prefix backup", &backup, err))?;
        }
        Ok(kept)
    }
}

impl Drop for PrefixTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(prefix = ?self.target, "install was interrupted, rolling back");
        if let Err(err) = std::fs::remove_dir_all(&self.target) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(?err, prefix = ?self.target, "failed to remove partial prefix");
                return;
            }
        }
        if let Some(backup) = self.backup.take() {
            if let Err(err) = std::fs::rename(&backup, &self.target) {
                tracing::warn!(?err, backup = ?backup, "failed to restore prefix backup");
            }
        }
    }
}

/// The outcome of scanning an install root for leftovers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Backups that were moved back to their missing prefix
    pub restored: Vec<PathBuf>,
    /// Backups and failed prefixes that need a human to decide
    pub leftover: Vec<PathBuf>,
}

/// Clean up after installs that were interrupted by a crash.
///
/// A backup whose prefix no longer exists is moved back into place.
/// A backup next to an existing prefix is ambiguous, since the crash
/// may have happened before or after the new install finished, so it
/// is only reported. Kept failed prefixes are reported as well.
pub async fn recover_prefixes<P: AsRef<Path>>(root: P) -> Result<RecoveryReport> {
    let root = root.as_ref();
    let mut report = RecoveryReport::default();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(Error::io("read install root", root, err)),
    };
    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| Error::io("read install root", root, err))?
    {
        found.push(entry.path());
    }
    found.sort();

    for path in found {
        let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        let Some((name, marker)) = parse_sibling(file_name) else {
            continue;
        };
        let target = root.join(name);
        if marker == BACKUP_MARKER && tokio::fs::symlink_metadata(&target).await.is_err() {
            tokio::fs::rename(&path, &target)
                .await
                .map_err(|err| Error::io("restore prefix backup", &path, err))?;
            tracing::info!(prefix = ?target, "restored prefix from backup");
            report.restored.push(target);
            continue;
        }
        tracing::warn!(path = ?path, "found leftover from an interrupted install");
        report.leftover.push(path);
    }
    Ok(report)
}
