// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spackle_foundation::digest::SpecHash;
use spackle_spec::serialize::{from_value, to_document};
use spackle_spec::{NodeId, Spec};
use tokio::io::AsyncWriteExt;

use crate::lock::{FileLock, LockKind};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./database_test.rs"]
mod database_test;

/// The version of the on-disk index written by this crate
pub const DATABASE_VERSION: u32 = 1;

const DATABASE_DIR: &str = ".spackle/db";
const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "lock";

/// One installed concrete spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub hash: SpecHash,
    pub name: String,
    pub prefix: PathBuf,
    /// True if the user asked for this package, rather than it being
    /// installed as a dependency of something else
    pub explicit: bool,
    pub installed: DateTime<Utc>,
    /// The serialized graph rooted at this spec
    pub spec: serde_json::Value,
}

impl InstallRecord {
    /// Read back the spec that was installed.
    pub fn spec(&self) -> Result<Spec> {
        Ok(from_value(self.spec.clone())?)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    version: u32,
    installs: BTreeMap<SpecHash, InstallRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    database: Index,
}

/// The record of everything installed under one install root.
///
/// Reads take a shared lock and may run alongside each other, in this
/// process or any other. Writes take an exclusive lock and replace the
/// index with a rename, so readers never see a partial write.
#[derive(Clone, Debug)]
pub struct InstallDatabase {
    root: PathBuf,
    lock_timeout: Duration,
}

impl InstallDatabase {
    pub fn new<P: Into<PathBuf>>(install_root: P, lock_timeout: Duration) -> Self {
        Self {
            root: install_root.into().join(DATABASE_DIR),
            lock_timeout,
        }
    }

    pub fn from_config(config: &spackle_config::Install) -> Self {
        Self::new(
            &config.root,
            Duration::from_secs(config.lock_timeout_seconds),
        )
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    async fn load(&self) -> Result<Index> {
        let path = self.index_path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Index {
                    version: DATABASE_VERSION,
                    ..Default::default()
                });
            }
            Err(err) => return Err(Error::io("read install database", path, err)),
        };
        let file: IndexFile =
            serde_json::from_slice(&data).map_err(|err| Error::CorruptDatabase(path.clone(), err))?;
        if file.database.version > DATABASE_VERSION {
            return Err(Error::internal(format!(
                "install database {path:?} was written by a newer version (v{})",
                file.database.version
            )));
        }
        Ok(file.database)
    }

    async fn save(&self, index: Index) -> Result<()> {
        let path = self.index_path();
        let working = self
            .root
            .join(format!("{INDEX_FILE}.{}.work", ulid::Ulid::new()));
        let data = serde_json::to_vec_pretty(&IndexFile { database: index })?;
        let result = async {
            let mut file = tokio::fs::File::create(&working)
                .await
                .map_err(|err| Error::io("create install database working file", &working, err))?;
            file.write_all(&data)
                .await
                .map_err(|err| Error::io("write install database", &working, err))?;
            file.sync_all()
                .await
                .map_err(|err| Error::io("sync install database", &working, err))?;
            tokio::fs::rename(&working, &path)
                .await
                .map_err(|err| Error::io("replace install database", &path, err))
        }
        .await;
        if result.is_err() {
            if let Err(err) = tokio::fs::remove_file(&working).await {
                tracing::warn!(
                    ?err,
                    path = ?working,
                    "failed to clean up install database working file"
                );
            }
        }
        result
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Index) -> Result<T>,
    {
        let _lock = FileLock::acquire(self.lock_path(), LockKind::Shared, self.lock_timeout).await?;
        let index = self.load().await?;
        f(&index)
    }

    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Index) -> Result<T>,
    {
        let _lock =
            FileLock::acquire(self.lock_path(), LockKind::Exclusive, self.lock_timeout).await?;
        let mut index = self.load().await?;
        let result = f(&mut index)?;
        index.version = DATABASE_VERSION;
        self.save(index).await?;
        Ok(result)
    }

    /// The record for a concrete spec, if it is installed.
    pub async fn installed(&self, hash: &SpecHash) -> Result<Option<InstallRecord>> {
        self.read(|index| Ok(index.installs.get(hash).cloned())).await
    }

    /// Every installed record, ordered by hash.
    pub async fn all(&self) -> Result<Vec<InstallRecord>> {
        self.read(|index| Ok(index.installs.values().cloned().collect()))
            .await
    }

    /// Installed specs that satisfy an abstract request, ordered by
    /// name and then newest install first.
    pub async fn query(&self, request: &Spec) -> Result<Vec<InstallRecord>> {
        let name = request.name().map(ToString::to_string);
        let candidates = self
            .read(|index| {
                Ok(index
                    .installs
                    .values()
                    .filter(|r| name.as_ref().is_none_or(|n| &r.name == n))
                    .cloned()
                    .collect::<Vec<_>>())
            })
            .await?;
        let mut found = Vec::new();
        for record in candidates {
            if record.spec()?.satisfies(request) {
                found.push(record);
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name).then(b.installed.cmp(&a.installed)));
        Ok(found)
    }

    /// Record that one node of a concrete spec was installed.
    pub async fn add(
        &self,
        spec: &Spec,
        id: NodeId,
        prefix: &Path,
        explicit: bool,
    ) -> Result<InstallRecord> {
        if !spec.node(id).is_concrete() {
            return Err(spackle_spec::Error::NotConcrete {
                pkg: spec.node(id).display_name().to_owned(),
                reason: "only concrete specs can be installed".into(),
            }
            .into());
        }
        let installed = spec.extract(id);
        let record = InstallRecord {
            hash: installed.dag_hash(),
            name: installed.root_node().display_name().to_owned(),
            prefix: prefix.to_owned(),
            explicit,
            installed: Utc::now(),
            spec: serde_json::to_value(to_document(&installed))?,
        };
        self.write(|index| {
            // reinstalling never demotes an explicit install
            let explicit = record.explicit
                || index
                    .installs
                    .get(&record.hash)
                    .is_some_and(|existing| existing.explicit);
            let record = InstallRecord {
                explicit,
                ..record
            };
            index.installs.insert(record.hash.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    /// Change whether an install was requested by the user.
    ///
    /// Returns false if nothing with this hash is installed.
    pub async fn mark_explicit(&self, hash: &SpecHash, explicit: bool) -> Result<bool> {
        self.write(|index| match index.installs.get_mut(hash) {
            Some(record) => {
                record.explicit = explicit;
                Ok(true)
            }
            None => Ok(false),
        })
        .await
    }

    /// Forget an install, returning what was removed.
    ///
    /// The prefix itself is left for the caller to remove.
    pub async fn remove(&self, hash: &SpecHash) -> Result<Option<InstallRecord>> {
        self.write(|index| Ok(index.installs.remove(hash))).await
    }
}
