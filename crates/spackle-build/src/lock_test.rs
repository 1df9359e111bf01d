// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::time::Duration;

use rstest::rstest;

use super::{FileLock, LockKind};
use crate::Error;

const SHORT: Duration = Duration::from_millis(50);

#[rstest]
#[tokio::test]
async fn test_shared_locks_coexist() {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("nested/db.lock");
    let first = FileLock::acquire(&path, LockKind::Shared, SHORT).await.unwrap();
    let second = FileLock::acquire(&path, LockKind::Shared, SHORT).await.unwrap();
    assert_eq!(first.kind(), LockKind::Shared);
    assert_eq!(second.path(), path);
}

#[rstest]
#[case(LockKind::Shared, LockKind::Exclusive)]
#[case(LockKind::Exclusive, LockKind::Shared)]
#[case(LockKind::Exclusive, LockKind::Exclusive)]
#[tokio::test]
async fn test_exclusive_lock_times_out(#[case] held: LockKind, #[case] wanted: LockKind) {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("db.lock");
    let _held = FileLock::acquire(&path, held, SHORT).await.unwrap();
    match FileLock::acquire(&path, wanted, SHORT).await {
        Err(Error::LockTimeout { path: locked, waited }) => {
            assert_eq!(locked, path);
            assert!(waited >= SHORT);
        }
        other => panic!("expected a lock timeout, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn test_lock_released_on_drop() {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("db.lock");
    let held = FileLock::acquire(&path, LockKind::Exclusive, SHORT).await.unwrap();
    let waiter = tokio::spawn({
        let path = path.clone();
        async move { FileLock::acquire(&path, LockKind::Exclusive, Duration::from_secs(5)).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);
    waiter.await.unwrap().unwrap();
}
