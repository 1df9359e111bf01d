// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::time::Duration;

use rstest::rstest;

use super::FileCache;
use crate::Error;
use crate::lock::{FileLock, LockKind};

#[rstest]
#[tokio::test]
async fn test_write_read_remove() {
    let tmpdir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(tmpdir.path(), Duration::from_secs(5));
    assert_eq!(cache.read("tools/make").await.unwrap(), None);
    cache.write("tools/make", b"GNU Make 4.4.1").await.unwrap();
    cache.write("tools/make", b"GNU Make 4.4.2").await.unwrap();
    assert_eq!(
        cache.read("tools/make").await.unwrap().as_deref(),
        Some(b"GNU Make 4.4.2".as_slice())
    );
    assert!(cache.remove("tools/make").await.unwrap());
    assert!(!cache.remove("tools/make").await.unwrap());
    assert_eq!(cache.read("tools/make").await.unwrap(), None);
}

#[rstest]
#[case("")]
#[case("../escape")]
#[case("/etc/passwd")]
#[case("tools/.hidden")]
fn test_invalid_keys(#[case] key: &str) {
    let cache = FileCache::new("/tmp/cache", Duration::from_secs(1));
    assert!(cache.cache_path(key).is_err());
}

#[rstest]
#[tokio::test]
async fn test_locked_entry_times_out() {
    let tmpdir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(tmpdir.path(), Duration::from_millis(50));
    cache.write("tools/ninja", b"1.13.0").await.unwrap();
    let lock_path = tmpdir.path().join("tools/.ninja.lock");
    let held = FileLock::acquire(&lock_path, LockKind::Exclusive, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(
        cache.read("tools/ninja").await,
        Err(Error::LockTimeout { .. })
    ));
    // other keys are not affected
    cache.write("tools/make", b"4.4").await.unwrap();
    drop(held);
    assert!(cache.read("tools/ninja").await.unwrap().is_some());
}
