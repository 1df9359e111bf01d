// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::{Read, Write};
use std::time::Duration;

use rstest::rstest;

use super::{Jobserver, TokenAudit};

#[rstest]
#[tokio::test]
async fn test_tokens_are_returned_on_drop() {
    let jobserver = Jobserver::new(2).unwrap();
    assert!(jobserver.auth().starts_with("fifo:"));
    let first = jobserver.acquire().await.unwrap();
    let second = jobserver.acquire().await.unwrap();
    drop(first);
    drop(second);
    let audit = jobserver.finish();
    assert!(audit.is_clean(), "{audit:?}");
}

#[rstest]
#[tokio::test]
async fn test_acquire_waits_for_a_token() {
    let jobserver = Jobserver::new(1).unwrap();
    let held = jobserver.acquire().await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(50), jobserver.acquire()).await;
    assert!(waiting.is_err(), "the pool should be empty");
    drop(held);
    let token = tokio::time::timeout(Duration::from_secs(5), jobserver.acquire())
        .await
        .expect("token should be available again")
        .unwrap();
    drop(token);
    assert!(jobserver.finish().is_clean());
}

#[rstest]
#[tokio::test]
async fn test_zero_size_gets_one_token() {
    let jobserver = Jobserver::new(0).unwrap();
    assert_eq!(jobserver.size(), 1);
    assert_eq!(jobserver.finish(), TokenAudit { expected: 1, returned: 1 });
}

#[rstest]
#[tokio::test]
async fn test_leaked_tokens_are_counted() {
    let jobserver = Jobserver::new(3).unwrap();
    let token = jobserver.acquire().await.unwrap();
    std::mem::forget(token);
    let audit = jobserver.finish();
    assert_eq!(audit.leaked(), 1);
    assert_eq!(audit.returned, 2);
}

#[rstest]
#[tokio::test]
async fn test_tokens_shared_through_the_fifo() {
    let jobserver = Jobserver::new(2).unwrap();
    // behave like another process speaking the protocol
    let mut fifo = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(jobserver.path())
        .unwrap();
    let mut byte = [0u8; 1];
    fifo.read_exact(&mut byte).unwrap();
    let ours = jobserver.acquire().await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(50), jobserver.acquire()).await;
    assert!(waiting.is_err(), "the other process holds the last token");
    fifo.write_all(&byte).unwrap();
    drop(ours);
    assert!(jobserver.finish().is_clean());
}

#[rstest]
#[case(1)]
#[case(4)]
#[case(64)]
#[tokio::test]
async fn test_unused_pool_returns_every_token(#[case] size: usize) {
    let jobserver = Jobserver::new(size).unwrap();
    assert_eq!(jobserver.finish(), TokenAudit { expected: size, returned: size });
}

#[rstest]
#[tokio::test]
async fn test_returned_token_is_readable_by_others() {
    let jobserver = Jobserver::new(1).unwrap();
    let token = jobserver.acquire().await.unwrap();
    drop(token);
    let mut fifo = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(jobserver.path())
        .unwrap();
    let mut byte = [0u8; 1];
    fifo.read_exact(&mut byte).unwrap();
    assert_eq!(&byte, b"+");
    let audit = jobserver.finish();
    assert_eq!(audit.leaked(), 1, "the other process still holds it");
}
