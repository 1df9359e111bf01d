// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;
use spackle_spec::fixtures::concrete_graph;

use super::{BuildReport, BuildResult, NodeReport};

fn node(name: &str, result: BuildResult) -> NodeReport {
    let hash = concrete_graph(&[(name, "1.0")], &[]).dag_hash();
    NodeReport::new(name.into(), "1.0".into(), hash, result)
}

fn report(nodes: Vec<NodeReport>) -> BuildReport {
    let mut report = BuildReport::new(chrono::Utc::now());
    report.nodes = nodes;
    report
}

#[rstest]
#[case(BuildResult::Success, true)]
#[case(BuildResult::Skipped, true)]
#[case(BuildResult::Failure, false)]
#[case(BuildResult::Error, false)]
#[case(BuildResult::Blocked, false)]
fn test_is_success(#[case] result: BuildResult, #[case] expected: bool) {
    let report = report(vec![node("zlib", BuildResult::Success), node("hdf5", result)]);
    assert_eq!(report.is_success(), expected);
}

#[rstest]
fn test_summary() {
    let mut failed = node("zlib", BuildResult::Failure);
    failed.message = Some("build exited with status 2".into());
    let mut blocked = node("app", BuildResult::Blocked);
    blocked.chain = vec!["app".into(), "hdf5".into(), "zlib".into()];
    let report = report(vec![node("cmake", BuildResult::Skipped), failed, blocked]);

    let text = report.to_string();
    assert!(text.contains(" failure zlib@1.0/"), "{text}");
    assert!(text.contains(": build exited with status 2"), "{text}");
    assert!(text.contains("(needs app -> hdf5 -> zlib)"), "{text}");
    assert!(text.ends_with("0 installed, 1 skipped, 1 failed, 0 errors, 1 blocked"));
    assert_eq!(report.get("app").unwrap().result, BuildResult::Blocked);
    assert_eq!(report.with_result(BuildResult::Failure).count(), 1);
}

#[rstest]
#[case(7)]
#[case(12)]
fn test_summary_hash_length(#[case] hash_length: usize) {
    let zlib = node("zlib", BuildResult::Success);
    let expected = format!(" success zlib@1.0/{}\n", zlib.hash.short(hash_length));
    let mut report = report(vec![zlib]);
    report.hash_length = hash_length;
    let text = report.to_string();
    assert!(text.starts_with(&expected), "{text}");
}

#[rstest]
fn test_json_uses_lowercase_results() {
    let report = report(vec![node("zlib", BuildResult::Error)]);
    let json = report.to_json().unwrap();
    assert!(json.contains(r#""result": "error""#), "{json}");
    assert!(!json.contains("chain"), "empty chains are left out");
    let read: BuildReport = serde_json::from_str(&json).unwrap();
    assert_eq!(read, report);
}
