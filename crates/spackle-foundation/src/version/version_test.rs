// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::str::FromStr;

use proptest::prelude::*;
use rstest::rstest;

use super::{ConcreteVersion, GitVersion, Version, VersionPart, parse_version};

#[rstest]
#[case("1.2.3", vec![VersionPart::Number(1), VersionPart::Number(2), VersionPart::Number(3)])]
#[case("8.1_1e", vec![
    VersionPart::Number(8),
    VersionPart::Number(1),
    VersionPart::Number(1),
    VersionPart::Alpha("e".into()),
])]
#[case("1.0rc1", vec![
    VersionPart::Number(1),
    VersionPart::Number(0),
    VersionPart::Alpha("rc".into()),
    VersionPart::Number(1),
])]
#[case("develop", vec![VersionPart::Alpha("develop".into())])]
fn test_parse_version_parts(#[case] input: &str, #[case] expected: Vec<VersionPart>) {
    let v = parse_version(input).unwrap();
    assert_eq!(v.parts(), expected.as_slice());
    assert_eq!(v.to_string(), input, "display should preserve the original text");
}

#[rstest]
#[case("")]
#[case("1..2")]
#[case("1.2.")]
#[case(".1")]
#[case("1.2 3")]
#[case("1+2")]
fn test_parse_version_invalid(#[case] input: &str) {
    assert!(parse_version(input).is_err(), "{input} should not parse");
}

#[rstest]
#[case("1.2", "1.10")]
#[case("1.2", "1.2.0")]
#[case("1.2", "1.2a")]
#[case("1.2", "develop")]
#[case("main", "develop")]
#[case("stable", "trunk")]
#[case("999999", "stable")]
#[case("1.0rc1", "1.0.1")]
fn test_version_ordering(#[case] lesser: &str, #[case] greater: &str) {
    let lesser = parse_version(lesser).unwrap();
    let greater = parse_version(greater).unwrap();
    assert!(lesser < greater, "{lesser} should be less than {greater}");
}

#[rstest]
fn test_version_equality_ignores_separators() {
    assert_eq!(parse_version("1.2").unwrap(), parse_version("1-2").unwrap());
    assert_eq!(parse_version("1.2").unwrap(), "1_2");
    assert_ne!(parse_version("1.2").unwrap(), parse_version("1.2.0").unwrap());
}

#[rstest]
#[case("1.2", "1.2.3", true)]
#[case("1.2", "1.2", true)]
#[case("1.2", "1.20", false)]
#[case("1.2.3", "1.2", false)]
fn test_is_prefix_of(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
    let a = parse_version(a).unwrap();
    let b = parse_version(b).unwrap();
    assert_eq!(a.is_prefix_of(&b), expected);
}

#[rstest]
fn test_up_to() {
    let v = parse_version("1.2.3").unwrap();
    assert_eq!(v.up_to(2), "1.2");
    assert_eq!(v.up_to(5), v);
}

#[rstest]
#[case("git.develop", "develop", None)]
#[case("git.v1.2.3=1.2.3", "v1.2.3", Some("1.2.3"))]
#[case(
    "0123456789abcdef0123456789abcdef01234567=2.1",
    "0123456789abcdef0123456789abcdef01234567",
    Some("2.1")
)]
fn test_parse_git_version(
    #[case] input: &str,
    #[case] git_ref: &str,
    #[case] ref_version: Option<&str>,
) {
    let git = GitVersion::from_str(input).unwrap();
    assert_eq!(git.git_ref, git_ref);
    assert_eq!(
        git.ref_version,
        ref_version.map(|v| parse_version(v).unwrap())
    );
    assert_eq!(git.to_string(), input);
}

#[rstest]
fn test_concrete_version_dispatch() {
    assert!(matches!(
        ConcreteVersion::from_str("1.2").unwrap(),
        ConcreteVersion::Standard(_)
    ));
    assert!(matches!(
        ConcreteVersion::from_str("git.main=1.0").unwrap(),
        ConcreteVersion::Git(_)
    ));
    assert!(ConcreteVersion::from_str("git.").is_err());
}

#[rstest]
fn test_version_serde() {
    let v: Version = serde_json::from_str("\"8.1_1e\"").unwrap();
    assert_eq!(serde_json::to_string(&v).unwrap(), "\"8.1_1e\"");
    assert!(serde_json::from_str::<Version>("\"1..\"").is_err());
}

proptest! {
    #[test]
    fn prop_test_numeric_order_matches_tuples(
        a in proptest::collection::vec(0u64..50, 1..5),
        b in proptest::collection::vec(0u64..50, 1..5),
    ) {
        let va = Version::from_parts(a.clone());
        let vb = Version::from_parts(b.clone());
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        prop_assert_eq!(parse_version(va.to_string()).unwrap(), va);
    }
}
