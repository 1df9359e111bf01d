// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::str::FromStr;

use rstest::rstest;

use super::DepFlag;

#[rstest]
#[case("build,link", DepFlag::BUILD | DepFlag::LINK)]
#[case("run, test", DepFlag::RUN | DepFlag::TEST)]
#[case("", DepFlag::NONE)]
#[case("test,build,run,link", DepFlag::ALL)]
fn test_parse(#[case] text: &str, #[case] expected: DepFlag) {
    assert_eq!(DepFlag::from_str(text).unwrap(), expected);
}

#[rstest]
fn test_parse_unknown() {
    assert!(DepFlag::from_str("build,bogus").is_err());
}

#[rstest]
fn test_canonical_display() {
    assert_eq!((DepFlag::RUN | DepFlag::BUILD).to_string(), "build,run");
    assert_eq!(
        serde_json::to_string(&DepFlag::LINK_RUN).unwrap(),
        r#"["link","run"]"#
    );
    let flag: DepFlag = serde_json::from_str(r#"["run","link"]"#).unwrap();
    assert_eq!(flag, DepFlag::LINK_RUN);
}

#[rstest]
fn test_set_operations() {
    assert!(DepFlag::ALL.contains(DepFlag::LINK_RUN));
    assert!(!DepFlag::LINK.contains(DepFlag::LINK_RUN));
    assert!(DepFlag::LINK.intersects(DepFlag::LINK_RUN));
    assert!(!DepFlag::BUILD.intersects(DepFlag::LINK_RUN));
    assert!(DepFlag::NONE.is_empty());
    assert_eq!(DepFlag::from_bits(0xff), DepFlag::ALL);
}
