// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;

use super::PkgName;

#[rstest]
#[case("mvapich_foo")]
#[case("_openmpi")]
#[case("py-numpy")]
#[case("7zip")]
#[case("x")]
fn test_pkg_name_valid(#[case] input: &str) {
    PkgName::new(input).unwrap();
}

#[rstest]
#[case("")]
#[case("-lead")]
#[case("has space")]
#[case("dotted.name")]
#[case("plus+minus")]
fn test_pkg_name_invalid(#[case] input: &str) {
    assert!(PkgName::new(input).is_err());
}

#[rstest]
fn test_pkg_name_error_position() {
    let err = PkgName::new("abc!def").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("pos 3"), "{message}");
    assert!(message.contains("abc > ! < def"), "{message}");
}

#[rstest]
fn test_pkg_name_serde() {
    let name: PkgName = serde_json::from_str("\"zlib\"").unwrap();
    assert_eq!(name, "zlib");
    assert!(serde_json::from_str::<PkgName>("\"-zlib\"").is_err());
    assert_eq!(serde_json::to_string(&name).unwrap(), "\"zlib\"");
}
