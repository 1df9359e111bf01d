// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;

use rstest::rstest;

use super::{Variant, VariantMap, VariantValue, quote_if_needed};

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn map(entries: &[(&str, VariantValue)]) -> VariantMap {
    entries
        .iter()
        .map(|(k, v)| (*k, Variant::new(v.clone())))
        .collect()
}

#[rstest]
#[case("true", VariantValue::Bool(true))]
#[case("FALSE", VariantValue::Bool(false))]
#[case("shared", VariantValue::Abstract(set(&["shared"])))]
#[case("b,a", VariantValue::Abstract(set(&["a", "b"])))]
fn test_from_text(#[case] text: &str, #[case] expected: VariantValue) {
    assert_eq!(VariantValue::from_text(text), expected);
}

#[rstest]
fn test_abstract_constrain_is_union() {
    let mut mine = map(&[("languages", VariantValue::Abstract(set(&["c"])))]);
    let theirs = map(&[("languages", VariantValue::Abstract(set(&["cxx"])))]);
    assert!(mine.constrain(&theirs).unwrap());
    assert_eq!(
        mine["languages"].value,
        VariantValue::Abstract(set(&["c", "cxx"]))
    );
    assert!(!mine.constrain(&theirs).unwrap());
    assert!(mine.satisfies(&theirs));
}

#[rstest]
fn test_bool_conflict() {
    let mut mine = map(&[("debug", VariantValue::Bool(true))]);
    let theirs = map(&[("debug", VariantValue::Bool(false))]);
    let err = mine.constrain(&theirs).unwrap_err();
    assert_eq!(err.attribute, "variant 'debug'");
    assert_eq!(err.left, "true");
    assert_eq!(err.right, "false");
    assert!(!mine.intersects(&theirs));
}

#[rstest]
fn test_single_against_abstract() {
    let mut mine = map(&[("build_type", VariantValue::Single("Release".into()))]);
    let ok = map(&[("build_type", VariantValue::Abstract(set(&["Release"])))]);
    let bad = map(&[("build_type", VariantValue::Abstract(set(&["Debug"])))]);
    assert!(!mine.constrain(&ok).unwrap());
    assert!(mine.satisfies(&ok));
    assert!(mine.constrain(&bad).is_err());
}

#[rstest]
fn test_concrete_multi_cannot_grow() {
    let mut mine = map(&[("languages", VariantValue::Multi(set(&["c", "cxx"])))]);
    let subset = map(&[("languages", VariantValue::Abstract(set(&["c"])))]);
    let superset = map(&[("languages", VariantValue::Abstract(set(&["c", "fortran"])))]);
    assert!(!mine.constrain(&subset).unwrap());
    assert!(mine.satisfies(&subset));
    assert!(mine.constrain(&superset).is_err());
}

#[rstest]
fn test_abstract_becomes_concrete() {
    let mut mine = map(&[("build_type", VariantValue::Abstract(set(&["Release"])))]);
    let concrete = map(&[("build_type", VariantValue::Single("Release".into()))]);
    assert!(mine.constrain(&concrete).unwrap());
    assert!(mine.is_concrete());
}

#[rstest]
fn test_missing_variant_does_not_satisfy() {
    let mine = VariantMap::default();
    let theirs = map(&[("debug", VariantValue::Bool(true))]);
    assert!(!mine.satisfies(&theirs));
    assert!(mine.intersects(&theirs));
}

#[rstest]
fn test_display_orders_bools_first() {
    let mut variants = map(&[
        ("qt_4", VariantValue::Bool(false)),
        ("debug", VariantValue::Bool(true)),
        ("build_type", VariantValue::Single("Release".into())),
    ]);
    variants.insert(
        "shared".into(),
        Variant::propagated(VariantValue::Bool(true)),
    );
    assert_eq!(variants.to_string(), "+debug~qt_4++shared build_type=Release");
}

#[rstest]
#[case("Release", "Release")]
#[case("-O3 -g", "\"-O3 -g\"")]
#[case("say \"hi\"", "'say \"hi\"'")]
fn test_quote_if_needed(#[case] value: &str, #[case] expected: &str) {
    assert_eq!(quote_if_needed(value), expected);
}
