// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;

use rstest::{fixture, rstest};
use spackle_foundation::flags::FlagType;
use spackle_foundation::variant::{Variant, VariantValue};

use super::*;
use crate::Error;
use crate::fixtures::*;
use crate::hash::DAG_HASH;
use crate::parse_one_or_raise;

fn spec(text: &str) -> Spec {
    parse_one_or_raise(text).unwrap()
}

fn names(spec: &Spec, ids: &[NodeId]) -> Vec<String> {
    ids.iter()
        .map(|id| spec.node(*id).display_name().to_owned())
        .collect()
}

/// The diamond, with one variant of each kind set on its nodes
#[fixture]
fn variants(mut diamond: Spec) -> Spec {
    let b = diamond.find("b").unwrap();
    let d = diamond.find("d").unwrap();
    diamond.node_mut(b).variants.insert(
        "api".into(),
        Variant::new(VariantValue::Single("v18".into())),
    );
    diamond
        .node_mut(d)
        .variants
        .insert("shared".into(), Variant::boolean(true));
    diamond.node_mut(d).variants.insert(
        "fabrics".into(),
        Variant::new(VariantValue::Multi(BTreeSet::from(["ofi".to_owned()]))),
    );
    diamond
}

#[rstest]
fn test_mutate_version(mut diamond: Spec) {
    let b = diamond.find("b").unwrap();
    let d = diamond.find("d").unwrap();
    let root_before = diamond.dag_hash();
    let b_before = diamond.node_hash(b, &DAG_HASH);

    let rewritten = diamond
        .mutate(&spec("d"), &spec("d@=1.1"), &PermissiveValidator)
        .unwrap();

    assert_eq!(rewritten, vec![d]);
    assert_eq!(diamond.node(d).versions.to_string(), "=1.1");
    assert!(diamond.is_concrete());
    assert_ne!(diamond.dag_hash(), root_before);
    assert_ne!(diamond.node_hash(b, &DAG_HASH), b_before);
}

#[rstest]
#[case::boolean("d~shared", "d", "shared", VariantValue::Bool(false))]
#[case::single("b api=v110", "b", "api", VariantValue::Single("v110".into()))]
#[case::multi(
    "d fabrics=ucx,ofi",
    "d",
    "fabrics",
    VariantValue::Multi(BTreeSet::from(["ofi".to_owned(), "ucx".to_owned()]))
)]
fn test_mutate_variant_keeps_its_kind(
    mut variants: Spec,
    #[case] mutator: &str,
    #[case] pkg: &str,
    #[case] name: &str,
    #[case] expected: VariantValue,
) {
    let selector = spec(pkg);
    variants
        .mutate(&selector, &spec(mutator), &PermissiveValidator)
        .unwrap();
    let id = variants.find(pkg).unwrap();
    assert_eq!(variants.node(id).variants[name].value, expected);
    assert!(variants.is_concrete());
}

#[rstest]
#[case::bool_for_single("b", "b +api", "takes a single value")]
#[case::two_values_for_single("b", "b api=v18,v110", "takes a single value")]
#[case::unknown_variant("b", "b cxxstd=17", "is not set")]
#[case::version_range("d", "d@1:", "is not a single version")]
#[case::rename("b", "c", "name can not be changed")]
#[case::namespace("b", "b namespace=other", "namespace can not be changed")]
#[case::hash("b", "b /abcdef", "hash and external prefix")]
#[case::missing_dependency("d", "d ^zlib", "no dependency named zlib")]
fn test_invalid_mutations(
    mut variants: Spec,
    #[case] selector: &str,
    #[case] mutator: &str,
    #[case] reason: &str,
) {
    let before = variants.clone();
    let err = variants
        .mutate(&spec(selector), &spec(mutator), &PermissiveValidator)
        .unwrap_err();
    match err {
        Error::Mutation(err) => assert!(err.reason.contains(reason), "{}", err.reason),
        other => panic!("expected a mutation error, got {other:?}"),
    }
    assert_eq!(variants, before, "a failed mutation changes nothing");
}

#[rstest]
fn test_mutate_abstract_spec() {
    let mut abstract_spec = spec("zlib@1.3");
    let err = abstract_spec
        .mutate(&spec("zlib"), &spec("zlib@=1.3.1"), &PermissiveValidator)
        .unwrap_err();
    assert!(matches!(err, Error::Mutation(_)));
}

#[rstest]
fn test_mutate_every_selected_node(mut diamond: Spec) {
    let rewritten = diamond
        .mutate(&spec("target=x86_64"), &spec("cflags=-O2"), &PermissiveValidator)
        .unwrap();
    assert_eq!(names(&diamond, &rewritten), vec!["a", "b", "c", "d"]);
    for id in rewritten {
        assert_eq!(diamond.node(id).flags[&FlagType::Cflags].flags, vec!["-O2"]);
    }
}

#[rstest]
fn test_mutate_dependency_below_selected_node(mut diamond: Spec) {
    let d = diamond.find("d").unwrap();
    let rewritten = diamond
        .mutate(&spec("b"), &spec("b ^d@=2.0"), &PermissiveValidator)
        .unwrap();
    assert_eq!(rewritten, vec![d]);
    assert_eq!(diamond.node(d).versions.to_string(), "=2.0");
}

#[rstest]
fn test_mutate_nothing_selected(mut diamond: Spec) {
    let before = diamond.dag_hash();
    let rewritten = diamond
        .mutate(&spec("zlib"), &spec("zlib@=1.3"), &PermissiveValidator)
        .unwrap();
    assert!(rewritten.is_empty());
    assert_eq!(diamond.dag_hash(), before);
}

#[rstest]
fn test_validator_can_refuse(mut variants: Spec) {
    let before = variants.clone();
    let only_v18 = |node: &SpecNode| -> std::result::Result<(), String> {
        match node.variants.get("api").map(|v| &v.value) {
            Some(VariantValue::Single(api)) if api != "v18" => {
                Err(format!("api={api} is not a valid value"))
            }
            _ => Ok(()),
        }
    };
    let err = variants
        .mutate(&spec("b"), &spec("b api=v110"), &only_v18)
        .unwrap_err();
    assert!(err.to_string().contains("api=v110 is not a valid value"), "{err}");
    assert_eq!(variants, before);
}
