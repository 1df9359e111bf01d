// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use proptest::prelude::*;
use rstest::rstest;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::flags::FlagType;
use spackle_foundation::variant::VariantValue;
use spackle_foundation::version_range::parse_version_list;

use super::{SpecParser, parse, parse_one_or_raise};
use crate::{Context, Error, ParseError};

#[rstest]
fn test_parse_benchmark_spec() {
    let text = "mvapich_foo ^_openmpi@1.2:1.4,1.6+debug~qt_4 %intel@12.1 ^stackwalker@8.1_1e";
    let spec = parse_one_or_raise(text).unwrap();
    let root = spec.root();
    assert_eq!(spec.name().unwrap(), "mvapich_foo");

    let deps: Vec<_> = spec
        .dependencies(root, DepFlag::ALL)
        .into_iter()
        .map(|id| spec.node(id).display_name().to_owned())
        .collect();
    assert_eq!(deps, vec!["_openmpi", "stackwalker"]);

    let openmpi = spec.find("_openmpi").unwrap();
    let node = spec.node(openmpi);
    assert_eq!(node.versions, parse_version_list("1.2:1.4,1.6").unwrap());
    assert_eq!(node.variants["debug"].value, VariantValue::Bool(true));
    assert_eq!(node.variants["qt_4"].value, VariantValue::Bool(false));

    let intel = spec.find("intel").unwrap();
    let edge = spec.edge_between(openmpi, intel).unwrap();
    assert!(edge.direct());
    assert_eq!(edge.depflag(), DepFlag::BUILD);
    assert_eq!(spec.node(intel).versions, parse_version_list("12.1").unwrap());
    assert!(spec.edge_between(root, intel).is_none());

    let stackwalker = spec.find("stackwalker").unwrap();
    assert_eq!(
        spec.node(stackwalker).versions,
        parse_version_list("8.1_1e").unwrap()
    );
    assert_eq!(spec.to_string(), text);
}

#[rstest]
fn test_duplicate_dependency_is_merged() {
    let spec = parse_one_or_raise("x ^y@foo ^y@foo").unwrap();
    assert_eq!(spec.edges().len(), 1);
    let y = spec.find("y").unwrap();
    assert_eq!(spec.node(y).versions, parse_version_list("foo").unwrap());
    assert_eq!(spec.to_string(), "x ^y@foo");
}

#[rstest]
fn test_compatible_duplicates_are_intersected() {
    let spec = parse_one_or_raise("x ^y@1: ^y@:2 +shared").unwrap();
    let y = spec.find("y").unwrap();
    assert_eq!(spec.node(y).versions, parse_version_list("1:2").unwrap());
    assert!(spec.node(y).variants.contains_key("shared"));
    assert!(spec.deferred_conflicts().is_empty());
}

#[rstest]
#[case("x@1.0 @2.0", "version")]
#[case("x ^y@1.0 ^y@2.0", "version")]
#[case("x +debug ~debug", "variant 'debug'")]
#[case("x cflags=-O3 cflags=-O2", "cflags")]
fn test_conflicts_are_deferred(#[case] text: &str, #[case] attribute: &str) {
    let mut spec = parse_one_or_raise(text).unwrap();
    let conflicts = spec.deferred_conflicts();
    assert_eq!(conflicts.len(), 1, "{conflicts:?}");
    assert!(
        conflicts[0].attribute.starts_with(attribute),
        "{}",
        conflicts[0].attribute
    );
    assert!(matches!(spec.mark_concrete(), Err(Error::Unsatisfiable(_))));
}

#[rstest]
fn test_flags_append_under_context_policy() {
    let mut config = spackle_config::Config::default();
    config.concretizer.flag_merge = spackle_config::FlagMergePolicy::Append;
    let context = Context::with_host(
        std::sync::Arc::new(config),
        spackle_foundation::arch::ArchSpec::default(),
    );
    let spec = SpecParser::new(&context)
        .parse_one_or_raise("x cflags=-O3 cflags=-O2")
        .unwrap();
    assert!(spec.deferred_conflicts().is_empty());
    assert_eq!(
        spec.root_node().flags[&FlagType::Cflags].flags,
        vec!["-O3", "-O2"]
    );
}

#[rstest]
#[case("_openmpi +debug-qt_4", &[("debug-qt_4", true)])]
#[case("_openmpi +debug -qt_4", &[("debug", true), ("qt_4", false)])]
#[case("_openmpi +debug~qt_4", &[("debug", true), ("qt_4", false)])]
#[case("_openmpi ~debug+qt_4", &[("debug", false), ("qt_4", true)])]
fn test_adjacent_variants_take_longest_name(#[case] text: &str, #[case] expected: &[(&str, bool)]) {
    let spec = parse_one_or_raise(text).unwrap();
    let variants = &spec.root_node().variants;
    assert_eq!(variants.len(), expected.len());
    for (name, enabled) in expected {
        assert_eq!(variants[*name].value, VariantValue::Bool(*enabled));
    }
}

#[rstest]
fn test_whitespace_around_operators() {
    let spaced = parse_one_or_raise("a @ 1.2 : 1.4 + foo % intel @ 12.1").unwrap();
    let compact = parse_one_or_raise("a@1.2:1.4+foo %intel@12.1").unwrap();
    assert_eq!(spaced, compact);
}

#[rstest]
fn test_compiler_attaches_to_latest_dependency() {
    let spec = parse_one_or_raise("a %gcc ^b %clang ^c").unwrap();
    let root = spec.root();
    let gcc = spec.find("gcc").unwrap();
    let b = spec.find("b").unwrap();
    let clang = spec.find("clang").unwrap();
    let c = spec.find("c").unwrap();
    assert!(spec.edge_between(root, gcc).unwrap().direct());
    assert!(spec.edge_between(b, clang).unwrap().direct());
    assert!(spec.edge_between(root, clang).is_none());
    assert!(!spec.edge_between(root, c).unwrap().direct());
}

#[rstest]
fn test_compiler_node_takes_its_own_attributes() {
    let spec = parse_one_or_raise("a %gcc@12 +bootstrap languages=c,c++").unwrap();
    assert!(spec.root_node().variants.is_empty());
    let gcc = spec.node(spec.find("gcc").unwrap());
    assert_eq!(gcc.variants["bootstrap"].value, VariantValue::Bool(true));
    assert_eq!(
        gcc.variants["languages"].value,
        VariantValue::Abstract(["c".to_owned(), "c++".to_owned()].into())
    );
}

#[rstest]
fn test_edge_properties() {
    let spec =
        parse_one_or_raise("a ^[virtuals=mpi deptypes=build,link] mpich %[virtuals=c,cxx] gcc")
            .unwrap();
    let root = spec.root();
    let mpich = spec.find("mpich").unwrap();
    let gcc = spec.find("gcc").unwrap();

    let edge = spec.edge_between(root, mpich).unwrap();
    assert!(!edge.direct());
    assert_eq!(edge.depflag(), DepFlag::BUILD | DepFlag::LINK);
    assert!(edge.virtuals().contains("mpi"));

    let edge = spec.edge_between(mpich, gcc).unwrap();
    assert!(edge.direct());
    assert_eq!(edge.depflag(), DepFlag::BUILD);
    assert_eq!(edge.virtuals().len(), 2);
}

#[rstest]
fn test_edge_when_condition_is_kept() {
    let spec = parse_one_or_raise("app ^[when='+mpi' virtuals=mpi] mpich").unwrap();
    let mpich = spec.find("mpich").unwrap();
    let edge = spec.edge_between(spec.root(), mpich).unwrap();
    assert_eq!(edge.attributes.when.as_deref(), Some("+mpi"));
}

#[rstest]
fn test_key_value_pairs() {
    let spec = parse_one_or_raise(
        "hdf5 cflags=\"-O3 -g\" ldflags==-L/opt/lib api=v18 fabrics=ucx,ofi shared=True",
    )
    .unwrap();
    let node = spec.root_node();
    assert_eq!(node.flags[&FlagType::Cflags].flags, vec!["-O3", "-g"]);
    assert!(!node.flags[&FlagType::Cflags].propagate);
    assert!(node.flags[&FlagType::Ldflags].propagate);
    assert_eq!(
        node.variants["api"].value,
        VariantValue::Abstract(["v18".to_owned()].into())
    );
    assert_eq!(node.variants["fabrics"].value.values().len(), 2);
    assert_eq!(node.variants["shared"].value, VariantValue::Bool(true));
}

#[rstest]
fn test_architecture_keys() {
    let spec = parse_one_or_raise("zlib arch=linux-ubuntu22_04-x86_64").unwrap();
    let arch = &spec.root_node().arch;
    assert_eq!(arch.platform.as_deref(), Some("linux"));
    assert_eq!(arch.os.as_deref(), Some("ubuntu22_04"));
    assert_eq!(arch.target.as_deref(), Some("x86_64"));

    let spec = parse_one_or_raise("zlib target=aarch64 os=None").unwrap();
    let arch = &spec.root_node().arch;
    assert_eq!(arch.platform, None);
    assert_eq!(arch.os, None);
    assert_eq!(arch.target.as_deref(), Some("aarch64"));
}

#[rstest]
fn test_namespace_and_hash() {
    let spec = parse_one_or_raise("builtin.zlib /ABC123").unwrap();
    let node = spec.root_node();
    assert_eq!(node.namespace.as_deref(), Some("builtin"));
    assert_eq!(node.display_name(), "zlib");
    assert_eq!(node.abstract_hash.as_deref(), Some("abc123"));
}

#[rstest]
fn test_anonymous_specs() {
    let spec = parse_one_or_raise("+debug").unwrap();
    assert!(spec.name().is_none());
    assert!(spec.root_node().variants.contains_key("debug"));

    let spec = parse_one_or_raise("^zlib@1.3").unwrap();
    assert!(spec.name().is_none());
    assert!(spec.find("zlib").is_some());
}

#[rstest]
fn test_parse_several_specs() {
    let specs = parse("a@1.0 b +x ^c d").unwrap();
    let names: Vec<_> = specs
        .iter()
        .map(|s| s.name().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b", "d"]);
    assert!(specs[1].find("c").is_some());
    assert!(specs[1].root_node().variants.contains_key("x"));

    assert!(parse("").unwrap().is_empty());
    assert!(matches!(
        parse_one_or_raise("a b"),
        Err(Error::SpecCount { count: 2, .. })
    ));
    assert!(matches!(
        parse_one_or_raise("  "),
        Err(Error::SpecCount { count: 0, .. })
    ));
}

#[rstest]
fn test_self_dependency_is_a_cycle() {
    assert!(matches!(parse_one_or_raise("x ^x"), Err(Error::Cycle(_))));
}

#[rstest]
#[case("^", 0)]
#[case("a ^[virtuals=mpi", 2)]
#[case("a ]", 2)]
#[case("a ^[foo=bar] b", 4)]
#[case("a ^[virtuals=mpi] +debug", 2)]
#[case("a ^[deptypes=sideways] b", 4)]
fn test_parse_errors(#[case] text: &str, #[case] offset: usize) {
    match parse(text) {
        Err(Error::Parse(ParseError { offset: found, .. })) => assert_eq!(found, offset),
        other => panic!("expected a parse error for {text:?}, got {other:?}"),
    }
}

#[rstest]
#[case("x ! y", 2)]
#[case("a %", 2)]
fn test_tokenize_errors(#[case] text: &str, #[case] offset: usize) {
    match parse(text) {
        Err(Error::Tokenize(err)) => assert_eq!(err.offset, offset),
        other => panic!("expected a tokenize error for {text:?}, got {other:?}"),
    }
}

#[rstest]
#[case("mvapich_foo ^_openmpi@1.2:1.4,1.6+debug~qt_4 %intel@12.1 ^stackwalker@8.1_1e")]
#[case("zlib@=1.3")]
#[case("zlib@1.2")]
#[case("openmpi@4.1: +cuda fabrics=ucx,ofi")]
#[case("hdf5 cflags=-O3 ldflags==-L/opt/lib")]
#[case("builtin.zlib@1.2 arch=linux-ubuntu22_04-x86_64")]
#[case("hdf5 target=x86_64")]
#[case("py-numpy ^[virtuals=blas,lapack] openblas")]
#[case("mpileaks %[virtuals=c deptypes=build,link] gcc@12")]
#[case("app ^[when=+mpi] mpich")]
#[case("a ^b %c ^d %c")]
#[case("zlib /abcdef")]
#[case("a ++shared ~~static")]
#[case("gcc languages==c,c++")]
#[case("a@git.main=1.2")]
#[case("foo bar=\"a b\"")]
#[case("a b@2: +x")]
fn test_round_trip(#[case] text: &str) {
    let parsed = parse(text).unwrap();
    let printed = parsed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let reparsed = parse(&printed).unwrap();
    assert_eq!(parsed, reparsed, "{text} printed as {printed}");
}

prop_compose! {
    fn arb_node(prefix: &'static str)(
        name in "[a-z][a-z0-9_]{0,5}",
        version in proptest::option::of("[0-9]{1,2}(\\.[0-9]{1,2}){0,2}"),
        bools in proptest::collection::btree_map("[a-z][a-z_]{0,3}", any::<bool>(), 0..3),
        pairs in proptest::collection::btree_map("[a-z]{1,3}v", "[a-z0-9]{1,4}", 0..2),
    ) -> String {
        let mut text = format!("{prefix}{name}");
        if let Some(version) = version {
            text.push_str(&format!("@{version}"));
        }
        for (variant, enabled) in bools {
            text.push_str(if enabled { " +" } else { " ~" });
            text.push_str(&variant);
        }
        for (key, value) in pairs {
            text.push_str(&format!(" {key}={value}"));
        }
        text
    }
}

proptest! {
    #[test]
    fn prop_parse_print_round_trip(
        root in arb_node("r"),
        deps in proptest::collection::vec(arb_node("d"), 0..3),
    ) {
        let mut text = root;
        for (i, dep) in deps.iter().enumerate() {
            // a distinct prefix per dependency keeps names unique
            text.push_str(&format!(" ^{}{i}{}", &dep[..1], &dep[1..]));
        }
        let parsed = parse_one_or_raise(&text).unwrap();
        let reparsed = parse_one_or_raise(&parsed.to_string()).unwrap();
        prop_assert_eq!(parsed, reparsed);
    }
}
