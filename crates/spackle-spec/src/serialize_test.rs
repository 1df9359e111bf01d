// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::variant::VariantValue;

use super::*;
use crate::fixtures::*;
use crate::parse_one_or_raise;

#[rstest]
fn test_json_round_trip(diamond: Spec) {
    let text = diamond.to_json().unwrap();
    let read = Spec::from_json(&text).unwrap();
    assert!(read.is_concrete());
    assert_eq!(read, diamond);
    assert_eq!(read.dag_hash(), diamond.dag_hash());
}

#[rstest]
fn test_yaml_round_trip(mpi_app: Spec) {
    let text = mpi_app.to_yaml().unwrap();
    let read = Spec::from_yaml(&text).unwrap();
    assert_eq!(read, mpi_app);
    assert_eq!(read.dag_hash(), mpi_app.dag_hash());
    let mpich = read.find("mpich").unwrap();
    assert_eq!(read.find_provider("mpi"), Some(mpich));
}

#[rstest]
fn test_abstract_round_trip() {
    let spec = parse_one_or_raise("hdf5@1.10: +mpi api=v18 cflags=-O3 ^zlib").unwrap();
    let read = Spec::from_json(&spec.to_json().unwrap()).unwrap();
    assert!(!read.is_concrete());
    assert_eq!(read, spec);
    assert!(matches!(
        read.root_node().variants["api"].value,
        VariantValue::Abstract(_)
    ));
}

#[rstest]
fn test_document_layout(diamond: Spec) {
    let document = to_document(&diamond);
    assert_eq!(document.spec.meta.version, SPEC_FORMAT_VERSION);
    assert_eq!(document.spec.nodes.len(), 4);

    let root = &document.spec.nodes[0];
    assert_eq!(root.hash.as_deref(), Some(diamond.dag_hash().as_str()));
    let deps: Vec<_> = root
        .dependencies
        .iter()
        .map(|d| (d.name.as_str(), d.parameters.deptypes))
        .collect();
    assert_eq!(deps, vec![("b", DepFlag::LINK_RUN), ("c", DepFlag::BUILD)]);

    let value = serde_json::to_value(&document).unwrap();
    assert_eq!(value["spec"]["_meta"]["version"], 5);
    assert_eq!(value["spec"]["nodes"][0]["version"], "=1.0");
    assert_eq!(
        value["spec"]["nodes"][0]["arch"]["platform_os"],
        "ubuntu22_04"
    );
    assert_eq!(
        value["spec"]["nodes"][0]["dependencies"][0]["parameters"]["deptypes"],
        serde_json::json!(["link", "run"])
    );
}

#[rstest]
fn test_spliced_round_trip(mpi_app: Spec) {
    let replacement = concrete_graph(
        &[("mpich", "4.2"), ("zlib", "1.3")],
        &[("mpich", "zlib", DepFlag::LINK)],
    );
    let spliced = mpi_app.splice(&replacement, false).unwrap();
    assert!(spliced.is_spliced());

    let read = Spec::from_json(&spliced.to_json().unwrap()).unwrap();
    assert_eq!(read.roots().len(), 1, "the original is not a root of its own");
    assert!(read.is_spliced());
    assert_eq!(read, spliced);
    assert_eq!(read.dag_hash(), spliced.dag_hash());
    let original = read.root_node().build_spec.unwrap();
    assert_eq!(read.node_hash(original, &DAG_HASH), mpi_app.dag_hash());
}

#[rstest]
fn test_unreachable_nodes_become_roots(diamond: Spec) {
    let mut document = to_document(&diamond);
    let extra = to_document(&concrete_graph(&[("cmake", "3.27")], &[]));
    document.spec.nodes.extend(extra.spec.nodes);
    let read = from_document(document).unwrap();
    assert_eq!(read.roots().len(), 2);
    assert_eq!(read.node(read.roots()[1]).display_name(), "cmake");
}

#[rstest]
#[case::future_version(
    r#"{"spec": {"_meta": {"version": 7}, "nodes": []}}"#,
    "unsupported format version 7"
)]
#[case::no_nodes(r#"{"spec": {"_meta": {"version": 5}, "nodes": []}}"#, "no nodes")]
#[case::dangling_dependency(
    r#"{"spec": {"_meta": {"version": 5}, "nodes": [
        {"name": "a", "version": "=1", "hash": "x",
         "dependencies": [{"name": "b", "hash": "y", "parameters": {"deptypes": ["link"]}}]}
    ]}}"#,
    "no node with key 'y'"
)]
#[case::duplicate_key(
    r#"{"spec": {"_meta": {"version": 5}, "nodes": [
        {"name": "a", "hash": "x"}, {"name": "b", "hash": "x"}
    ]}}"#,
    "duplicate node key 'x'"
)]
#[case::bad_variant(
    r#"{"spec": {"_meta": {"version": 5}, "nodes": [
        {"name": "a", "parameters": {"shared": 3}}
    ]}}"#,
    "unsupported value for variant 'shared'"
)]
fn test_invalid_documents(#[case] text: &str, #[case] message: &str) {
    match Spec::from_json(text) {
        Err(Error::InvalidDocument(found)) => assert!(found.contains(message), "{found}"),
        other => panic!("expected an invalid document error, got {other:?}"),
    }
}

const LEGACY: &str = r#"
spec:
  nodes:
  - name: libpng
    version: "1.6.39"
    arch:
      platform: linux
      platform_os: ubuntu22_04
      target: x86_64
    compiler:
      name: gcc
      version: "12.3.0"
    parameters:
      shared: true
      cflags: []
      ldflags: []
    hash: 5w4mrzoq2t3rm2hsqfbsbbgbhkqgcdlp
    dependencies:
    - name: zlib
      hash: ksxsqevqqzvlxplqyxhovvzhzmbfpyte
      type: [build, link]
  - name: zlib
    version: "1.3"
    arch:
      platform: linux
      platform_os: ubuntu22_04
      target: x86_64
    compiler:
      name: gcc
      version: "12.3.0"
    parameters:
      optimize: true
      cflags: [-O2]
    full_hash: ksxsqevqqzvlxplqyxhovvzhzmbfpyte
"#;

#[rstest]
fn test_legacy_document_is_migrated() {
    let spec = Spec::from_yaml(LEGACY).unwrap();
    assert!(spec.is_concrete());
    assert_eq!(spec.len(), 3, "one compiler node is shared by both packages");

    let libpng = spec.root();
    let zlib = spec.find("zlib").unwrap();
    let gcc = spec.find("gcc").unwrap();
    assert_eq!(spec.root_node().display_name(), "libpng");
    assert_eq!(spec.node(gcc).versions.to_string(), "=12.3.0");
    assert_eq!(spec.node(gcc).arch, test_arch());

    for parent in [libpng, zlib] {
        let edge = spec.edge_between(parent, gcc).unwrap();
        assert_eq!(edge.depflag(), DepFlag::BUILD);
        assert!(edge.direct());
        assert_eq!(
            edge.virtuals().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["c", "cxx"]
        );
    }
    assert_eq!(
        spec.edge_between(libpng, zlib).unwrap().depflag(),
        DepFlag::BUILD | DepFlag::LINK
    );

    assert!(spec.root_node().flags.is_empty(), "empty flags are dropped");
    assert_eq!(spec.node(zlib).flags.len(), 1);
    assert_eq!(spec.node(zlib).versions.to_string(), "=1.3");
}

#[rstest]
fn test_migrated_document_is_written_as_current() {
    let spec = Spec::from_yaml(LEGACY).unwrap();
    let document = to_document(&spec);
    assert_eq!(document.spec.meta.version, SPEC_FORMAT_VERSION);
    let again = from_document(document).unwrap();
    assert_eq!(again, spec);
}

#[rstest]
fn test_legacy_node_without_hash() {
    let text = r#"{"spec": {"nodes": [{"name": "zlib", "version": "1.3"}]}}"#;
    assert!(matches!(
        Spec::from_json(text),
        Err(Error::InvalidDocument(message)) if message.contains("has no hash")
    ));
}
