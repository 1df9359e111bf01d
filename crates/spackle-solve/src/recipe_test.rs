// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::rstest;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::variant::VariantValue;
use spackle_foundation::version::parse_version;
use spackle_foundation::version_range::parse_version_list;
use spackle_spec::{SpecNode, parse_one_or_raise};

use super::{BuildSystem, PackageRecipe, VariantDecl, VariantKind, canonical_source};
use crate::Error;

const HDF5: &str = r#"
name: hdf5
build_system: cmake
versions:
  - version: "1.14"
  - version: "1.12"
    preferred: true
variants:
  - name: mpi
    default: true
  - name: api
    kind: single
    values: [default, v18, v110]
    default: default
  - name: fortran2003
    when: "@1.14:"
dependencies:
  - spec: mpi
    when: "+mpi"
  - spec: "zlib@1.2:"
    deptypes: [link]
provides:
  - spec: "hdf5-api@2"
    when: "@1.14:"
  - spec: "hdf5-api@1"
conflicts:
  - spec: "api=v18"
    when: "@1.14:"
source: |
  class Hdf5(CMakePackage):
      def cmake_args(self):
          return []
"#;

fn recipe() -> PackageRecipe {
    PackageRecipe::from_yaml(HDF5).unwrap()
}

fn node(text: &str) -> SpecNode {
    parse_one_or_raise(text).unwrap().root_node().clone()
}

#[rstest]
fn test_read_recipe() {
    let recipe = recipe();
    assert_eq!(recipe.name, "hdf5");
    assert_eq!(recipe.build_system, BuildSystem::CMake);
    assert!(recipe.versions[1].preferred);
    assert_eq!(recipe.dependencies[0].deptypes, DepFlag::BUILD | DepFlag::LINK);
    assert_eq!(recipe.dependencies[1].deptypes, DepFlag::LINK);
    assert!(recipe.version(&parse_version("1.12").unwrap()).is_some());
    assert!(recipe.variant("api").is_some());
}

#[rstest]
#[case("name: x\nversions: []", "no versions")]
#[case("name: x\nversions: [{version: '1'}]\ndependencies: [{spec: '@1.2'}]", "exactly one package")]
#[case("name: x\nversions: [{version: '1'}]\ndependencies: [{spec: 'y ^z'}]", "exactly one package")]
#[case("name: x\nversions: [{version: '1'}]\ndependencies: [{spec: y, deptypes: []}]", "no type")]
#[case("name: x\nversions: [{version: '1'}]\nprovides: [{spec: '@1'}]", "no name")]
#[case("name: x\nversions: [{version: '1'}]\nconflicts: [{spec: '+a', when: '^y'}]", "itself")]
fn test_invalid_recipes(#[case] text: &str, #[case] reason: &str) {
    let err = PackageRecipe::from_yaml(text).unwrap_err();
    match err {
        Error::InvalidRecipe { reason: message, .. } => {
            assert!(message.contains(reason), "{message}")
        }
        other => panic!("expected an invalid recipe, got {other:?}"),
    }
}

#[rstest]
#[case(VariantKind::Bool, &[], None, VariantValue::Bool(false))]
#[case(VariantKind::Single, &["a", "b"], None, VariantValue::Single("a".into()))]
#[case(VariantKind::Multi, &["a", "b"], None, VariantValue::Multi(Default::default()))]
#[case(
    VariantKind::Multi,
    &["a", "b"],
    Some(crate::VariantDefault::Text("a,b".into())),
    VariantValue::Multi(["a".to_string(), "b".to_string()].into())
)]
fn test_variant_defaults(
    #[case] kind: VariantKind,
    #[case] values: &[&str],
    #[case] default: Option<crate::VariantDefault>,
    #[case] expected: VariantValue,
) {
    let decl = VariantDecl {
        name: "v".into(),
        kind,
        values: values.iter().map(ToString::to_string).collect(),
        default,
        when: None,
    };
    assert_eq!(decl.default_value(), expected);
}

#[rstest]
fn test_coerce_requested_values() {
    let recipe = recipe();
    let api = recipe.variant("api").unwrap();
    assert_eq!(
        api.coerce(&VariantValue::from_text("v18")).unwrap(),
        VariantValue::Single("v18".into())
    );
    let err = api.coerce(&VariantValue::from_text("v18,v110")).unwrap_err();
    assert!(err.contains("single variant"), "{err}");
    let err = api.coerce(&VariantValue::from_text("v99")).unwrap_err();
    assert!(err.contains("not a valid value"), "{err}");

    let mpi = recipe.variant("mpi").unwrap();
    assert!(mpi.coerce(&VariantValue::Bool(false)).is_ok());
    assert!(mpi.coerce(&VariantValue::from_text("yes")).is_err());
}

#[rstest]
fn test_conditions() {
    let recipe = recipe();
    assert!(recipe.condition_holds(None, &node("hdf5")).unwrap());
    assert!(recipe.condition_holds(Some("+mpi"), &node("hdf5@=1.14+mpi")).unwrap());
    assert!(!recipe.condition_holds(Some("+mpi"), &node("hdf5@=1.14~mpi")).unwrap());
    assert!(!recipe.condition_holds(Some("+mpi"), &node("hdf5@=1.14")).unwrap());
    assert!(recipe.condition_holds(Some("hdf5@1.14:"), &node("hdf5@=1.14")).unwrap());
    assert!(!recipe.condition_holds(Some("other@1.14:"), &node("hdf5@=1.14")).unwrap());
}

#[rstest]
fn test_active_declarations() {
    let recipe = recipe();
    let active = recipe.active_dependencies(&node("hdf5@=1.14+mpi")).unwrap();
    let names: Vec<_> = active.iter().map(|(n, _)| n.display_name().to_owned()).collect();
    assert_eq!(names, ["mpi", "zlib"]);
    assert_eq!(active[1].0.versions, parse_version_list("1.2:").unwrap());

    let active = recipe.active_dependencies(&node("hdf5@=1.14~mpi")).unwrap();
    assert_eq!(active.len(), 1);

    assert_eq!(recipe.active_conflicts(&node("hdf5@=1.14")).unwrap().len(), 1);
    assert!(recipe.active_conflicts(&node("hdf5@=1.12")).unwrap().is_empty());
}

#[rstest]
fn test_provided_versions() {
    let recipe = recipe();
    assert!(recipe.can_provide("hdf5-api"));
    assert!(!recipe.can_provide("mpi"));
    assert_eq!(
        recipe.provided_versions("hdf5-api", &node("hdf5@=1.12")).unwrap(),
        Some(parse_version_list("1").unwrap())
    );
    assert_eq!(
        recipe.provided_versions("hdf5-api", &node("hdf5@=1.14")).unwrap(),
        Some(parse_version_list("1,2").unwrap())
    );
    assert_eq!(recipe.provided_versions("mpi", &node("hdf5@=1.14")).unwrap(), None);
}

#[rstest]
fn test_package_hash_ignores_formatting() {
    let original = recipe();
    let mut reformatted = original.clone();
    reformatted.source = r#"
class Hdf5(CMakePackage):
    """The hdf5 library."""

    def cmake_args(self):   # no options yet
        return  []
"#
    .into();
    assert_eq!(original.package_hash().unwrap(), reformatted.package_hash().unwrap());

    let mut changed = original.clone();
    changed.source = original.source.replace("[]", "['-DHDF5_ENABLE_Z_LIB_SUPPORT=ON']");
    assert_ne!(original.package_hash().unwrap(), changed.package_hash().unwrap());

    let mut changed = original.clone();
    changed.versions.pop();
    assert_ne!(original.package_hash().unwrap(), changed.package_hash().unwrap());
}

#[rstest]
fn test_package_hash_sees_whitespace_in_literals() {
    let original = canonical_source("args = ['-DFOO=a b']\n");
    let changed = canonical_source("args = ['-DFOO=a  b']\n");
    assert_ne!(original, changed);
    assert_eq!(
        canonical_source("args  =   ['-DFOO=a b']\n"),
        original,
        "whitespace between tokens still does not matter"
    );
}

#[rstest]
#[case("a = 1  # set a\n", "a = 1\n")]
#[case("s = '# not a comment'\n", "s = '# not a comment'\n")]
#[case("\n\n  x   =  2\n\n", "  x = 2\n")]
#[case("\tx = 2\n", "    x = 2\n")]
#[case("def f():\n    '''doc\n    more'''\n    return 1\n", "def f():\n    return 1\n")]
#[case("s = \"a \\\" # b\"\n", "s = \"a \\\" # b\"\n")]
#[case("f( 'a  b' ,   \"c\td\" )\n", "f( 'a  b' , \"c\td\" )\n")]
#[case("x = 'it''s'   +  'ok'\n", "x = 'it''s' + 'ok'\n")]
fn test_canonical_source(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(canonical_source(source), expected);
}
