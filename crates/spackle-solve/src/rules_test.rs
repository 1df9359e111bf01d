// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use rstest::{fixture, rstest};
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::variant::VariantValue;
use spackle_foundation::version::parse_version;
use spackle_spec::fixtures::{concrete_graph, diamond};
use spackle_spec::{Spec, parse_one_or_raise};

use super::{ExternalRule, PackageRules, RuleSet};
use crate::Error;

const RECIPES: &str = r#"
- name: mpich
  versions: [{version: "4.1"}]
  provides: [{spec: mpi}]
- name: openmpi
  versions: [{version: "4.1.5"}]
  provides: [{spec: mpi}]
- name: intel-mpi
  versions: [{version: "2021.9"}]
  provides: [{spec: mpi}]
- name: zlib
  versions: [{version: "1.3"}, {version: "1.2.13"}]
"#;

#[fixture]
fn rules() -> RuleSet {
    let mut rules = RuleSet::new();
    rules.add_recipes_yaml(RECIPES).unwrap();
    rules
}

#[rstest]
fn test_virtual_packages(rules: RuleSet) {
    assert!(rules.is_virtual("mpi"));
    assert!(!rules.is_virtual("mpich"));
    assert!(!rules.is_virtual("nothing"));
    let providers: Vec<_> = rules.providers("mpi").iter().map(|r| r.name.to_string()).collect();
    assert_eq!(providers, ["intel-mpi", "mpich", "openmpi"]);
}

#[rstest]
fn test_provider_preferences(mut rules: RuleSet) {
    rules
        .load_packages_yaml(
            r#"
packages:
  all:
    providers:
      mpi: [mpich]
  mpi:
    providers:
      mpi: [openmpi]
"#,
        )
        .unwrap();
    let providers: Vec<_> = rules.providers("mpi").iter().map(|r| r.name.to_string()).collect();
    assert_eq!(providers, ["openmpi", "mpich", "intel-mpi"]);
}

#[rstest]
fn test_version_rank(mut rules: RuleSet) {
    rules
        .load_packages_yaml("packages:\n  zlib:\n    version: ['1.2', '1.3']\n")
        .unwrap();
    let rank = |v: &str| rules.version_rank("zlib", &parse_version(v).unwrap());
    assert_eq!(rank("1.2.13"), 0);
    assert_eq!(rank("1.3"), 1);
    assert_eq!(rank("1.1"), 2);
    assert_eq!(rules.version_rank("mpich", &parse_version("4.1").unwrap()), 0);
}

#[rstest]
fn test_externals_and_buildable(mut rules: RuleSet) {
    rules
        .load_packages_yaml(
            r#"
packages:
  zlib:
    buildable: false
    externals:
      - spec: zlib@1.2.13 +shared
        prefix: /usr
"#,
        )
        .unwrap();
    assert!(!rules.is_buildable("zlib"));
    assert!(rules.is_buildable("mpich"));
    let externals = rules.externals("zlib").unwrap();
    assert_eq!(externals.len(), 1);
    let external = &externals[0];
    assert!(external.is_external());
    assert_eq!(
        external.versions.concrete().unwrap().standard(),
        Some(&parse_version("1.2.13").unwrap())
    );
    assert!(external.variants.contains_key("shared"));
    assert!(rules.externals("mpich").unwrap().is_empty());
}

#[rstest]
#[case("zlib@1.2:", "exact version")]
#[case("zlib ^cmake", "exactly one package")]
fn test_invalid_externals(#[case] spec: &str, #[case] reason: &str) {
    let rule = ExternalRule {
        spec: spec.into(),
        prefix: Some("/usr".into()),
        module: None,
    };
    match rule.to_node().unwrap_err() {
        Error::InvalidRecipe { reason: message, .. } => assert!(message.contains(reason)),
        other => panic!("expected an invalid rule, got {other:?}"),
    }
}

#[rstest]
fn test_invalid_package_rules(mut rules: RuleSet) {
    let external_for_other = PackageRules {
        externals: vec![ExternalRule {
            spec: "mpich@4.1".into(),
            prefix: None,
            module: Some("mpich/4.1".into()),
        }],
        ..Default::default()
    };
    assert!(rules.set_package_rules("zlib", external_for_other).is_err());

    let named_preference = PackageRules {
        variants: Some("zlib+shared".into()),
        ..Default::default()
    };
    assert!(rules.set_package_rules("zlib", named_preference).is_err());
}

#[rstest]
fn test_variant_preferences(mut rules: RuleSet) {
    rules
        .load_packages_yaml(
            "packages:\n  all:\n    variants: '+shared'\n  zlib:\n    variants: '~shared'\n",
        )
        .unwrap();
    let preferences = rules.variant_preferences("zlib").unwrap();
    assert_eq!(preferences.len(), 2);
    assert_eq!(
        preferences[0].variants["shared"].value,
        VariantValue::Bool(false),
        "the package's own preference comes first"
    );
    assert_eq!(rules.variant_preferences("mpich").unwrap().len(), 1);
}

#[rstest]
fn test_reusable_specs(mut rules: RuleSet, diamond: Spec) {
    rules.add_reusable(diamond.clone()).unwrap();
    rules
        .add_reusable(concrete_graph(
            &[("b", "1.0"), ("d", "1.0")],
            &[("b", "d", DepFlag::LINK)],
        ))
        .unwrap();
    let found = rules.reusable("b");
    assert_eq!(found.len(), 1, "identical subgraphs are offered once");
    assert_eq!(found[0].len(), 2);
    assert_eq!(rules.reusable("d").len(), 1);
    assert!(rules.reusable("zlib").is_empty());

    let abstract_spec = parse_one_or_raise("zlib@1.3").unwrap();
    assert!(matches!(
        rules.add_reusable(abstract_spec),
        Err(Error::Spec(spackle_spec::Error::NotConcrete { .. }))
    ));
}

#[rstest]
fn test_spliced_specs_are_not_reused(mut rules: RuleSet, diamond: Spec) {
    let replacement = concrete_graph(&[("d", "2.0")], &[]);
    let spliced = diamond.splice(&replacement, true).unwrap();
    assert!(spliced.is_spliced());
    rules.add_reusable(spliced).unwrap();
    assert!(rules.reusable("a").is_empty());
    assert_eq!(rules.reusable("d").len(), 1);
}
