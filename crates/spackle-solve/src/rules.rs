// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spackle_foundation::version::Version;
use spackle_foundation::version_range::{VersionConstraint, VersionList};
use spackle_spec::hash::DAG_HASH;
use spackle_spec::{ExternalSpec, Spec, SpecNode, parse_one_or_raise};

use crate::{Error, PackageRecipe, Result};

#[cfg(test)]
#[path = "./rules_test.rs"]
mod rules_test;

/// The entry in the package rules that applies to every package
pub const ALL_PACKAGES: &str = "all";

/// A package installed outside of spackle.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExternalRule {
    /// A spec naming the exact version that is installed
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ExternalRule {
    /// The node described by this rule, marked as external.
    pub fn to_node(&self) -> Result<SpecNode> {
        let spec = parse_one_or_raise(&self.spec)?;
        let mut node = spec.root_node().clone();
        if node.name.is_none() || spec.len() > 1 {
            return Err(Error::invalid_recipe(
                &self.spec,
                "an external must name exactly one package",
            ));
        }
        // `@1.2` names a single version here, not the range of its patches
        if let [VersionConstraint::Range(range)] = node.versions.items() {
            if let (Some(lo), Some(hi)) = (&range.lo, &range.hi) {
                if lo == hi {
                    node.versions = VersionList::exact(lo.clone());
                }
            }
        }
        if node.versions.concrete().is_none() {
            return Err(Error::invalid_recipe(
                &self.spec,
                "an external must name the exact version installed",
            ));
        }
        node.external = Some(ExternalSpec {
            path: self.prefix.clone(),
            module: self.module.clone(),
        });
        Ok(node)
    }
}

/// User preferences and requirements for one package.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageRules {
    /// Preferred versions, most preferred first
    pub version: Vec<VersionList>,
    /// An anonymous spec holding preferred variant values
    pub variants: Option<String>,
    /// Preferred providers of virtual packages, most preferred first
    pub providers: BTreeMap<String, Vec<String>>,
    pub externals: Vec<ExternalRule>,
    /// If false, only externals and reusable specs can be used
    pub buildable: bool,
}

impl Default for PackageRules {
    fn default() -> Self {
        Self {
            version: Vec::new(),
            variants: None,
            providers: BTreeMap::new(),
            externals: Vec::new(),
            buildable: true,
        }
    }
}

#[derive(Deserialize)]
struct PackagesDocument {
    #[serde(default)]
    packages: BTreeMap<String, PackageRules>,
}

/// Everything the concretizer may choose from, and how to choose.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    recipes: BTreeMap<String, Arc<PackageRecipe>>,
    packages: BTreeMap<String, PackageRules>,
    reusable: Vec<Spec>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe, replacing any other of the same name.
    pub fn add_recipe(&mut self, recipe: PackageRecipe) -> Result<()> {
        recipe.validate()?;
        tracing::trace!(pkg = %recipe.name, "adding recipe");
        self.recipes
            .insert(recipe.name.to_string(), Arc::new(recipe));
        Ok(())
    }

    /// Read a set of recipes from a yaml list.
    pub fn add_recipes_yaml(&mut self, text: &str) -> Result<()> {
        let recipes: Vec<PackageRecipe> = serde_yaml::from_str(text)?;
        for recipe in recipes {
            self.add_recipe(recipe)?;
        }
        Ok(())
    }

    pub fn recipe(&self, name: &str) -> Option<&Arc<PackageRecipe>> {
        self.recipes.get(name)
    }

    pub fn recipes(&self) -> impl Iterator<Item = &Arc<PackageRecipe>> {
        self.recipes.values()
    }

    pub fn set_package_rules(
        &mut self,
        name: impl Into<String>,
        rules: PackageRules,
    ) -> Result<()> {
        let name = name.into();
        validate_rules(&name, &rules)?;
        self.packages.insert(name, rules);
        Ok(())
    }

    /// Read package rules from a yaml document with a `packages` section.
    pub fn load_packages_yaml(&mut self, text: &str) -> Result<()> {
        let document: PackagesDocument = serde_yaml::from_str(text)?;
        for (name, rules) in document.packages {
            self.set_package_rules(name, rules)?;
        }
        Ok(())
    }

    pub fn package_rules(&self, name: &str) -> Option<&PackageRules> {
        self.packages.get(name)
    }

    /// Make a concrete spec, and everything in it, available for reuse.
    pub fn add_reusable(&mut self, spec: Spec) -> Result<()> {
        if !spec.is_concrete() {
            return Err(spackle_spec::Error::NotConcrete {
                pkg: spec.root_node().display_name().to_owned(),
                reason: "only concrete specs can be reused".into(),
            }
            .into());
        }
        self.reusable.push(spec);
        Ok(())
    }

    /// True if no recipe has this name but at least one provides it
    pub fn is_virtual(&self, name: &str) -> bool {
        !self.recipes.contains_key(name) && self.recipes.values().any(|r| r.can_provide(name))
    }

    /// The recipes that can provide a virtual, most preferred first.
    ///
    /// Preferred providers come in the order they are listed, the rest
    /// are sorted by name.
    pub fn providers(&self, virtual_name: &str) -> Vec<&Arc<PackageRecipe>> {
        let preferred: Vec<&String> = [virtual_name, ALL_PACKAGES]
            .into_iter()
            .filter_map(|name| self.packages.get(name))
            .filter_map(|rules| rules.providers.get(virtual_name))
            .flatten()
            .collect();
        let mut providers: Vec<_> = self
            .recipes
            .values()
            .filter(|r| r.can_provide(virtual_name))
            .collect();
        providers.sort_by_key(|r| {
            let rank = preferred
                .iter()
                .position(|p| r.name == p.as_str())
                .unwrap_or(preferred.len());
            (rank, r.name.to_string())
        });
        providers
    }

    /// False if the package may only come from externals or reuse
    pub fn is_buildable(&self, name: &str) -> bool {
        self.packages.get(name).is_none_or(|r| r.buildable)
    }

    /// The externals declared for a package, in the order listed
    pub fn externals(&self, name: &str) -> Result<Vec<SpecNode>> {
        let Some(rules) = self.packages.get(name) else {
            return Ok(Vec::new());
        };
        rules.externals.iter().map(ExternalRule::to_node).collect()
    }

    /// Preferred variant values for a package, its own rules first.
    pub fn variant_preferences(&self, name: &str) -> Result<Vec<SpecNode>> {
        let mut preferences = Vec::new();
        for key in [name, ALL_PACKAGES] {
            if let Some(text) = self.packages.get(key).and_then(|r| r.variants.as_ref()) {
                preferences.push(parse_one_or_raise(text)?.root_node().clone());
            }
        }
        Ok(preferences)
    }

    /// Lower is more preferred; versions matching no preference come last
    pub fn version_rank(&self, name: &str, version: &Version) -> usize {
        let Some(rules) = self.packages.get(name) else {
            return 0;
        };
        let version = version.clone().into();
        rules
            .version
            .iter()
            .position(|list| list.contains_version(&version))
            .unwrap_or(rules.version.len())
    }

    /// Installed specs for a package, one per distinct dag hash.
    ///
    /// Spliced specs are never offered, their originals are.
    pub fn reusable(&self, name: &str) -> Vec<Spec> {
        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        for spec in self.reusable.iter() {
            for id in spec.reachable(spec.roots()) {
                if spec.node(id).display_name() != name {
                    continue;
                }
                let sub = spec.extract(id);
                if sub.is_spliced() {
                    continue;
                }
                if seen.insert(sub.node_hash(sub.root(), &DAG_HASH)) {
                    found.push(sub);
                }
            }
        }
        found
    }
}

fn validate_rules(name: &str, rules: &PackageRules) -> Result<()> {
    for external in rules.externals.iter() {
        let node = external.to_node()?;
        if name != ALL_PACKAGES && node.display_name() != name {
            return Err(Error::invalid_recipe(
                name,
                format!("external '{}' is for another package", external.spec),
            ));
        }
    }
    if let Some(variants) = &rules.variants {
        let spec = parse_one_or_raise(variants)?;
        if spec.len() > 1 || spec.root_node().name.is_some() {
            return Err(Error::invalid_recipe(
                name,
                format!("variant preferences '{variants}' must be anonymous"),
            ));
        }
    }
    Ok(())
}
