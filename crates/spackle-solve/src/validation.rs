// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use enum_dispatch::enum_dispatch;
use spackle_foundation::version_range::VersionList;
use spackle_spec::SpecNode;

use crate::{PackageRecipe, Result, RuleSet, VersionDecl};

#[cfg(test)]
#[path = "./validation_test.rs"]
mod validation_test;

/// Whether a candidate can be used, and why not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

impl std::fmt::Display for Compatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Compatibility::Compatible => f.write_str(""),
            Compatibility::Incompatible(msg) => f.write_str(msg),
        }
    }
}

impl std::ops::Not for &'_ Compatibility {
    type Output = bool;

    fn not(self) -> Self::Output {
        match self {
            Compatibility::Compatible => false,
            Compatibility::Incompatible(_) => true,
        }
    }
}

impl Compatibility {
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::Incompatible(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Compatibility::Compatible)
    }

    pub fn message(&self) -> &str {
        match self {
            Compatibility::Compatible => "",
            Compatibility::Incompatible(msg) => msg,
        }
    }
}

/// Validators decide if a version of a recipe can be built for a request.
#[enum_dispatch]
pub trait ValidatorT {
    /// Check a version of a recipe against the requested node.
    fn validate_version(
        &self,
        _rules: &RuleSet,
        _requested: &SpecNode,
        _recipe: &PackageRecipe,
        _version: &VersionDecl,
    ) -> Result<Compatibility> {
        Ok(Compatibility::Compatible)
    }

    /// Check a node once its version and variants are chosen.
    fn validate_node(&self, _recipe: &PackageRecipe, _node: &SpecNode) -> Result<Compatibility> {
        Ok(Compatibility::Compatible)
    }
}

#[enum_dispatch(ValidatorT)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validators {
    Buildable(BuildableValidator),
    VersionRange(VersionRangeValidator),
    Deprecation(DeprecationValidator),
    Conflicts(ConflictsValidator),
}

/// The validators applied to every new build
pub const fn default_validators() -> &'static [Validators] {
    &[
        Validators::Buildable(BuildableValidator {}),
        Validators::VersionRange(VersionRangeValidator {}),
        Validators::Deprecation(DeprecationValidator {}),
        Validators::Conflicts(ConflictsValidator {}),
    ]
}

/// Ensures that packages marked as not buildable are never built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildableValidator {}

impl ValidatorT for BuildableValidator {
    fn validate_version(
        &self,
        rules: &RuleSet,
        _requested: &SpecNode,
        recipe: &PackageRecipe,
        _version: &VersionDecl,
    ) -> Result<Compatibility> {
        if rules.is_buildable(recipe.name.as_str()) {
            return Ok(Compatibility::Compatible);
        }
        Ok(Compatibility::incompatible(format!(
            "{} is not buildable, only externals or installed specs can be used",
            recipe.name
        )))
    }
}

/// Ensures that the version was asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VersionRangeValidator {}

impl ValidatorT for VersionRangeValidator {
    fn validate_version(
        &self,
        _rules: &RuleSet,
        requested: &SpecNode,
        _recipe: &PackageRecipe,
        version: &VersionDecl,
    ) -> Result<Compatibility> {
        if requested
            .versions
            .contains_version(&version.version.clone().into())
        {
            return Ok(Compatibility::Compatible);
        }
        Ok(Compatibility::incompatible(format!(
            "version {} is not in the requested range {}",
            version.version, requested.versions
        )))
    }
}

/// Ensures that deprecated versions are only used when named exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeprecationValidator {}

impl ValidatorT for DeprecationValidator {
    fn validate_version(
        &self,
        _rules: &RuleSet,
        requested: &SpecNode,
        _recipe: &PackageRecipe,
        version: &VersionDecl,
    ) -> Result<Compatibility> {
        if !version.deprecated
            || requested.versions == VersionList::exact(version.version.clone())
        {
            return Ok(Compatibility::Compatible);
        }
        Ok(Compatibility::incompatible(format!(
            "version {} is deprecated, request it with @={0} to use it anyway",
            version.version
        )))
    }
}

/// Ensures that a node is not one of the combinations its recipe
/// declares as conflicting.
///
/// Conflicts that involve dependencies are checked once the whole
/// graph is known.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConflictsValidator {}

impl ValidatorT for ConflictsValidator {
    fn validate_node(&self, recipe: &PackageRecipe, node: &SpecNode) -> Result<Compatibility> {
        for (conflict, decl) in recipe.active_conflicts(node)? {
            if conflict.len() > 1 {
                continue;
            }
            let mut theirs = conflict.root_node().clone();
            if theirs.name.take().is_some_and(|n| n != recipe.name) {
                continue;
            }
            if node.satisfies(&theirs) {
                let msg = decl.msg.as_deref().unwrap_or("declared as a conflict");
                return Ok(Compatibility::incompatible(format!(
                    "conflicts with '{}': {msg}",
                    decl.spec
                )));
            }
        }
        Ok(Compatibility::Compatible)
    }
}
