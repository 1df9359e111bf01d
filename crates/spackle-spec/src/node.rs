// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use spackle_foundation::arch::ArchSpec;
use spackle_foundation::digest::SpecHash;
use spackle_foundation::flags::{FlagMap, FlagMergePolicy};
use spackle_foundation::name::PkgName;
use spackle_foundation::variant::VariantMap;
use spackle_foundation::version_range::VersionList;

use crate::error::UnsatisfiableSpecError;

/// The position of a node within the arena of one [`crate::Spec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Marks a node as installed outside of spackle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// The attributes of one package in a spec graph.
///
/// Dependencies are not stored on the node, they are edges of the
/// [`crate::Spec`] that owns it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecNode {
    pub name: Option<PkgName>,
    pub namespace: Option<String>,
    pub versions: VersionList,
    pub variants: VariantMap,
    pub flags: FlagMap,
    pub arch: ArchSpec,
    pub external: Option<ExternalSpec>,
    /// A (possibly abbreviated) dag hash requested with `/hash`
    pub abstract_hash: Option<String>,
    /// The canonical hash of the package recipe, set on concretization
    pub package_hash: Option<SpecHash>,
    /// The original node that this spliced node was rewired from
    pub build_spec: Option<NodeId>,
    pub(crate) concrete: bool,
}

impl SpecNode {
    pub fn new(name: PkgName) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }

    /// The name of this node, or an empty string for anonymous nodes
    pub fn display_name(&self) -> &str {
        self.name.as_ref().map(PkgName::as_str).unwrap_or("")
    }

    pub fn is_concrete(&self) -> bool {
        self.concrete
    }

    pub fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// Explain why this node's own attributes are not fully determined.
    pub fn unresolved(&self) -> Option<String> {
        if self.name.is_none() {
            return Some("node has no name".into());
        }
        if self.versions.concrete().is_none() {
            return Some(format!("version '{}' is not a single version", self.versions));
        }
        if !self.arch.is_concrete() {
            return Some(format!("architecture '{}' is incomplete", self.arch));
        }
        if let Some((name, _)) = self.variants.iter().find(|(_, v)| !v.value.is_concrete()) {
            return Some(format!("variant '{name}' has no resolved kind"));
        }
        None
    }

    /// True if other's attributes differ only in ways self can absorb.
    pub fn intersects(&self, other: &SpecNode, policy: FlagMergePolicy) -> bool {
        self.clone().constrain(other, policy).is_ok()
    }

    /// Narrow this node by the attributes of other.
    ///
    /// Nothing is changed when an error is returned. Returns true if
    /// self was changed.
    pub fn constrain(
        &mut self,
        other: &SpecNode,
        policy: FlagMergePolicy,
    ) -> Result<bool, UnsatisfiableSpecError> {
        let pkg = self
            .name
            .as_ref()
            .or(other.name.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default();
        let conflict = |c| UnsatisfiableSpecError::from_conflict(pkg.clone(), c);

        if self.concrete {
            if self.satisfies(other) {
                return Ok(false);
            }
            return Err(UnsatisfiableSpecError::new(&pkg, "concrete node", &*self, other));
        }
        let mut candidate = self.clone();
        let mut changed = false;
        match (&candidate.name, &other.name) {
            (Some(a), Some(b)) if a != b => {
                return Err(UnsatisfiableSpecError::new(&pkg, "name", a, b));
            }
            (None, Some(b)) => {
                candidate.name = Some(b.clone());
                changed = true;
            }
            _ => {}
        }
        changed |= merge_option(&mut candidate.namespace, &other.namespace)
            .map_err(|(a, b)| UnsatisfiableSpecError::new(&pkg, "namespace", a, b))?;
        changed |= candidate.versions.constrain(&other.versions).map_err(conflict)?;
        changed |= candidate.variants.constrain(&other.variants).map_err(conflict)?;
        changed |= candidate
            .flags
            .constrain(&other.flags, policy)
            .map_err(conflict)?;
        changed |= candidate.arch.constrain(&other.arch).map_err(conflict)?;
        changed |= merge_option(&mut candidate.external, &other.external).map_err(|(a, b)| {
            UnsatisfiableSpecError::new(&pkg, "external", format!("{a:?}"), format!("{b:?}"))
        })?;
        match (&candidate.abstract_hash, &other.abstract_hash) {
            (Some(a), Some(b)) if a.starts_with(b.as_str()) => {}
            (Some(a), Some(b)) if b.starts_with(a.as_str()) => {
                candidate.abstract_hash = Some(b.clone());
                changed = true;
            }
            (Some(a), Some(b)) => {
                return Err(UnsatisfiableSpecError::new(&pkg, "hash", a, b));
            }
            (None, Some(b)) => {
                candidate.abstract_hash = Some(b.clone());
                changed = true;
            }
            _ => {}
        }
        *self = candidate;
        Ok(changed)
    }

    /// True if every attribute of other is satisfied by self.
    ///
    /// Names are compared exactly; virtual names and hash prefixes
    /// need the whole graph and are checked by [`crate::Spec::satisfies`].
    pub fn satisfies(&self, other: &SpecNode) -> bool {
        if other.name.is_some() && self.name != other.name {
            return false;
        }
        self.satisfies_attributes(other)
    }

    /// [`Self::satisfies`] without comparing names
    pub(crate) fn satisfies_attributes(&self, other: &SpecNode) -> bool {
        if other.namespace.is_some() && self.namespace != other.namespace {
            return false;
        }
        if other.external.is_some() && self.external != other.external {
            return false;
        }
        self.versions.satisfies(&other.versions)
            && self.variants.satisfies(&other.variants)
            && self.flags.satisfies(&other.flags)
            && self.arch.satisfies(&other.arch)
    }

    /// Compare the attributes of two nodes, ignoring arena positions.
    pub(crate) fn same_attributes(&self, other: &SpecNode) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.versions == other.versions
            && self.variants == other.variants
            && self.flags == other.flags
            && self.arch == other.arch
            && self.external == other.external
            && self.abstract_hash == other.abstract_hash
            && self.package_hash == other.package_hash
            && self.concrete == other.concrete
    }
}

fn merge_option<T: Clone + PartialEq>(
    mine: &mut Option<T>,
    theirs: &Option<T>,
) -> Result<bool, (T, T)> {
    match (mine.as_ref(), theirs) {
        (Some(a), Some(b)) if a != b => Err((a.clone(), b.clone())),
        (None, Some(b)) => {
            *mine = Some(b.clone());
            Ok(true)
        }
        _ => Ok(false),
    }
}

impl std::fmt::Display for SpecNode {
    /// Format this node as it would be written in a spec string.
    ///
    /// Anonymous nodes start directly with their first attribute.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        if let Some(ns) = &self.namespace {
            if self.name.is_some() {
                write!(out, "{ns}.")?;
            }
        }
        out.push_str(self.display_name());
        if !self.versions.is_any() {
            write!(out, "@{}", self.versions)?;
        }
        let variants = self.variants.to_string();
        out.push_str(&variants);
        if !self.flags.is_empty() {
            write!(out, " {}", self.flags)?;
        }
        if !self.arch.is_empty() {
            write!(out, " {}", self.arch)?;
        }
        if let Some(hash) = &self.abstract_hash {
            write!(out, " /{hash}")?;
        }
        f.write_str(out.trim_start())
    }
}
