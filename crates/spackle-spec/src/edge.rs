// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeSet;

use itertools::Itertools;
use spackle_foundation::depflag::DepFlag;
use spackle_foundation::variant::quote_if_needed;

use crate::node::NodeId;

/// The attributes of a dependency edge, independent of its endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeAttributes {
    pub depflag: DepFlag,
    /// The virtual packages that the child provides to the parent
    pub virtuals: BTreeSet<String>,
    /// The abstract condition under which the edge was required.
    ///
    /// Kept for provenance only, it is never re-evaluated.
    pub when: Option<String>,
    /// True if the edge was requested with `%` on its parent
    pub direct: bool,
}

impl EdgeAttributes {
    pub fn new(depflag: DepFlag) -> Self {
        Self {
            depflag,
            ..Default::default()
        }
    }

    /// The attributes of a `%` edge
    pub fn direct_build() -> Self {
        Self {
            depflag: DepFlag::BUILD,
            direct: true,
            ..Default::default()
        }
    }

    pub fn with_virtuals<I, S>(mut self, virtuals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.virtuals.extend(virtuals.into_iter().map(Into::into));
        self
    }

    /// Fold other into self, returning true if anything changed.
    pub fn merge(&mut self, other: &EdgeAttributes) -> bool {
        let before = self.clone();
        self.depflag |= other.depflag;
        self.virtuals.extend(other.virtuals.iter().cloned());
        self.direct |= other.direct;
        if self.when.is_none() {
            self.when.clone_from(&other.when);
        }
        *self != before
    }

    /// True if self carries at least what other asks for
    pub fn satisfies(&self, other: &EdgeAttributes) -> bool {
        self.depflag.contains(other.depflag)
            && other.virtuals.is_subset(&self.virtuals)
            && (!other.direct || self.direct)
    }

    /// Format the bracketed form, or nothing if the sigil implies everything.
    ///
    /// A `%` edge implies a direct build dependency, a `^` edge
    /// implies nothing at all.
    pub(crate) fn bracket(&self, sigil: char) -> String {
        let implied = if sigil == '%' {
            DepFlag::BUILD
        } else {
            DepFlag::NONE
        };
        let mut parts = Vec::new();
        if self.depflag != implied {
            parts.push(format!("deptypes={}", self.depflag));
        }
        if !self.virtuals.is_empty() {
            parts.push(format!("virtuals={}", self.virtuals.iter().join(",")));
        }
        if let Some(when) = &self.when {
            parts.push(format!("when={}", quote_if_needed(when)));
        }
        if parts.is_empty() {
            return sigil.to_string();
        }
        format!("{sigil}[{}] ", parts.join(" "))
    }
}

/// A directed dependency edge between two nodes of one spec.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub parent: NodeId,
    pub child: NodeId,
    pub attributes: EdgeAttributes,
}

impl DependencySpec {
    pub fn new(parent: NodeId, child: NodeId, attributes: EdgeAttributes) -> Self {
        Self {
            parent,
            child,
            attributes,
        }
    }

    pub fn depflag(&self) -> DepFlag {
        self.attributes.depflag
    }

    pub fn virtuals(&self) -> &BTreeSet<String> {
        &self.attributes.virtuals
    }

    pub fn direct(&self) -> bool {
        self.attributes.direct
    }

    /// True if this edge should be followed for the given dependency types.
    ///
    /// Edges on abstract specs often carry no type at all, these are
    /// always followed.
    pub fn matches(&self, depflag: DepFlag) -> bool {
        self.attributes.depflag.is_empty() || self.attributes.depflag.intersects(depflag)
    }
}
