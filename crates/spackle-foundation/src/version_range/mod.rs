// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::fmt::{Display, Write};
use std::str::FromStr;

use enum_dispatch::enum_dispatch;
use itertools::Itertools;
use nom::combinator::all_consuming;
use nom::error::VerboseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Conflict;
use crate::version::{ConcreteVersion, GitVersion, Version};

mod error;
pub mod parsing;

pub use error::{Error, Result};


pub const VERSION_LIST_SEP: &str = ",";

/// The generic trait for all version constraint kinds.
///
/// The [`VersionConstraint`] enum is the public interface and
/// identifies which kind is actually being used.
#[enum_dispatch]
pub trait Ranged: Display + Clone + Into<VersionConstraint> {
    /// The lower, inclusive bound for this constraint
    fn lower(&self) -> Option<&Version>;

    /// The upper bound for this constraint.
    ///
    /// Upper bounds are inclusive of every version that they are a
    /// prefix of, so an upper bound of `1.2` admits `1.2.9`.
    fn upper(&self) -> Option<&Version>;

    /// Return true if the given version is allowed by this constraint
    fn contains_version(&self, version: &ConcreteVersion) -> bool;

    /// The one version allowed by this constraint, if it names exactly one
    fn concrete(&self) -> Option<ConcreteVersion> {
        None
    }
}

/// Exactly one standard version, written `=1.2`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactVersion {
    pub version: Version,
}

impl Display for ExactVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "={}", self.version)
    }
}

impl Ranged for ExactVersion {
    fn lower(&self) -> Option<&Version> {
        Some(&self.version)
    }

    fn upper(&self) -> Option<&Version> {
        Some(&self.version)
    }

    fn contains_version(&self, version: &ConcreteVersion) -> bool {
        version.standard() == Some(&self.version)
    }

    fn concrete(&self) -> Option<ConcreteVersion> {
        Some(ConcreteVersion::Standard(self.version.clone()))
    }
}

/// A range of versions, `lo:hi`, where either side may be open.
///
/// A single version without a colon is the range from and to itself,
/// so `1.2` admits `1.2` and `1.2.3` but not `1.3`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionRange {
    pub lo: Option<Version>,
    pub hi: Option<Version>,
}

impl VersionRange {
    /// The range that admits every version
    pub fn any() -> Self {
        Self::default()
    }

    /// True if at least one version falls in this range
    pub fn is_satisfiable(&self) -> bool {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) => lo <= hi || hi.is_prefix_of(lo),
            _ => true,
        }
    }

    fn admits(&self, version: &Version) -> bool {
        if let Some(lo) = &self.lo {
            if version < lo {
                return false;
            }
        }
        match &self.hi {
            Some(hi) => version <= hi || hi.is_prefix_of(version),
            None => true,
        }
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) if lo == hi && lo.as_str() == hi.as_str() => lo.fmt(f),
            (lo, hi) => {
                if let Some(lo) = lo {
                    lo.fmt(f)?;
                }
                f.write_char(':')?;
                if let Some(hi) = hi {
                    hi.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

impl Ranged for VersionRange {
    fn lower(&self) -> Option<&Version> {
        self.lo.as_ref()
    }

    fn upper(&self) -> Option<&Version> {
        self.hi.as_ref()
    }

    fn contains_version(&self, version: &ConcreteVersion) -> bool {
        match version.standard() {
            Some(v) => self.admits(v),
            None => false,
        }
    }
}

impl Ranged for GitVersion {
    fn lower(&self) -> Option<&Version> {
        self.ref_version.as_ref()
    }

    fn upper(&self) -> Option<&Version> {
        self.ref_version.as_ref()
    }

    fn contains_version(&self, version: &ConcreteVersion) -> bool {
        match version {
            ConcreteVersion::Git(other) => {
                other.git_ref == self.git_ref
                    && (self.ref_version.is_none() || self.ref_version == other.ref_version)
            }
            ConcreteVersion::Standard(_) => false,
        }
    }

    fn concrete(&self) -> Option<ConcreteVersion> {
        Some(ConcreteVersion::Git(self.clone()))
    }
}

/// One element of a version list.
#[enum_dispatch(Ranged)]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionConstraint {
    Exact(ExactVersion),
    Range(VersionRange),
    Git(GitVersion),
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => v.fmt(f),
            Self::Range(v) => v.fmt(f),
            Self::Git(v) => v.fmt(f),
        }
    }
}

impl From<ConcreteVersion> for VersionConstraint {
    fn from(value: ConcreteVersion) -> Self {
        match value {
            ConcreteVersion::Standard(version) => Self::Exact(ExactVersion { version }),
            ConcreteVersion::Git(git) => Self::Git(git),
        }
    }
}

impl VersionConstraint {
    /// Test that every version allowed by `other` is allowed by self.
    pub fn contains(&self, other: &VersionConstraint) -> bool {
        use VersionConstraint::*;
        match (self, other) {
            (Range(a), Range(b)) => range_contains_range(a, b),
            (_, Exact(_)) | (_, Git(_)) => other
                .concrete()
                .is_some_and(|v| self.contains_version(&v)),
            (Exact(_), Range(_)) | (Git(_), Range(_)) => false,
        }
    }

    /// The constraint allowing only versions allowed by both, if any.
    pub fn intersection(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        use VersionConstraint::*;
        match (self, other) {
            (Range(a), Range(b)) => {
                let lo = match (&a.lo, &b.lo) {
                    (Some(x), Some(y)) => Some(std::cmp::max(x, y).clone()),
                    (x, y) => x.clone().or_else(|| y.clone()),
                };
                let hi = match (&a.hi, &b.hi) {
                    (Some(x), Some(y)) => Some(tighter_upper(x, y).clone()),
                    (x, y) => x.clone().or_else(|| y.clone()),
                };
                let range = VersionRange { lo, hi };
                range.is_satisfiable().then_some(Range(range))
            }
            // a git reference with no known version cannot be ruled out
            (Git(g), Range(_)) | (Git(g), Exact(_)) if g.ref_version.is_none() => {
                Some(self.clone())
            }
            (Range(_), Git(g)) | (Exact(_), Git(g)) if g.ref_version.is_none() => {
                Some(other.clone())
            }
            _ if self.contains(other) => Some(other.clone()),
            _ if other.contains(self) => Some(self.clone()),
            _ => None,
        }
    }
}

/// Pick the upper bound that admits fewer versions
fn tighter_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.is_prefix_of(b) {
        b
    } else if b.is_prefix_of(a) {
        a
    } else {
        std::cmp::min(a, b)
    }
}

fn range_contains_range(outer: &VersionRange, inner: &VersionRange) -> bool {
    let lower_ok = match (&outer.lo, &inner.lo) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(o), Some(i)) => i >= o,
    };
    let upper_ok = match (&outer.hi, &inner.hi) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(o), Some(i)) => o.is_prefix_of(i) || (i < o && !i.is_prefix_of(o)),
    };
    lower_ok && upper_ok
}

/// A union of version constraints, as written after `@` in a spec.
///
/// The list is kept sorted with redundant elements removed. An
/// unconstrained list holds the single open range `:`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionList {
    items: Vec<VersionConstraint>,
}

impl Default for VersionList {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionList {
    /// The list that admits any version
    pub fn any() -> Self {
        Self {
            items: vec![VersionConstraint::Range(VersionRange::any())],
        }
    }

    /// A list admitting exactly the given version
    pub fn exact<V: Into<ConcreteVersion>>(version: V) -> Self {
        Self {
            items: vec![VersionConstraint::from(version.into())],
        }
    }

    /// Build a list from constraints, failing if none are given.
    pub fn new<I: IntoIterator<Item = VersionConstraint>>(items: I) -> Result<Self> {
        let items: Vec<_> = items.into_iter().collect();
        if items.is_empty() {
            return Err(Error::InvalidRange("empty version list".into()));
        }
        for item in &items {
            if let VersionConstraint::Range(r) = item {
                if !r.is_satisfiable() {
                    return Err(Error::InvalidRange(format!(
                        "{r}, lower bound is above the upper bound"
                    )));
                }
            }
        }
        Ok(Self::normalized(items))
    }

    fn normalized(mut items: Vec<VersionConstraint>) -> Self {
        items.sort();
        items.dedup();
        let keep: Vec<bool> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                !items
                    .iter()
                    .enumerate()
                    .any(|(j, other)| i != j && other != item && other.contains(item))
            })
            .collect();
        let items = items
            .into_iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then_some(item))
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[VersionConstraint] {
        &self.items
    }

    /// True if this list does not constrain the version at all
    pub fn is_any(&self) -> bool {
        matches!(
            self.items.as_slice(),
            [VersionConstraint::Range(VersionRange { lo: None, hi: None })]
        )
    }

    /// The single version named by this list, if it names exactly one
    pub fn concrete(&self) -> Option<ConcreteVersion> {
        match self.items.as_slice() {
            [only] => only.concrete(),
            _ => None,
        }
    }

    /// Return true if the given version is allowed by any element
    pub fn contains_version(&self, version: &ConcreteVersion) -> bool {
        self.items.iter().any(|i| i.contains_version(version))
    }

    /// True if every version allowed by self is also allowed by other.
    pub fn satisfies(&self, other: &VersionList) -> bool {
        self.items
            .iter()
            .all(|mine| other.items.iter().any(|theirs| theirs.contains(mine)))
    }

    /// True if at least one version may be allowed by both lists.
    pub fn intersects(&self, other: &VersionList) -> bool {
        self.items
            .iter()
            .cartesian_product(other.items.iter())
            .any(|(a, b)| a.intersection(b).is_some())
    }

    /// The list allowing only versions allowed by both.
    pub fn intersection(&self, other: &VersionList) -> std::result::Result<Self, Conflict> {
        let items: Vec<_> = self
            .items
            .iter()
            .cartesian_product(other.items.iter())
            .filter_map(|(a, b)| a.intersection(b))
            .collect();
        if items.is_empty() {
            return Err(Conflict::new("version", self, other));
        }
        Ok(Self::normalized(items))
    }

    /// Narrow self to the intersection with other.
    ///
    /// Returns true if self was changed.
    pub fn constrain(&mut self, other: &VersionList) -> std::result::Result<bool, Conflict> {
        let new = self.intersection(other)?;
        if new == *self {
            return Ok(false);
        }
        *self = new;
        Ok(true)
    }
}

impl Display for VersionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.items.iter().join(VERSION_LIST_SEP))
    }
}

impl From<VersionConstraint> for VersionList {
    fn from(value: VersionConstraint) -> Self {
        Self { items: vec![value] }
    }
}

impl FromStr for VersionList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_version_list(s)
    }
}

/// Parse a comma-separated version list such as `1.2:1.4,1.6`.
///
/// Whitespace anywhere in the list is ignored.
pub fn parse_version_list<S: AsRef<str>>(list: S) -> Result<VersionList> {
    let compact: String = list
        .as_ref()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let items = all_consuming(parsing::version_list::<VerboseError<&str>>)(&compact)
        .map(|(_, items)| items)
        .map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::InvalidRange(nom::error::convert_error(compact.as_str(), e))
            }
            nom::Err::Incomplete(_) => Error::InvalidRange(format!("incomplete [{compact}]")),
        })?;
    VersionList::new(items)
}

impl Serialize for VersionList {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        parse_version_list(value).map_err(serde::de::Error::custom)
    }
}
