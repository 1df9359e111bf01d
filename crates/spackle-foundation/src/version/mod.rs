// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

mod error;
pub mod parsing;

use std::cmp::Ordering;
use std::str::FromStr;

pub use error::{Error, Result};
use nom::combinator::all_consuming;
use nom::error::VerboseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[cfg(test)]
#[path = "./version_test.rs"]
mod version_test;

/// Version strings that sort above every numeric version, highest first.
pub const INFINITY_VERSIONS: &[&str] = &["develop", "main", "master", "head", "trunk", "stable"];

/// Denotes that an invalid version number was given.
#[derive(Debug, Error)]
#[error("Invalid version: {message}")]
pub struct InvalidVersionError {
    pub message: String,
}

impl InvalidVersionError {
    pub fn new_error(msg: String) -> Error {
        Error::InvalidVersionError(Self { message: msg })
    }
}

/// One component of a version number.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VersionPart {
    Number(u64),
    Alpha(String),
}

impl VersionPart {
    /// The position of this part in [`INFINITY_VERSIONS`], if any
    fn infinity_rank(&self) -> Option<usize> {
        match self {
            Self::Number(_) => None,
            Self::Alpha(s) => INFINITY_VERSIONS
                .iter()
                .position(|inf| *inf == s.as_str()),
        }
    }
}

impl std::fmt::Display for VersionPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Alpha(s) => f.write_str(s),
        }
    }
}

impl PartialOrd for VersionPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionPart {
    // plain words < numbers < infinity words
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.infinity_rank(), other.infinity_rank()) {
            // a lower index in the infinity list is a greater version
            (Some(a), Some(b)) => return b.cmp(&a),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => {}
        }
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Number(_), Self::Alpha(_)) => Ordering::Greater,
            (Self::Alpha(_), Self::Number(_)) => Ordering::Less,
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
        }
    }
}

/// A standard version number such as `1.2.3`, `8.1_1e` or `develop`.
///
/// The original text is kept for display, but equality and ordering
/// only consider the parsed components, so `1.2` and `1-2` are equal.
/// A version sorts before any longer version that it is a prefix of.
#[derive(Clone, Debug)]
pub struct Version {
    string: String,
    parts: Vec<VersionPart>,
}

impl Version {
    /// Build a version from numeric components
    pub fn from_parts<P: IntoIterator<Item = u64>>(parts: P) -> Self {
        let parts: Vec<_> = parts.into_iter().map(VersionPart::Number).collect();
        let string = parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self { string, parts }
    }

    pub fn parts(&self) -> &[VersionPart] {
        &self.parts
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// True if every component of this version begins `other`.
    ///
    /// A version is a prefix of itself.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.parts.len() <= other.parts.len() && other.parts[..self.parts.len()] == self.parts[..]
    }

    /// True if this is a development version such as `develop` or `main`
    pub fn is_infinity(&self) -> bool {
        self.parts
            .first()
            .and_then(VersionPart::infinity_rank)
            .is_some()
    }

    /// Truncate this version to at most the first `n` components
    pub fn up_to(&self, n: usize) -> Version {
        if n >= self.parts.len() {
            return self.clone();
        }
        let parts = self.parts[..n].to_vec();
        let string = parts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self { string, parts }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // slices compare lexicographically, so a prefix sorts first
        self.parts.cmp(&other.parts)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.string)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_version(s)
    }
}

impl TryFrom<&str> for Version {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        parse_version(value)
    }
}

impl<S: AsRef<str>> PartialEq<S> for Version {
    fn eq(&self, other: &S) -> bool {
        match parse_version(other.as_ref()) {
            Ok(v) => self == &v,
            Err(_) => false,
        }
    }
}

/// Parse a string as a standard version.
pub fn parse_version<S: AsRef<str>>(version: S) -> Result<Version> {
    let version = version.as_ref();
    all_consuming(parsing::version::<VerboseError<&str>>)(version)
        .map(|(_, v)| v)
        .map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => InvalidVersionError::new_error(format!(
                "{}",
                nom::error::convert_error(version, e)
            )),
            nom::Err::Incomplete(_) => {
                InvalidVersionError::new_error(format!("incomplete version [{version}]"))
            }
        })
}

/// A version that refers to a git branch, tag or commit.
///
/// The optional `ref_version` declares which standard version the
/// reference should be treated as for range comparisons.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GitVersion {
    pub git_ref: String,
    pub ref_version: Option<Version>,
}

impl GitVersion {
    /// True if the reference is a full commit sha rather than a named ref
    pub fn is_commit(&self) -> bool {
        self.git_ref.len() == 40 && self.git_ref.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl std::fmt::Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_commit() {
            f.write_str(&self.git_ref)?;
        } else {
            write!(f, "git.{}", self.git_ref)?;
        }
        if let Some(v) = &self.ref_version {
            write!(f, "={v}")?;
        }
        Ok(())
    }
}

impl PartialOrd for GitVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GitVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ref_version
            .cmp(&other.ref_version)
            .then_with(|| self.git_ref.cmp(&other.git_ref))
    }
}

impl FromStr for GitVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        all_consuming(parsing::git_version::<VerboseError<&str>>)(s)
            .map(|(_, v)| v)
            .map_err(|err| match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    InvalidVersionError::new_error(nom::error::convert_error(s, e))
                }
                nom::Err::Incomplete(_) => {
                    InvalidVersionError::new_error(format!("incomplete git version [{s}]"))
                }
            })
    }
}

/// A single, fully determined version as carried by a concrete spec.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConcreteVersion {
    Standard(Version),
    Git(GitVersion),
}

impl ConcreteVersion {
    /// The standard version used when comparing against ranges.
    ///
    /// Git versions without a declared version have none.
    pub fn standard(&self) -> Option<&Version> {
        match self {
            Self::Standard(v) => Some(v),
            Self::Git(g) => g.ref_version.as_ref(),
        }
    }
}

impl From<Version> for ConcreteVersion {
    fn from(value: Version) -> Self {
        Self::Standard(value)
    }
}

impl From<GitVersion> for ConcreteVersion {
    fn from(value: GitVersion) -> Self {
        Self::Git(value)
    }
}

impl std::fmt::Display for ConcreteVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(v) => v.fmt(f),
            Self::Git(g) => g.fmt(f),
        }
    }
}

impl PartialOrd for ConcreteVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConcreteVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let kind = |v: &Self| match v {
            Self::Standard(_) => 0,
            Self::Git(_) => 1,
        };
        self.standard()
            .cmp(&other.standard())
            .then_with(|| kind(self).cmp(&kind(other)))
            .then_with(|| match (self, other) {
                (Self::Git(a), Self::Git(b)) => a.git_ref.cmp(&b.git_ref),
                _ => Ordering::Equal,
            })
    }
}

impl FromStr for ConcreteVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("git.") {
            return GitVersion::from_str(s).map(Self::Git);
        }
        if let Ok(git) = GitVersion::from_str(s) {
            return Ok(Self::Git(git));
        }
        parse_version(s).map(Self::Standard)
    }
}

macro_rules! string_serde {
    ($ty:ty, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                struct StrVisitor;
                impl serde::de::Visitor<'_> for StrVisitor {
                    type Value = $ty;

                    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                        formatter.write_str($expecting)
                    }

                    fn visit_str<E>(self, value: &str) -> std::result::Result<$ty, E>
                    where
                        E: serde::de::Error,
                    {
                        <$ty>::from_str(value).map_err(serde::de::Error::custom)
                    }
                }
                deserializer.deserialize_str(StrVisitor)
            }
        }
    };
}

string_serde!(Version, "a version number (eg: 1.0.0, 8.1_1e, develop)");
string_serde!(GitVersion, "a git version (eg: git.main=1.0)");
string_serde!(ConcreteVersion, "a standard or git version");
