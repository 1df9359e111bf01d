// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use serde::{Deserialize, Serialize};

use crate::Conflict;

#[cfg(test)]
#[path = "./arch_test.rs"]
mod arch_test;

/// The platform, operating system and target a node is built for.
///
/// Any part may be left open on an abstract spec.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(
        default,
        rename = "platform_os",
        skip_serializing_if = "Option::is_none"
    )]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ArchSpec {
    pub fn new<P, O, T>(platform: P, os: O, target: T) -> Self
    where
        P: Into<String>,
        O: Into<String>,
        T: Into<String>,
    {
        Self {
            platform: Some(platform.into()),
            os: Some(os.into()),
            target: Some(target.into()),
        }
    }

    /// Parse the `platform-os-target` form used by `arch=`.
    ///
    /// Empty components and the literal `None` leave that part open.
    pub fn parse_triple(text: &str) -> Result<Self, Conflict> {
        let parts: Vec<_> = text.splitn(3, '-').collect();
        let [platform, os, target] = parts.as_slice() else {
            return Err(Conflict::new(
                "arch",
                text,
                "a value of the form platform-os-target",
            ));
        };
        let part = |s: &str| (!s.is_empty() && s != "None").then(|| s.to_owned());
        Ok(Self {
            platform: part(*platform),
            os: part(*os),
            target: part(*target),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.os.is_none() && self.target.is_none()
    }

    pub fn is_concrete(&self) -> bool {
        self.platform.is_some() && self.os.is_some() && self.target.is_some()
    }

    fn fields(&self) -> [(&'static str, &Option<String>); 3] {
        [
            ("platform", &self.platform),
            ("os", &self.os),
            ("target", &self.target),
        ]
    }

    fn fields_mut(&mut self) -> [(&'static str, &mut Option<String>); 3] {
        [
            ("platform", &mut self.platform),
            ("os", &mut self.os),
            ("target", &mut self.target),
        ]
    }

    /// Fill open parts from other, failing on differing set parts.
    ///
    /// Returns true if self was changed.
    pub fn constrain(&mut self, other: &ArchSpec) -> Result<bool, Conflict> {
        for ((name, mine), (_, theirs)) in self.fields().into_iter().zip(other.fields()) {
            if let (Some(a), Some(b)) = (mine, theirs) {
                if a != b {
                    return Err(Conflict::new(name, a, b));
                }
            }
        }
        let mut changed = false;
        for ((_, mine), (_, theirs)) in self.fields_mut().into_iter().zip(other.fields()) {
            if mine.is_none() && theirs.is_some() {
                mine.clone_from(theirs);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// True if every part set on other is set to the same value on self
    pub fn satisfies(&self, other: &ArchSpec) -> bool {
        self.fields()
            .into_iter()
            .zip(other.fields())
            .all(|((_, mine), (_, theirs))| theirs.is_none() || mine == theirs)
    }

    pub fn intersects(&self, other: &ArchSpec) -> bool {
        self.clone().constrain(other).is_ok()
    }
}

impl std::fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_concrete() {
            let none = String::new();
            return write!(
                f,
                "arch={}-{}-{}",
                self.platform.as_ref().unwrap_or(&none),
                self.os.as_ref().unwrap_or(&none),
                self.target.as_ref().unwrap_or(&none)
            );
        }
        let mut first = true;
        for (name, value) in self.fields() {
            if let Some(value) = value {
                if !first {
                    f.write_str(" ")?;
                }
                first = false;
                write!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}
