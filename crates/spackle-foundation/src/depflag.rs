// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[cfg(test)]
#[path = "./depflag_test.rs"]
mod depflag_test;

/// A set of dependency types describing how one package uses another.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepFlag(u8);

impl DepFlag {
    pub const NONE: DepFlag = DepFlag(0);
    pub const BUILD: DepFlag = DepFlag(1);
    pub const LINK: DepFlag = DepFlag(1 << 1);
    pub const RUN: DepFlag = DepFlag(1 << 2);
    pub const TEST: DepFlag = DepFlag(1 << 3);
    pub const LINK_RUN: DepFlag = DepFlag(Self::LINK.0 | Self::RUN.0);
    pub const BUILD_LINK_RUN: DepFlag = DepFlag(Self::BUILD.0 | Self::LINK.0 | Self::RUN.0);
    pub const ALL: DepFlag = DepFlag(Self::BUILD_LINK_RUN.0 | Self::TEST.0);

    /// Flags in canonical order, with their names
    pub const NAMED: [(DepFlag, &'static str); 4] = [
        (Self::BUILD, "build"),
        (Self::LINK, "link"),
        (Self::RUN, "run"),
        (Self::TEST, "test"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: DepFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: DepFlag) -> bool {
        self.0 & other.0 != 0
    }

    /// The names of the set flags, in canonical order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    pub fn from_names<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Result<Self, String> {
        names.into_iter().try_fold(Self::NONE, |acc, name| {
            let name = name.trim();
            Self::NAMED
                .iter()
                .find(|(_, n)| *n == name)
                .map(|(flag, _)| acc | *flag)
                .ok_or_else(|| format!("unknown dependency type '{name}'"))
        })
    }
}

impl std::ops::BitOr for DepFlag {
    type Output = DepFlag;

    fn bitor(self, rhs: Self) -> Self::Output {
        DepFlag(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for DepFlag {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl std::ops::BitAnd for DepFlag {
    type Output = DepFlag;

    fn bitand(self, rhs: Self) -> Self::Output {
        DepFlag(self.0 & rhs.0)
    }
}

impl std::fmt::Display for DepFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

impl std::fmt::Debug for DepFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DepFlag({self})")
    }
}

impl FromStr for DepFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::NONE);
        }
        Self::from_names(s.split(','))
    }
}

impl Serialize for DepFlag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DepFlag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        Self::from_names(names.iter().map(String::as_str)).map_err(serde::de::Error::custom)
    }
}
