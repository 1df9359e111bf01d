// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
pub use spackle_config::FlagMergePolicy;

use crate::Conflict;
use crate::variant::quote_if_needed;

#[cfg(test)]
#[path = "./flags_test.rs"]
mod flags_test;

/// The compiler flag keywords understood in a spec.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlagType {
    Cflags,
    Cxxflags,
    Fflags,
    Ldflags,
    Ldlibs,
    Cppflags,
}

/// An ordered list of flags of one type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagList {
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub propagate: bool,
}

impl FlagList {
    /// Split flag text on whitespace, keeping quoted segments together.
    pub fn from_text(text: &str, propagate: bool) -> Self {
        Self {
            flags: split_flags(text),
            propagate,
        }
    }

    fn contains_all(&self, other: &FlagList) -> bool {
        other.flags.iter().all(|f| self.flags.contains(f))
    }
}

impl std::fmt::Display for FlagList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&quote_if_needed(&self.flags.iter().join(" ")))
    }
}

fn split_flags(text: &str) -> Vec<String> {
    let mut flags = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => quote = Some(c),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    flags.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        flags.push(current);
    }
    flags
}

/// The compiler flags of one spec node, by type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagMap(BTreeMap<FlagType, FlagList>);

impl std::ops::Deref for FlagMap {
    type Target = BTreeMap<FlagType, FlagList>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for FlagMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(FlagType, FlagList)> for FlagMap {
    fn from_iter<T: IntoIterator<Item = (FlagType, FlagList)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FlagMap {
    /// Combine the flags of other into self according to the policy.
    ///
    /// Under [`FlagMergePolicy::Conflict`] one side must already include
    /// every flag of the other, and the larger list wins. Under
    /// [`FlagMergePolicy::Append`] missing flags are appended in order.
    ///
    /// Returns true if self was changed.
    pub fn constrain(
        &mut self,
        other: &FlagMap,
        policy: FlagMergePolicy,
    ) -> Result<bool, Conflict> {
        let mut changed = false;
        for (flag_type, theirs) in other.iter() {
            let Some(mine) = self.0.get_mut(flag_type) else {
                self.0.insert(*flag_type, theirs.clone());
                changed = true;
                continue;
            };
            if theirs.propagate && !mine.propagate {
                mine.propagate = true;
                changed = true;
            }
            if mine.contains_all(theirs) {
                continue;
            }
            match policy {
                FlagMergePolicy::Conflict if theirs.contains_all(mine) => {
                    mine.flags = theirs.flags.clone();
                }
                FlagMergePolicy::Conflict => {
                    return Err(Conflict::new(flag_type.as_ref(), &*mine, theirs));
                }
                FlagMergePolicy::Append => {
                    for flag in theirs.flags.iter() {
                        if !mine.flags.contains(flag) {
                            mine.flags.push(flag.clone());
                        }
                    }
                }
            }
            changed = true;
        }
        Ok(changed)
    }

    /// True if self carries every flag that other asks for
    pub fn satisfies(&self, other: &FlagMap) -> bool {
        other.iter().all(|(flag_type, theirs)| {
            self.0
                .get(flag_type)
                .is_some_and(|mine| mine.contains_all(theirs))
        })
    }

    /// True if constraining self by other could succeed under the policy
    pub fn intersects(&self, other: &FlagMap, policy: FlagMergePolicy) -> bool {
        self.clone().constrain(other, policy).is_ok()
    }
}

impl std::fmt::Display for FlagMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (flag_type, list) in self.0.iter() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            let op = if list.propagate { "==" } else { "=" };
            write!(f, "{flag_type}{op}{list}")?;
        }
        Ok(())
    }
}
