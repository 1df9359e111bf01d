// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::Conflict;

#[cfg(test)]
#[path = "./variant_test.rs"]
mod variant_test;

/// The value of a single variant on a spec node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantValue {
    /// `+name` or `~name`
    Bool(bool),
    /// One value out of a fixed set
    Single(String),
    /// Any subset of a fixed set of values
    Multi(BTreeSet<String>),
    /// Values requested as `name=a,b` before it is known whether the
    /// variant takes one value or many
    Abstract(BTreeSet<String>),
}

impl VariantValue {
    /// Build an abstract value from a comma-separated list, reading
    /// `true` and `false` as booleans.
    pub fn from_text(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        Self::Abstract(
            text.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// The set of values carried, booleans as `true` or `false`
    pub fn values(&self) -> BTreeSet<String> {
        match self {
            Self::Bool(b) => BTreeSet::from([b.to_string()]),
            Self::Single(v) => BTreeSet::from([v.clone()]),
            Self::Multi(v) | Self::Abstract(v) => v.clone(),
        }
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::Abstract(_))
    }

    /// A short label of the kind of value, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Single(_) => "single",
            Self::Multi(_) => "multi",
            Self::Abstract(_) => "abstract",
        }
    }

    /// True if every value required by `other` is present in self
    pub fn satisfies(&self, other: &VariantValue) -> bool {
        use VariantValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Bool(_), _) | (_, Bool(_)) => false,
            (Single(a), Single(b)) => a == b,
            (Multi(a), Multi(b)) => a == b,
            (Single(_) | Multi(_) | Abstract(_), Abstract(b)) => b.is_subset(&self.values()),
            (Abstract(a), Single(_) | Multi(_)) => a == &other.values(),
            (Single(_), Multi(_)) | (Multi(_), Single(_)) => false,
        }
    }

    /// The most constrained value compatible with both.
    pub fn intersection(&self, other: &VariantValue) -> Option<VariantValue> {
        use VariantValue::*;
        match (self, other) {
            (Abstract(a), Abstract(b)) => Some(Abstract(a.union(b).cloned().collect())),
            (Abstract(a), Single(_) | Multi(_)) if a.is_subset(&other.values()) => {
                Some(other.clone())
            }
            (Single(_) | Multi(_), Abstract(b)) if b.is_subset(&self.values()) => {
                Some(self.clone())
            }
            _ if self == other => Some(self.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Display for VariantValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => b.fmt(f),
            Self::Single(v) => f.write_str(&quote_if_needed(v)),
            Self::Multi(v) | Self::Abstract(v) => {
                f.write_str(&quote_if_needed(&v.iter().join(",")))
            }
        }
    }
}

/// A variant value and whether it propagates to dependencies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub value: VariantValue,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub propagate: bool,
}

impl Variant {
    pub fn new(value: VariantValue) -> Self {
        Self {
            value,
            propagate: false,
        }
    }

    pub fn propagated(value: VariantValue) -> Self {
        Self {
            value,
            propagate: true,
        }
    }

    pub fn boolean(enabled: bool) -> Self {
        Self::new(VariantValue::Bool(enabled))
    }
}

impl From<VariantValue> for Variant {
    fn from(value: VariantValue) -> Self {
        Self::new(value)
    }
}

/// The named variants of one spec node, ordered by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantMap(BTreeMap<String, Variant>);

impl std::ops::Deref for VariantMap {
    type Target = BTreeMap<String, Variant>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for VariantMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K: Into<String>> FromIterator<(K, Variant)> for VariantMap {
    fn from_iter<T: IntoIterator<Item = (K, Variant)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl VariantMap {
    /// Narrow every variant in self by those of other.
    ///
    /// Returns true if self was changed.
    pub fn constrain(&mut self, other: &VariantMap) -> Result<bool, Conflict> {
        let mut changed = false;
        for (name, theirs) in other.iter() {
            match self.0.get_mut(name) {
                None => {
                    self.0.insert(name.clone(), theirs.clone());
                    changed = true;
                }
                Some(mine) => {
                    let value = mine.value.intersection(&theirs.value).ok_or_else(|| {
                        Conflict::new(
                            format!("variant '{name}'"),
                            &mine.value,
                            &theirs.value,
                        )
                    })?;
                    let propagate = mine.propagate || theirs.propagate;
                    if value != mine.value || propagate != mine.propagate {
                        mine.value = value;
                        mine.propagate = propagate;
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }

    /// True if every variant required by other is present and satisfied
    pub fn satisfies(&self, other: &VariantMap) -> bool {
        other.iter().all(|(name, theirs)| {
            self.0
                .get(name)
                .is_some_and(|mine| mine.value.satisfies(&theirs.value))
        })
    }

    /// True if no variant named in both maps has incompatible values
    pub fn intersects(&self, other: &VariantMap) -> bool {
        other.iter().all(|(name, theirs)| match self.0.get(name) {
            None => true,
            Some(mine) => mine.value.intersection(&theirs.value).is_some(),
        })
    }

    pub fn is_concrete(&self) -> bool {
        self.0.values().all(|v| v.value.is_concrete())
    }
}

impl std::fmt::Display for VariantMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // booleans are printed attached, key-value pairs after a space
        for (name, variant) in self.0.iter() {
            if let VariantValue::Bool(enabled) = variant.value {
                let sigil = if enabled { '+' } else { '~' };
                f.write_char(sigil)?;
                if variant.propagate {
                    f.write_char(sigil)?;
                }
                f.write_str(name)?;
            }
        }
        for (name, variant) in self.0.iter() {
            if matches!(variant.value, VariantValue::Bool(_)) {
                continue;
            }
            let op = if variant.propagate { "==" } else { "=" };
            write!(f, " {name}{op}{}", variant.value)?;
        }
        Ok(())
    }
}

/// Characters that can appear in an unquoted spec value.
pub fn is_plain_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-+*.,:=~/\\".contains(c)
}

/// Wrap a value in quotes if it cannot be written bare.
pub fn quote_if_needed(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_plain_value_char) {
        return value.to_owned();
    }
    if value.contains('"') {
        format!("'{value}'")
    } else {
        format!("\"{value}\"")
    }
}
