// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[cfg(test)]
#[path = "./digest_test.rs"]
mod digest_test;

/// The number of characters in an encoded hash.
///
/// A sha1 digest is 160 bits, which is exactly 32 base32 characters
/// with no padding.
pub const HASH_SIZE: usize = 32;

/// The number of characters shown by default when displaying a hash
pub const DEFAULT_DISPLAY_LENGTH: usize = 7;

/// The content hash of a spec node, lowercase base32 encoded.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash some bytes
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finish()
    }

    pub fn new_from_bytes(digest: &[u8]) -> Self {
        Self(data_encoding::BASE32.encode(digest).to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first `len` characters, for display to users
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// True if the given (possibly abbreviated) hash names this one
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.0.starts_with(&prefix.to_ascii_lowercase())
    }
}

/// Incrementally computes a [`SpecHash`].
pub struct Hasher(ring::digest::Context);

impl Hasher {
    pub fn new() -> Self {
        Self(ring::digest::Context::new(
            &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
        ))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data)
    }

    pub fn finish(self) -> SpecHash {
        SpecHash::new_from_bytes(self.0.finish().as_ref())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SpecHash({})", self.0)
    }
}

impl FromStr for SpecHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.len() != HASH_SIZE {
            return Err(format!(
                "hash must be {HASH_SIZE} characters, got {} [{s}]",
                lower.len()
            ));
        }
        if let Some(bad) = lower
            .chars()
            .find(|c| !matches!(c, 'a'..='z' | '2'..='7'))
        {
            return Err(format!("invalid character '{bad}' in hash [{s}]"));
        }
        Ok(Self(lower))
    }
}

impl Serialize for SpecHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SpecHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        SpecHash::from_str(&value).map_err(serde::de::Error::custom)
    }
}
