// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spackle_foundation::digest::{DEFAULT_DISPLAY_LENGTH, SpecHash};

use crate::Result;

#[cfg(test)]
#[path = "./report_test.rs"]
mod report_test;

/// How one node of an install ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildResult {
    Success,
    /// The build itself failed, in a way the user can act on
    Failure,
    /// Something unexpected went wrong around the build
    Error,
    /// Already installed, or provided externally
    Skipped,
    /// Not attempted because a dependency did not install
    Blocked,
}

impl BuildResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub version: String,
    pub hash: SpecHash,
    pub result: BuildResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// For blocked nodes, the names from this node down to the
    /// dependency that failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

impl NodeReport {
    pub fn new(name: String, version: String, hash: SpecHash, result: BuildResult) -> Self {
        Self {
            name,
            version,
            hash,
            result,
            prefix: None,
            message: None,
            chain: Vec::new(),
            started: None,
            elapsed_seconds: None,
        }
    }
}

/// The outcome of every node in one install.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BuildReport {
    pub id: ulid::Ulid,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub nodes: Vec<NodeReport>,
    /// Job tokens that build tools never gave back
    #[serde(default)]
    pub leaked_tokens: usize,
    /// Characters of each hash shown when the report is displayed
    #[serde(skip, default = "default_hash_length")]
    pub hash_length: usize,
}

fn default_hash_length() -> usize {
    DEFAULT_DISPLAY_LENGTH
}

impl BuildReport {
    pub fn new(started: DateTime<Utc>) -> Self {
        Self {
            id: ulid::Ulid::new(),
            started,
            finished: started,
            nodes: Vec::new(),
            leaked_tokens: 0,
            hash_length: DEFAULT_DISPLAY_LENGTH,
        }
    }

    /// True if every node was installed or skipped
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.result.is_ok())
    }

    pub fn count(&self, result: BuildResult) -> usize {
        self.nodes.iter().filter(|n| n.result == result).count()
    }

    pub fn get(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn with_result(&self, result: BuildResult) -> impl Iterator<Item = &NodeReport> + '_ {
        self.nodes.iter().filter(move |n| n.result == result)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in self.nodes.iter() {
            write!(
                f,
                "{:>8} {}@{}/{}",
                node.result,
                node.name,
                node.version,
                node.hash.short(self.hash_length)
            )?;
            if !node.chain.is_empty() {
                write!(f, " (needs {})", node.chain.join(" -> "))?;
            }
            if let Some(message) = &node.message {
                write!(f, ": {message}")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} installed, {} skipped, {} failed, {} errors, {} blocked",
            self.count(BuildResult::Success),
            self.count(BuildResult::Skipped),
            self.count(BuildResult::Failure),
            self.count(BuildResult::Error),
            self.count(BuildResult::Blocked),
        )
    }
}
