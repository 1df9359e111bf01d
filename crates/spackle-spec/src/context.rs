// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;

use spackle_config::{Config, FlagMergePolicy, Platform};
use spackle_foundation::arch::ArchSpec;
use spackle_foundation::digest::SpecHash;

use crate::hash::HashRegistry;
use crate::{Result, Spec};

#[cfg(test)]
#[path = "./context_test.rs"]
mod context_test;

/// Everything the parser, hash engine and concretizer need to know
/// about the environment they run in.
///
/// Library code never reaches for process-wide state, a context is
/// built once at the application boundary and passed down.
#[derive(Clone, Debug)]
pub struct Context {
    pub config: Arc<Config>,
    /// The platform, os and target of the running host
    pub host: ArchSpec,
    pub hashes: HashRegistry,
}

impl Context {
    pub fn new(config: Arc<Config>) -> Self {
        let host = detect_host(&config.platform);
        Self {
            config,
            host,
            hashes: HashRegistry::default(),
        }
    }

    /// A context for a fixed host, ignoring the running machine.
    pub fn with_host(config: Arc<Config>, host: ArchSpec) -> Self {
        Self {
            config,
            host,
            hashes: HashRegistry::default(),
        }
    }

    pub fn flag_merge(&self) -> FlagMergePolicy {
        self.config.concretizer.flag_merge
    }

    pub fn display_length(&self) -> usize {
        self.config.hashing.display_length
    }

    /// A hash cut to the configured display length
    pub fn short_hash<'a>(&self, hash: &'a SpecHash) -> &'a str {
        hash.short(self.display_length())
    }

    /// Hash a spec with the descriptor registered under `name`.
    ///
    /// Legacy descriptors are only kept for reading old data, so
    /// naming one here is an error.
    pub fn hash_named(&self, spec: &Spec, name: &str) -> Result<SpecHash> {
        let descriptor = self.hashes.for_writing(name)?;
        Ok(spec.hash_with(descriptor))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Arc::new(Config::default()))
    }
}

/// Detect the architecture of the running host.
///
/// Any value set in the given overrides replaces the detected one.
pub fn detect_host(overrides: &Platform) -> ArchSpec {
    let platform = overrides
        .platform
        .clone()
        .unwrap_or_else(|| std::env::consts::OS.to_owned());
    let os = overrides.os.clone().unwrap_or_else(|| detect_os(&platform));
    let target = overrides
        .target
        .clone()
        .unwrap_or_else(|| std::env::consts::ARCH.to_owned());
    ArchSpec::new(platform, os, target)
}

fn detect_os(platform: &str) -> String {
    if platform != "linux" {
        return match sys_info::os_release() {
            Ok(release) => format!("{platform}{}", release.split('.').next().unwrap_or("")),
            Err(err) => {
                tracing::debug!(?err, "failed to read os release");
                platform.to_owned()
            }
        };
    }
    match sys_info::linux_os_release() {
        Ok(info) => {
            let id = info.id.unwrap_or_else(|| "linux".to_owned());
            let version = info.version_id.unwrap_or_default();
            // the os is the middle of a dash separated triple
            format!("{id}{version}").replace(['-', ' '], "_")
        }
        Err(err) => {
            tracing::warn!("Failed to get linux info: {err:?}");
            "linux".to_owned()
        }
    }
}
