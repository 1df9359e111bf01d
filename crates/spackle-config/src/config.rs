// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

static CONFIG: OnceCell<RwLock<Arc<Config>>> = OnceCell::new();

/// The prefix used for environment variables that override config values
pub const ENV_PREFIX: &str = "SPACKLE_";

/// How two conflicting sets of compiler flags are combined.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlagMergePolicy {
    /// Differing values for the same flag type are unsatisfiable
    #[default]
    Conflict,
    /// Flags from the other side are appended after the existing ones
    Append,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Concretizer {
    /// If true, previously installed specs are preferred over new builds
    /// whenever they satisfy the request
    pub reuse: bool,

    /// If true, every concretization is run twice and the resulting
    /// dag hashes compared, failing loudly on any difference
    pub verify_determinism: bool,

    /// The number of times the concretizer will revise an earlier
    /// decision before giving up on a request
    pub max_attempts: usize,

    /// How compiler flags from two constraints are combined
    pub flag_merge: FlagMergePolicy,
}

impl Default for Concretizer {
    fn default() -> Self {
        Self {
            reuse: true,
            verify_determinism: false,
            max_attempts: 256,
            flag_merge: FlagMergePolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Install {
    /// The root directory under which install prefixes are created
    pub root: PathBuf,

    /// Size of the shared job token pool for all builds in one install.
    ///
    /// Zero means the number of available cpus.
    pub jobs: usize,

    /// Keep the prefix of a failed build around for debugging
    pub keep_prefix: bool,

    /// Also require and run test dependencies
    pub tests: bool,

    /// Replace existing prefixes instead of failing
    pub overwrite: bool,

    /// Seconds to wait on a contended lock before reporting a likely deadlock
    pub lock_timeout_seconds: u64,
}

impl Default for Install {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/opt/spackle"),
            jobs: 0,
            keep_prefix: false,
            tests: false,
            overwrite: false,
            lock_timeout_seconds: 120,
        }
    }
}

impl Install {
    /// The effective size of the job token pool.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Hashing {
    /// Number of characters shown when a hash is displayed to users
    pub display_length: usize,
}

impl Default for Hashing {
    fn default() -> Self {
        Self { display_length: 7 }
    }
}

/// Overrides for the detected host platform.
///
/// Any value left empty is detected from the running host.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Platform {
    pub platform: Option<String>,
    pub os: Option<String>,
    pub target: Option<String>,
}

/// Configuration values for spackle.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // These sub-types should aim to only have one level of
    // values within them, otherwise they become impossible to address
    // with environment variables.
    pub concretizer: Concretizer,
    pub install: Install,
    pub hashing: Hashing,
    pub platform: Platform,
}

impl Config {
    /// Get the current loaded config, loading it if needed
    pub fn current() -> Result<Arc<Self>> {
        get_config()
    }

    /// Load the config from disk, even if it's already been loaded before
    pub fn load() -> Result<Self> {
        load_config()
    }

    /// Make this config the current global one
    pub fn make_current(self) -> Result<Arc<Self>> {
        // Note we don't know if we won the race to set the value here,
        // so we still need to try to update it.
        let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
            Ok(RwLock::new(Arc::new(self.clone())))
        })?;

        let mut lock = config
            .write()
            .map_err(|err| crate::Error::LockPoisonedWrite(err.to_string()))?;
        *Arc::make_mut(&mut lock) = self;
        Ok(Arc::clone(&lock))
    }
}

/// Get the current spackle config, fetching it from disk if needed.
pub fn get_config() -> Result<Arc<Config>> {
    let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
        Ok(RwLock::new(Arc::new(load_config()?)))
    })?;
    let lock = config
        .read()
        .map_err(|err| crate::Error::LockPoisonedRead(err.to_string()))?;
    Ok(Arc::clone(&*lock))
}

/// Load the spackle configuration from disk, even if it has already been loaded.
///
/// This includes the default, user, and system configurations (if they exist).
pub fn load_config() -> Result<Config> {
    let mut files = vec![PathBuf::from("/etc/spackle")];
    if let Some(dir) = dirs::config_dir() {
        files.push(dir.join("spackle").join("spackle"));
    }
    load_config_from(files, std::env::vars())
}

/// Load a configuration from the given files (lowest priority first)
/// and environment variables (highest priority).
///
/// Files may be in any format supported by the config crate and are
/// named without their extension. Missing files are skipped.
pub fn load_config_from<F, V>(files: F, vars: V) -> Result<Config>
where
    F: IntoIterator<Item = PathBuf>,
    V: IntoIterator<Item = (String, String)>,
{
    use config::{Config as RawConfig, File};

    let mut config_builder = RawConfig::builder();
    for file in files {
        config_builder =
            config_builder.add_source(File::with_name(&file.display().to_string()).required(false));
    }

    for (var, value) in vars {
        let Some(tail) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            // typically, a value with no section is not a configuration
            // value, and can be skipped (eg: SPACKLE_LOG)
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = config_builder.build()?;
    Ok(Config::deserialize(config)?)
}
