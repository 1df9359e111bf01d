// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::Write;

use rstest::rstest;
use serial_test::serial;

use super::{Config, FlagMergePolicy, load_config_from};

#[rstest]
fn test_defaults_without_sources() {
    let config = load_config_from(Vec::new(), Vec::new()).unwrap();
    assert!(config.concretizer.reuse);
    assert_eq!(config.concretizer.flag_merge, FlagMergePolicy::Conflict);
    assert_eq!(config.hashing.display_length, 7);
    assert_eq!(config.install.lock_timeout_seconds, 120);
}

#[rstest]
#[case("SPACKLE_INSTALL_JOBS", "3")]
#[case("SPACKLE_install_jobs", "3")]
fn test_env_override(#[case] var: &str, #[case] value: &str) {
    let vars = vec![(var.to_string(), value.to_string())];
    let config = load_config_from(Vec::new(), vars).unwrap();
    assert_eq!(config.install.jobs, 3);
    assert_eq!(config.install.effective_jobs(), 3);
}

#[rstest]
fn test_env_override_with_underscored_name() {
    let vars = vec![
        ("SPACKLE_INSTALL_KEEP_PREFIX".to_string(), "true".to_string()),
        ("SPACKLE_CONCRETIZER_FLAG_MERGE".to_string(), "append".to_string()),
        // no section, ignored
        ("SPACKLE_LOG".to_string(), "debug".to_string()),
        // wrong prefix, ignored
        ("OTHER_INSTALL_JOBS".to_string(), "9".to_string()),
    ];
    let config = load_config_from(Vec::new(), vars).unwrap();
    assert!(config.install.keep_prefix);
    assert_eq!(config.concretizer.flag_merge, FlagMergePolicy::Append);
    assert_eq!(config.install.jobs, 0);
}

#[rstest]
fn test_file_then_env_priority() {
    let tmpdir = tempfile::tempdir().unwrap();
    let base = tmpdir.path().join("spackle");
    let mut file = std::fs::File::create(base.with_extension("yaml")).unwrap();
    writeln!(file, "hashing:\n  display_length: 12\ninstall:\n  jobs: 2").unwrap();

    let vars = vec![("SPACKLE_INSTALL_JOBS".to_string(), "5".to_string())];
    let config = load_config_from(vec![base], vars).unwrap();
    assert_eq!(config.hashing.display_length, 12);
    assert_eq!(config.install.jobs, 5, "environment should win over files");
}

#[rstest]
#[serial(config)]
fn test_make_current_replaces_global() {
    let mut config = Config::default();
    config.install.jobs = 7;
    let current = config.clone().make_current().unwrap();
    assert_eq!(current.install.jobs, 7);
    assert_eq!(Config::current().unwrap().install.jobs, 7);

    config.install.jobs = 2;
    config.make_current().unwrap();
    assert_eq!(Config::current().unwrap().install.jobs, 2);
}
