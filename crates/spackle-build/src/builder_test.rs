// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;

use rstest::rstest;
use spackle_solve::BuildSystem;
use spackle_spec::Spec;
use spackle_spec::fixtures::diamond;

use super::{BuildJob, Builder, CommandBuilder};
use crate::Error;

fn job(spec: Spec, name: &str, build_system: BuildSystem, dir: &std::path::Path) -> BuildJob {
    let node = spec.find(name).unwrap();
    let prefix = dir.join("prefix");
    let stage = dir.join("stage");
    std::fs::create_dir_all(&prefix).unwrap();
    std::fs::create_dir_all(&stage).unwrap();
    BuildJob {
        spec: Arc::new(spec),
        node,
        build_system,
        prefix,
        stage,
        makeflags: "-j1".into(),
        run_tests: false,
    }
}

#[rstest]
fn test_phases_follow_build_system(diamond: Spec) {
    let tmpdir = tempfile::tempdir().unwrap();
    let job = job(diamond, "b", BuildSystem::CMake, tmpdir.path());
    let builder = CommandBuilder::new();
    let phases: Vec<_> = builder
        .phases(&job)
        .unwrap()
        .into_iter()
        .map(|(phase, _)| phase)
        .collect();
    assert_eq!(phases, ["cmake", "build", "install"]);

    let builder = builder.with_phases("b", [("install", "true")]);
    assert_eq!(builder.phases(&job).unwrap(), [("install".to_owned(), "true".to_owned())]);
}

#[rstest]
fn test_generic_packages_need_commands(diamond: Spec) {
    let tmpdir = tempfile::tempdir().unwrap();
    let job = job(diamond, "d", BuildSystem::Generic, tmpdir.path());
    match CommandBuilder::new().phases(&job) {
        Err(Error::Install(err)) => {
            assert_eq!(err.pkg, "d");
            assert_eq!(err.phase, "install");
        }
        other => panic!("expected an install error, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn test_commands_see_build_environment(diamond: Spec) {
    let tmpdir = tempfile::tempdir().unwrap();
    let job = job(diamond, "b", BuildSystem::Generic, tmpdir.path());
    let builder = CommandBuilder::new()
        .with_env("EXTRA", "value")
        .with_phases(
            "b",
            [
                ("configure", "echo \"$SPACKLE_PHASE\" > phase.txt"),
                (
                    "install",
                    "printf '%s\\n' \"$SPACKLE_SPEC\" \"$MAKEFLAGS\" \"$EXTRA\" > \"$PREFIX/info.txt\"",
                ),
            ],
        );
    builder.build(&job).await.unwrap();

    let info = std::fs::read_to_string(job.prefix.join("info.txt")).unwrap();
    let lines: Vec<_> = info.lines().collect();
    assert!(lines[0].starts_with("b@=1.0"), "{info}");
    assert!(lines[0].contains(" d@=1.0"), "the dependency is included: {info}");
    assert_eq!(lines[1], "-j1");
    assert_eq!(lines[2], "value");
    let phase = std::fs::read_to_string(job.stage.join("phase.txt")).unwrap();
    assert_eq!(phase.trim(), "configure");
    assert!(job.stage.join("spackle-install.log").exists());
}

#[rstest]
#[tokio::test]
async fn test_failed_phase_is_an_install_error(diamond: Spec) {
    let tmpdir = tempfile::tempdir().unwrap();
    let job = job(diamond, "d", BuildSystem::Generic, tmpdir.path());
    let builder = CommandBuilder::new().with_phases(
        "d",
        [
            ("build", "echo 'main.c:3: error: expected ;' >&2; exit 2"),
            ("install", "touch \"$PREFIX/never\""),
        ],
    );
    match builder.build(&job).await {
        Err(Error::Install(err)) => {
            assert_eq!(err.phase, "build");
            assert!(err.message.contains("status 2"), "{}", err.message);
            assert!(err.message.contains("expected ;"), "{}", err.message);
        }
        other => panic!("expected an install error, got {other:?}"),
    }
    assert!(!job.prefix.join("never").exists(), "later phases do not run");
}

#[rstest]
#[tokio::test]
async fn test_missing_shell_is_not_an_install_error(diamond: Spec) {
    let tmpdir = tempfile::tempdir().unwrap();
    let job = job(diamond, "d", BuildSystem::Generic, tmpdir.path());
    let builder = CommandBuilder::new()
        .with_shell("/no/such/shell")
        .with_phases("d", [("install", "true")]);
    assert!(matches!(
        builder.build(&job).await,
        Err(Error::ProcessSpawn(..))
    ));
}
