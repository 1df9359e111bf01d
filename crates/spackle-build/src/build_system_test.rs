// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::time::Duration;

use rstest::rstest;
use spackle_foundation::version::parse_version;
use spackle_solve::BuildSystem;

use super::{BuildTool, ToolKind, capabilities, default_command, parse_tool_version};
use crate::cache::FileCache;
use crate::jobserver::Jobserver;

#[rstest]
#[case(ToolKind::Make, "4.4", true)]
#[case(ToolKind::Make, "4.4.1", true)]
#[case(ToolKind::Make, "4.3", false)]
#[case(ToolKind::Make, "3.82", false)]
#[case(ToolKind::Ninja, "1.13.0", true)]
#[case(ToolKind::Ninja, "1.12.1", false)]
fn test_supports_jobserver(#[case] kind: ToolKind, #[case] version: &str, #[case] expected: bool) {
    let tool = BuildTool::new(kind, parse_version(version).unwrap());
    assert_eq!(tool.supports_jobserver(), expected);
}

#[rstest]
#[tokio::test]
async fn test_makeflags() {
    let jobserver = Jobserver::new(4).unwrap();
    let new_make = BuildTool::new(ToolKind::Make, parse_version("4.4.1").unwrap());
    let flags = new_make.makeflags(&jobserver);
    assert!(flags.starts_with("-j4 --jobserver-auth=fifo:"), "{flags}");
    assert!(flags.ends_with(&jobserver.path().display().to_string()));

    let old_ninja = BuildTool::new(ToolKind::Ninja, parse_version("1.11").unwrap());
    assert_eq!(old_ninja.makeflags(&jobserver), "-j1");
}

#[rstest]
#[case("GNU Make 4.4.1\nBuilt for x86_64-pc-linux-gnu\n", Some("4.4.1"))]
#[case("1.13.0\n", Some("1.13.0"))]
#[case("ninja: command not found\n", None)]
#[case("", None)]
fn test_parse_tool_version(#[case] output: &str, #[case] expected: Option<&str>) {
    let expected = expected.map(|v| parse_version(v).unwrap());
    assert_eq!(parse_tool_version(output), expected);
}

#[rstest]
#[tokio::test]
async fn test_detect_uses_cache() {
    let tmpdir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(tmpdir.path(), Duration::from_secs(5));
    cache.write("tools/ninja", b"1.13.1\n").await.unwrap();
    let tool = BuildTool::detect_cached(ToolKind::Ninja, &cache).await.unwrap();
    assert_eq!(tool.version, parse_version("1.13.1").unwrap());
    assert!(tool.supports_jobserver());
}

#[rstest]
#[case(BuildSystem::Generic, &["install"], None)]
#[case(BuildSystem::Autotools, &["autoreconf", "configure", "build", "install"], Some(ToolKind::Make))]
#[case(BuildSystem::CMake, &["cmake", "build", "install"], Some(ToolKind::Ninja))]
#[case(BuildSystem::Bundle, &[], None)]
fn test_capabilities(
    #[case] build_system: BuildSystem,
    #[case] phases: &[&str],
    #[case] tool: Option<ToolKind>,
) {
    let caps = capabilities(build_system);
    assert_eq!(caps.phases, phases);
    assert_eq!(caps.parallel_tool, tool);
}

#[rstest]
fn test_every_phase_has_a_default_command() {
    for build_system in [
        BuildSystem::Generic,
        BuildSystem::Autotools,
        BuildSystem::CMake,
        BuildSystem::Makefile,
        BuildSystem::Meson,
        BuildSystem::Python,
        BuildSystem::Bundle,
    ] {
        for phase in capabilities(build_system).phases {
            if build_system == BuildSystem::Generic {
                continue;
            }
            let command = default_command(build_system, phase);
            assert!(command.is_some(), "{build_system:?} has no command for {phase}");
        }
    }
    let configure = default_command(BuildSystem::CMake, "cmake").unwrap();
    assert!(configure.contains("-G Ninja"), "{configure}");
    assert!(default_command(BuildSystem::Generic, "install").is_none());
}
