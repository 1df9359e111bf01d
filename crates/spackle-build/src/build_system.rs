// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use once_cell::sync::Lazy;
use spackle_foundation::version::{Version, parse_version};
use spackle_solve::BuildSystem;

use crate::cache::FileCache;
use crate::jobserver::Jobserver;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./build_system_test.rs"]
mod build_system_test;

/// A tool that runs compile units in parallel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ToolKind {
    Make,
    Ninja,
}

impl ToolKind {
    /// The oldest release that speaks the fifo jobserver protocol
    pub fn first_jobserver_version(&self) -> &'static Version {
        static MAKE: Lazy<Version> = Lazy::new(|| Version::from_parts([4, 4]));
        static NINJA: Lazy<Version> = Lazy::new(|| Version::from_parts([1, 13]));
        match self {
            Self::Make => &MAKE,
            Self::Ninja => &NINJA,
        }
    }

    pub fn executable(&self) -> &'static str {
        match self {
            Self::Make => "make",
            Self::Ninja => "ninja",
        }
    }
}

/// A parallel build tool at a known version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildTool {
    pub kind: ToolKind,
    pub version: Version,
}

impl BuildTool {
    pub fn new(kind: ToolKind, version: Version) -> Self {
        Self { kind, version }
    }

    /// True if this tool can take its jobs from a shared jobserver.
    ///
    /// Older tools would run as many jobs as they were told on top of
    /// everything else in the pool, so they are held to one job.
    pub fn supports_jobserver(&self) -> bool {
        self.version >= *self.kind.first_jobserver_version()
    }

    /// The `MAKEFLAGS` value for a build using this tool.
    pub fn makeflags(&self, jobserver: &Jobserver) -> String {
        if self.supports_jobserver() {
            format!("-j{} --jobserver-auth={}", jobserver.size(), jobserver.auth())
        } else {
            "-j1".to_owned()
        }
    }

    /// Find the installed version of a tool by asking it.
    pub async fn detect(kind: ToolKind) -> Result<Self> {
        let output = tokio::process::Command::new(kind.executable())
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::ProcessSpawn(format!("{} --version", kind.executable()), err))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = parse_tool_version(&stdout).ok_or_else(|| {
            Error::internal(format!(
                "could not find a version in the output of {} --version",
                kind.executable()
            ))
        })?;
        Ok(Self::new(kind, version))
    }

    /// Like [`BuildTool::detect`], remembering the answer in a cache.
    pub async fn detect_cached(kind: ToolKind, cache: &FileCache) -> Result<Self> {
        let key = format!("tools/{kind}");
        if let Some(data) = cache.read(&key).await? {
            match parse_version(String::from_utf8_lossy(&data).trim()) {
                Ok(version) => return Ok(Self::new(kind, version)),
                Err(err) => tracing::warn!(?err, %kind, "ignoring invalid cached tool version"),
            }
        }
        let tool = Self::detect(kind).await?;
        cache.write(&key, tool.version.to_string().as_bytes()).await?;
        Ok(tool)
    }
}

/// Pull the version out of the first line of `--version` output.
///
/// Handles both `GNU Make 4.4.1` and a bare `1.13.0`.
pub fn parse_tool_version(output: &str) -> Option<Version> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .filter(|word| word.starts_with(|c: char| c.is_ascii_digit()))
        .map(|word| word.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()))
        .find_map(|word| parse_version(word).ok())
}

/// What the installer needs to know about a build system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Phases run in order to build and install a package
    pub phases: &'static [&'static str],
    /// Arguments passed to the configure step, if there is one
    pub default_args: &'static [&'static str],
    /// The tool that runs compile units, if they run in parallel
    pub parallel_tool: Option<ToolKind>,
}

pub fn capabilities(build_system: BuildSystem) -> Capabilities {
    match build_system {
        BuildSystem::Generic => Capabilities {
            phases: &["install"],
            default_args: &[],
            parallel_tool: None,
        },
        BuildSystem::Autotools => Capabilities {
            phases: &["autoreconf", "configure", "build", "install"],
            default_args: &["--disable-dependency-tracking"],
            parallel_tool: Some(ToolKind::Make),
        },
        BuildSystem::CMake => Capabilities {
            phases: &["cmake", "build", "install"],
            default_args: &["-G", "Ninja", "-DCMAKE_BUILD_TYPE=Release"],
            parallel_tool: Some(ToolKind::Ninja),
        },
        BuildSystem::Makefile => Capabilities {
            phases: &["edit", "build", "install"],
            default_args: &[],
            parallel_tool: Some(ToolKind::Make),
        },
        BuildSystem::Meson => Capabilities {
            phases: &["meson", "build", "install"],
            default_args: &["--buildtype=release"],
            parallel_tool: Some(ToolKind::Ninja),
        },
        BuildSystem::Python => Capabilities {
            phases: &["install"],
            default_args: &["--no-build-isolation"],
            parallel_tool: None,
        },
        BuildSystem::Bundle => Capabilities {
            phases: &[],
            default_args: &[],
            parallel_tool: None,
        },
    }
}

/// The shell command run for one phase when nothing more specific is
/// configured for the package.
pub fn default_command(build_system: BuildSystem, phase: &str) -> Option<String> {
    let args = capabilities(build_system).default_args.join(" ");
    let command = match (build_system, phase) {
        (BuildSystem::Autotools, "autoreconf") => {
            "test -f configure || autoreconf --install".to_owned()
        }
        (BuildSystem::Autotools, "configure") => format!("./configure --prefix=\"$PREFIX\" {args}"),
        (BuildSystem::Autotools | BuildSystem::Makefile, "build") => "make".to_owned(),
        (BuildSystem::Autotools, "install") => "make install".to_owned(),
        (BuildSystem::Makefile, "edit") => "true".to_owned(),
        (BuildSystem::Makefile, "install") => "make install PREFIX=\"$PREFIX\"".to_owned(),
        (BuildSystem::CMake, "cmake") => {
            format!("cmake -S . -B spackle-build -DCMAKE_INSTALL_PREFIX=\"$PREFIX\" {args}")
        }
        (BuildSystem::CMake, "build") => "cmake --build spackle-build".to_owned(),
        (BuildSystem::CMake, "install") => "cmake --install spackle-build".to_owned(),
        (BuildSystem::Meson, "meson") => {
            format!("meson setup spackle-build --prefix=\"$PREFIX\" {args}")
        }
        (BuildSystem::Meson, "build") => "meson compile -C spackle-build".to_owned(),
        (BuildSystem::Meson, "install") => "meson install -C spackle-build".to_owned(),
        (BuildSystem::Python, "install") => {
            format!("python -m pip install --prefix=\"$PREFIX\" {args} .")
        }
        _ => return None,
    };
    Some(command.trim_end().to_owned())
}
