// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use spackle_solve::BuildSystem;
use spackle_spec::{NodeId, Spec, SpecNode};

use crate::build_system::{capabilities, default_command};
use crate::{Error, InstallError, Result};

#[cfg(test)]
#[path = "./builder_test.rs"]
mod builder_test;

/// Lines of output kept in the message of a failed phase
const OUTPUT_TAIL: usize = 10;

/// Everything needed to build and install one node.
#[derive(Clone, Debug)]
pub struct BuildJob {
    pub spec: Arc<Spec>,
    pub node: NodeId,
    pub build_system: BuildSystem,
    /// Where the package must install itself
    pub prefix: PathBuf,
    /// A scratch directory for the build, removed afterwards
    pub stage: PathBuf,
    /// Parallelism for the build tool, see [`crate::BuildTool::makeflags`]
    pub makeflags: String,
    pub run_tests: bool,
}

impl BuildJob {
    pub fn pkg(&self) -> &SpecNode {
        self.spec.node(self.node)
    }

    pub fn name(&self) -> &str {
        self.pkg().display_name()
    }

    /// The spec of this node and everything below it
    pub fn spec_string(&self) -> String {
        self.spec.extract(self.node).to_string()
    }
}

/// Builds one package into its prefix.
///
/// Expected build problems, such as a compiler error, are returned as
/// [`Error::Install`]. Any other error is treated as a problem with
/// the installer itself.
#[async_trait::async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, job: &BuildJob) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: Builder + ?Sized> Builder for Arc<T> {
    async fn build(&self, job: &BuildJob) -> Result<()> {
        (**self).build(job).await
    }
}

/// Runs one shell command per build phase.
///
/// Commands run in the stage directory with `PREFIX`, `MAKEFLAGS`,
/// `SPACKLE_SPEC` and `SPACKLE_PHASE` set. Phases and commands come
/// from the package's build system unless overridden per package.
#[derive(Clone, Debug)]
pub struct CommandBuilder {
    shell: String,
    env: Vec<(String, String)>,
    overrides: HashMap<String, Vec<(String, String)>>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self {
            shell: "bash".into(),
            env: Vec::new(),
            overrides: HashMap::new(),
        }
    }
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell<S: Into<String>>(mut self, shell: S) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set an extra environment variable for every command
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Use the given `(phase, command)` list for one package instead
    /// of its build system's phases.
    pub fn with_phases<I, P, C>(mut self, pkg: &str, phases: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        self.overrides.insert(
            pkg.to_owned(),
            phases
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        );
        self
    }

    /// The commands that would run for a job, in order.
    pub fn phases(&self, job: &BuildJob) -> Result<Vec<(String, String)>> {
        if let Some(phases) = self.overrides.get(job.name()) {
            return Ok(phases.clone());
        }
        let mut phases = Vec::new();
        for phase in capabilities(job.build_system).phases {
            let command = default_command(job.build_system, phase).ok_or_else(|| {
                InstallError::new(
                    job.name(),
                    phase,
                    format!("the {} build system needs a command for this phase", job.build_system),
                )
            })?;
            phases.push(((*phase).to_owned(), command));
        }
        Ok(phases)
    }

    async fn run_phase(&self, job: &BuildJob, phase: &str, command: &str) -> Result<()> {
        tracing::debug!(pkg = %job.name(), %phase, %command, "running build phase");
        let output = tokio::process::Command::new(&self.shell)
            .arg("-ec")
            .arg(command)
            .current_dir(&job.stage)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env("PREFIX", &job.prefix)
            .env("MAKEFLAGS", &job.makeflags)
            .env("SPACKLE_SPEC", job.spec_string())
            .env("SPACKLE_PHASE", phase)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| Error::ProcessSpawn(format!("{} phase of {}", phase, job.name()), err))?;

        let log = job.stage.join(format!("spackle-{phase}.log"));
        let mut contents = output.stdout.clone();
        contents.extend_from_slice(&output.stderr);
        if let Err(err) = tokio::fs::write(&log, &contents).await {
            tracing::warn!(?err, path = ?log, "failed to save build output");
        }

        if output.status.success() {
            return Ok(());
        }
        let reason = match output.status.code() {
            Some(code) => format!("command exited with status {code}"),
            None => "command was terminated by a signal".to_owned(),
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<_> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(OUTPUT_TAIL)..].join("\n");
        let message = if tail.is_empty() {
            reason
        } else {
            format!("{reason}\n{tail}")
        };
        Err(InstallError::new(job.name(), phase, message).into())
    }
}

#[async_trait::async_trait]
impl Builder for CommandBuilder {
    async fn build(&self, job: &BuildJob) -> Result<()> {
        for (phase, command) in self.phases(job)? {
            self.run_phase(job, &phase, &command).await?;
        }
        Ok(())
    }
}
