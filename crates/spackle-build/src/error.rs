// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A build that failed for reasons the user can act on.
///
/// These are reported as failures rather than errors, and are the
/// only kind of failure that may leave a prefix behind for debugging.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
#[error("Failed to install {pkg} during {phase}: {message}")]
#[diagnostic(code(spackle::install::failed))]
pub struct InstallError {
    pub pkg: String,
    pub phase: String,
    pub message: String,
}

impl InstallError {
    pub fn new(pkg: impl ToString, phase: impl ToString, message: impl ToString) -> Self {
        Self {
            pkg: pkg.to_string(),
            phase: phase.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spackle.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("spackle::generic"))
    )
)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Install(#[from] InstallError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Spec(#[from] spackle_spec::Error),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Solve(#[from] spackle_solve::Error),
    #[error("Install prefix already exists: {0:?}")]
    #[diagnostic(
        code(spackle::install::prefix_exists),
        help("remove it, or enable install.overwrite to replace it")
    )]
    PrefixExists(PathBuf),
    #[error("Timed out after {waited:?} waiting for a lock on {path:?}")]
    #[diagnostic(
        code(spackle::lock_timeout),
        help("another process may be stuck holding this lock")
    )]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("Failed to {0}: {1:?}")]
    #[diagnostic(code(spackle::io))]
    Io(&'static str, PathBuf, #[source] std::io::Error),
    #[error("Install database at {0:?} is corrupt")]
    #[diagnostic(code(spackle::database::corrupt))]
    CorruptDatabase(PathBuf, #[source] serde_json::Error),
    #[error("Failed to run {0}")]
    #[diagnostic(code(spackle::process_spawn))]
    ProcessSpawn(String, #[source] std::io::Error),
    #[error("Internal error: {0}")]
    #[diagnostic(code(spackle::internal))]
    Internal(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn io(what: &'static str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io(what, path.into(), err)
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::Internal(message.to_string())
    }

    /// True for errors that no retry or later attempt could fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PrefixExists(_) | Self::CorruptDatabase(..))
    }
}
