// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

fn format_notes(notes: &[String]) -> String {
    notes.iter().map(|n| format!("\n * {n}")).collect()
}

/// A request that could not be turned into a concrete spec.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
pub enum ConcretizationError {
    /// Every candidate for one package was tried and rejected
    #[error("Out of options for {pkg} (requested as '{request}'){}", format_notes(.notes))]
    #[diagnostic(
        code(spackle::concretize::out_of_options),
        help("each line above explains why one candidate was rejected")
    )]
    OutOfOptions {
        pkg: String,
        request: String,
        notes: Vec<String>,
    },
    /// The concrete graph breaks a rule of its own recipes
    #[error("{pkg} conflicts with '{conflict}': {message}")]
    #[diagnostic(code(spackle::concretize::conflict))]
    Conflict {
        pkg: String,
        conflict: String,
        message: String,
    },
    /// A constraint named a dependency that the result does not have
    #[error("{pkg} does not depend on {dependency}")]
    #[diagnostic(code(spackle::concretize::missing_dependency))]
    MissingDependency { pkg: String, dependency: String },
    #[error("Gave up after {attempts} rejected candidates, the last while resolving {pkg}")]
    #[diagnostic(
        code(spackle::concretize::too_many_attempts),
        help("raise concretizer.max_attempts, or constrain the request further")
    )]
    TooManyAttempts { attempts: usize, pkg: String },
    /// The concretizer produced something that is not a valid concrete spec
    #[error("Concretizer produced an invalid spec for {pkg}: {reason}")]
    #[diagnostic(code(spackle::concretize::invariant))]
    InvariantViolated { pkg: String, reason: String },
    #[error("Cannot concretize '{0}', it does not name a package")]
    #[diagnostic(code(spackle::concretize::anonymous))]
    Anonymous(String),
    #[error("Concretizing {request} twice gave different results: {first} != {second}")]
    #[diagnostic(code(spackle::concretize::nondeterministic))]
    NonDeterministic {
        request: String,
        first: String,
        second: String,
    },
}

impl ConcretizationError {
    /// True for errors that no other choice of candidates can fix.
    ///
    /// Everything else is a reason to backtrack.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TooManyAttempts { .. }
                | Self::InvariantViolated { .. }
                | Self::NonDeterministic { .. }
                | Self::Anonymous(_)
        )
    }

    /// A single line message, for listing as a note
    pub fn summary(&self) -> String {
        match self {
            Self::OutOfOptions { pkg, notes, .. } if !notes.is_empty() => {
                format!("no option for {pkg} works ({})", notes.join("; "))
            }
            _ => self.to_string().lines().next().unwrap_or_default().to_owned(),
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
    Concretization(#[from] ConcretizationError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Spec(#[from] spackle_spec::Error),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Unsatisfiable(#[from] spackle_spec::UnsatisfiableSpecError),
    #[error("Invalid recipe for {pkg}: {reason}")]
    #[diagnostic(code(spackle::invalid_recipe))]
    InvalidRecipe { pkg: String, reason: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn invalid_recipe(pkg: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidRecipe {
            pkg: pkg.to_string(),
            reason: reason.to_string(),
        }
    }
}
