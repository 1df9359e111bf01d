// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use miette::Diagnostic;
use spackle_foundation::Conflict;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

fn caret(offset: &usize) -> String {
    format!("{}^", " ".repeat(*offset))
}

/// Input text contained something that is not a spec token.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
#[error("Unrecognized input at offset {offset}:\n  {text}\n  {}", caret(.offset))]
#[diagnostic(code(spackle::tokenize))]
pub struct TokenizeError {
    /// Byte offset of the first unrecognized character
    pub offset: usize,
    pub text: String,
}

/// A token stream that does not follow the spec grammar.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid spec at offset {offset}: {message}\n  {text}\n  {}", caret(.offset))]
#[diagnostic(code(spackle::parse))]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
    pub text: String,
}

/// No value exists that satisfies both sides of a constraint.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
#[error("{pkg} is unsatisfiable, {attribute}: '{left}' conflicts with '{right}'")]
#[diagnostic(code(spackle::unsatisfiable))]
pub struct UnsatisfiableSpecError {
    pub pkg: String,
    pub attribute: String,
    pub left: String,
    pub right: String,
}

impl UnsatisfiableSpecError {
    pub fn new(
        pkg: impl Into<String>,
        attribute: impl Into<String>,
        left: impl ToString,
        right: impl ToString,
    ) -> Self {
        Self {
            pkg: pkg.into(),
            attribute: attribute.into(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    /// Attach the name of the offending node to an attribute conflict
    pub fn from_conflict(pkg: impl Into<String>, conflict: Conflict) -> Self {
        Self {
            pkg: pkg.into(),
            attribute: conflict.attribute,
            left: conflict.left,
            right: conflict.right,
        }
    }
}

/// A rewrite of a concrete spec that cannot be applied in place.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot mutate {pkg}: {reason}")]
#[diagnostic(code(spackle::mutation))]
pub struct SpecMutationError {
    pub pkg: String,
    pub reason: String,
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
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Unsatisfiable(#[from] UnsatisfiableSpecError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    Mutation(#[from] SpecMutationError),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    InvalidName(#[from] spackle_foundation::name::Error),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    InvalidVersion(#[from] spackle_foundation::version::Error),
    #[error(transparent)]
    #[diagnostic(forward(0))]
    InvalidVersionRange(#[from] spackle_foundation::version_range::Error),
    #[error("{pkg} is not concrete: {reason}")]
    #[diagnostic(code(spackle::not_concrete))]
    NotConcrete { pkg: String, reason: String },
    #[error("Cannot splice {replacement} into {spec}: {reason}")]
    #[diagnostic(code(spackle::splice))]
    Splice {
        spec: String,
        replacement: String,
        reason: String,
    },
    #[error("Dependency cycle through {0}")]
    #[diagnostic(code(spackle::cycle))]
    Cycle(String),
    #[error("Unknown hash descriptor: {0}")]
    #[diagnostic(code(spackle::unknown_hash))]
    UnknownHashDescriptor(String),
    #[error("Hash descriptor '{0}' is only supported for reading legacy data")]
    #[diagnostic(code(spackle::legacy_hash))]
    LegacyHashDescriptor(String),
    #[error("Invalid spec document: {0}")]
    #[diagnostic(code(spackle::invalid_document))]
    InvalidDocument(String),
    #[error("Expected exactly one spec in '{text}', found {count}")]
    #[diagnostic(code(spackle::spec_count))]
    SpecCount { text: String, count: usize },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
