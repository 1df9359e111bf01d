// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use thiserror::Error;

/// Two constraints on the same attribute that cannot both hold.
///
/// This carries no package context, callers that know which
/// node the attribute belongs to are expected to add it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{attribute}: '{left}' conflicts with '{right}'")]
pub struct Conflict {
    pub attribute: String,
    pub left: String,
    pub right: String,
}

impl Conflict {
    pub fn new(
        attribute: impl Into<String>,
        left: impl std::fmt::Display,
        right: impl std::fmt::Display,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}
