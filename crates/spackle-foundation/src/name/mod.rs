// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

mod error;

use std::borrow::Borrow;
use std::fmt::Write;
use std::str::FromStr;

pub use error::{Error, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
#[path = "./name_test.rs"]
mod name_test;

/// Denotes that an invalid package name was given.
#[derive(Debug, Error)]
#[error("Invalid name: {message}")]
pub struct InvalidNameError {
    pub message: String,
}

impl InvalidNameError {
    pub fn new_error(msg: String) -> Error {
        Error::InvalidNameError(Self { message: msg })
    }
}

/// A valid package name.
///
/// Names start with a letter, digit or underscore and may
/// continue with any of those or a hyphen.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PkgName(String);

impl PkgName {
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap the given string as a package name
    pub fn new<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Validate the given string as a package name
    pub fn validate<S: AsRef<str> + ?Sized>(s: &S) -> Result<()> {
        validate_pkg_name(s.as_ref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::ops::Deref for PkgName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PkgName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PkgName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PkgName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PkgName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PkgName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PkgName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PkgName> for String {
    fn from(value: PkgName) -> Self {
        value.0
    }
}

impl PartialEq<str> for PkgName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PkgName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Return true if the given character may appear after the
/// first position of a package name.
pub fn is_valid_pkg_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Ensure that the provided string is a valid package name
fn validate_pkg_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(InvalidNameError::new_error(
            "Invalid package name, must not be empty".to_string(),
        ));
    }
    if name.len() > PkgName::MAX_LEN {
        return Err(InvalidNameError::new_error(format!(
            "Invalid package name, must be no more than {} characters, got {} [{}]",
            PkgName::MAX_LEN,
            name,
            name.len(),
        )));
    }
    if let Some('-') = name.chars().next() {
        return Err(InvalidNameError::new_error(format!(
            "Invalid package name, must begin with a letter, digit or underscore \
             and not a hyphen, got {name}"
        )));
    }
    match name.char_indices().find(|(_, c)| !is_valid_pkg_name_char(*c)) {
        None => Ok(()),
        Some((index, c)) => {
            let mut err_str = String::with_capacity(name.len() + 4);
            let _ = write!(
                err_str,
                "{} > {c} < {}",
                &name[..index],
                &name[index + c.len_utf8()..]
            );
            Err(InvalidNameError::new_error(format!(
                "Invalid package name at pos {index}: {err_str}"
            )))
        }
    }
}
