// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spackle.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("spackle::generic"))
    )
)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(code(spackle::invalid_name))]
    InvalidNameError(#[from] super::InvalidNameError),
}
