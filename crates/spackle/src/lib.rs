// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Spack-style package specs, from parsing through concretization to
//! installation.
//!
//! This crate re-exports the layers it is built from so that
//! applications need only one dependency.

mod logging;

pub use logging::{configure_logging, log_directives};
pub use {
    spackle_build as build,
    spackle_config as config,
    spackle_foundation as foundation,
    spackle_solve as solve,
    spackle_spec as spec,
};
