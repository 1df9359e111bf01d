// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Turning abstract spec requests into concrete spec graphs.

mod concretizer;
mod error;
mod invariants;
mod recipe;
mod rules;
pub mod validation;

pub use concretizer::{BacktrackingConcretizer, Concretizer};
pub use error::{ConcretizationError, Error, Result};
pub use invariants::check_invariants;
pub use recipe::{
    BuildSystem,
    ConflictDecl,
    DependencyDecl,
    PackageRecipe,
    ProvidesDecl,
    VariantDecl,
    VariantDefault,
    VariantKind,
    VersionDecl,
    canonical_source,
};
pub use rules::{ALL_PACKAGES, ExternalRule, PackageRules, RuleSet};
pub use validation::{Compatibility, ValidatorT, Validators, default_validators};
