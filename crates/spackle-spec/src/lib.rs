// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

mod context;
mod edge;
mod error;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;
pub mod hash;
mod mutate;
mod node;
mod parser;
pub mod serialize;
mod spec;
mod splice;
pub mod token;
pub mod traverse;

pub use context::{Context, detect_host};
pub use edge::{DependencySpec, EdgeAttributes};
pub use error::{
    Error,
    ParseError,
    Result,
    SpecMutationError,
    TokenizeError,
    UnsatisfiableSpecError,
};
pub use hash::{HashDescriptor, HashRegistry};
pub use mutate::{PermissiveValidator, VariantValidator};
pub use node::{ExternalSpec, NodeId, SpecNode};
pub use parser::{SpecParser, parse, parse_one_or_raise};
pub use spec::{CopyDeps, Spec};
pub use splice::{SpliceReport, SplicedNode};
pub use spackle_foundation as foundation;
