// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

pub mod arch;
mod conflict;
pub mod depflag;
pub mod digest;
pub mod flags;
pub mod name;
pub mod variant;
pub mod version;
pub mod version_range;

pub use conflict::Conflict;
