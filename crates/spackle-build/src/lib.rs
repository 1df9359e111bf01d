// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Installing concrete specs into prefixes, in dependency order.

mod build_system;
mod builder;
mod cache;
mod database;
mod error;
mod installer;
mod jobserver;
mod lock;
mod prefix;
mod report;
mod state;

pub use build_system::{
    BuildTool,
    Capabilities,
    ToolKind,
    capabilities,
    default_command,
    parse_tool_version,
};
pub use builder::{BuildJob, Builder, CommandBuilder};
pub use cache::FileCache;
pub use database::{DATABASE_VERSION, InstallDatabase, InstallRecord};
pub use error::{Error, InstallError, Result};
pub use installer::{Installer, prefix_name};
pub use jobserver::{JobToken, Jobserver, TokenAudit};
pub use lock::{FileLock, LockKind};
pub use prefix::{FailedPrefix, PrefixTransaction, RecoveryReport, recover_prefixes};
pub use report::{BuildReport, BuildResult, NodeReport};
pub use state::{InstallPlan, InstallState};
