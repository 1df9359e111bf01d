// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use miette::{Context, IntoDiagnostic, Result};

#[cfg(test)]
#[path = "./logging_test.rs"]
mod logging_test;

/// The filter directives for a verbosity level.
///
/// `spackle_log` is added to the defaults, while `rust_log` replaces
/// them entirely.
pub fn log_directives(verbosity: u32, spackle_log: Option<&str>, rust_log: Option<&str>) -> String {
    if let Some(overrides) = rust_log {
        return overrides.to_owned();
    }
    let directives = match verbosity {
        0 => "spackle=info",
        1 => "spackle=debug",
        _ => "spackle=trace",
    };
    match spackle_log {
        Some(extra) if !extra.is_empty() && extra != directives => format!("{directives},{extra}"),
        _ => directives.to_owned(),
    }
}

/// Install the global logger, writing to stderr.
///
/// Reads `SPACKLE_LOG` and `RUST_LOG` as described in
/// [`log_directives`]. Targets are only shown from verbosity 3.
pub fn configure_logging(verbosity: u32) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;

    let spackle_log = std::env::var("SPACKLE_LOG").ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let directives = log_directives(verbosity, spackle_log.as_deref(), rust_log.as_deref());
    let env_filter = tracing_subscriber::filter::EnvFilter::new(directives);
    let registry = tracing_subscriber::Registry::default().with(env_filter);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(verbosity >= 3);
    let sub = registry.with(fmt_layer);
    tracing::subscriber::set_global_default(sub)
        .into_diagnostic()
        .wrap_err("Failed to set default logger")
}
