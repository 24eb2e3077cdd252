//! Command-line interface definitions for the `ycfleet` binary.
//!
//! The parser lives here so both the binary and the build script can use it;
//! the build script renders the manual page from the same definitions.

use clap::Parser;

/// Top-level CLI for the `ycfleet` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ycfleet",
    about = "Keep a pool of Yandex Cloud build agents provisioned",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Reconcile demand against the cloud and launch the resulting agents.
    #[command(
        name = "provision",
        about = "Reuse, wake, or create instances and launch agents on them"
    )]
    Provision(ProvisionCommand),
    /// List instances under the account filter.
    #[command(
        name = "orphans",
        about = "List instances under the account filter (no live-worker view in a fresh process)"
    )]
    Orphans(OrphansCommand),
}

/// Arguments for the `ycfleet provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Number of workers wanted.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub(crate) count: usize,
    /// Create an instance when none can be reused.
    #[arg(long, conflicts_with = "force_create")]
    pub(crate) allow_create: bool,
    /// Create an instance when none can be reused (forced by the caller).
    #[arg(long, conflicts_with = "allow_create")]
    pub(crate) force_create: bool,
}

/// Arguments for the `ycfleet orphans` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct OrphansCommand {
    /// Print at most this many instances.
    #[arg(long, value_name = "N")]
    pub(crate) limit: Option<usize>,
}
