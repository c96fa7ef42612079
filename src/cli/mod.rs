//! Command-line interface definitions for the `cumulus` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `cumulus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cumulus",
    about = "Provision an OpenStack server and hand it to your bootstrap tooling",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a server, wait for readiness, and bootstrap it.
    #[command(
        name = "create",
        about = "Create a server, wait for readiness, and bootstrap it"
    )]
    Create(CreateCommand),
}

/// Arguments for the `cumulus create` subcommand.
///
/// Every flag overrides the corresponding configuration value; settings not
/// given here fall back to environment variables and configuration files.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Override the flavor (name or identifier) for this run.
    #[arg(long, value_name = "FLAVOR")]
    pub(crate) flavor: Option<String>,
    /// Override the image (identifier or name pattern) for this run.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Name for the new node; generated when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) node_name: Option<String>,
    /// Associate a floating IP: bare flag picks a free allocated address,
    /// a value requests that specific address.
    #[arg(long, value_name = "IP", num_args = 0..=1, default_missing_value = "")]
    pub(crate) floating_ip: Option<String>,
    /// Key pair name to inject into the instance.
    #[arg(long, value_name = "KEY")]
    pub(crate) key_pair: Option<String>,
    /// Availability zone hint for the scheduler.
    #[arg(long, value_name = "ZONE")]
    pub(crate) availability_zone: Option<String>,
    /// Path to a user-data file handed to the instance on first boot.
    #[arg(long, value_name = "PATH")]
    pub(crate) user_data: Option<String>,
    /// Bootstrap channel: ssh or winrm.
    #[arg(long, value_name = "PROTOCOL")]
    pub(crate) bootstrap_protocol: Option<String>,
    /// Network whose address is used for bootstrapping.
    #[arg(long, value_name = "NETWORK")]
    pub(crate) bootstrap_network: Option<String>,
    /// Bootstrap over the private network.
    #[arg(long)]
    pub(crate) private_network: bool,
    /// Comma-separated run list applied on the first run.
    #[arg(long, value_name = "ITEM", value_delimiter = ',')]
    pub(crate) run_list: Vec<String>,
    /// Environment for the new node.
    #[arg(long, value_name = "ENVIRONMENT")]
    pub(crate) environment: Option<String>,
    /// SSH user for the bootstrap connection.
    #[arg(long, value_name = "USER")]
    pub(crate) ssh_user: Option<String>,
    /// SSH identity file for key-based authentication.
    #[arg(long, value_name = "PATH")]
    pub(crate) identity_file: Option<String>,
    /// Seconds to wait for the instance to become active.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) server_create_timeout: Option<u64>,
}
