//! Binary entry point for the cumulus CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cumulus::{
    CreateConfig, OpenStackConfig, OpenStackProvider, ProcessBootstrap, ProvisionError,
    ProvisionPlan, Provisioner, ProvisioningResult,
};

mod cli;

use cli::{Cli, CreateCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to read user data {path}: {message}")]
    UserData { path: Utf8PathBuf, message: String },
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Create(command) => create_command(command).await,
    }
}

async fn create_command(args: CreateCommand) -> Result<i32, CliError> {
    let openstack =
        OpenStackConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let mut create =
        CreateConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    apply_overrides(&mut create, &args);

    let user_data = match &create.user_data {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|err| CliError::UserData {
            path: path.clone(),
            message: err.to_string(),
        })?),
        None => None,
    };

    let plan = create
        .to_plan(user_data)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provider =
        OpenStackProvider::new(openstack).map_err(|err| CliError::Config(err.to_string()))?;
    let bootstrap = ProcessBootstrap::with_process_runner(create.bootstrap_command.clone());
    let provisioner =
        Provisioner::new(provider, bootstrap).with_create_timeout(create.create_timeout());

    let result = provisioner.provision(&plan).await?;
    print_summary(io::stdout(), &plan, &result);
    // The bootstrap command's exit status is the run's exit status.
    Ok(result.exit_code)
}

fn apply_overrides(config: &mut CreateConfig, args: &CreateCommand) {
    if let Some(flavor) = &args.flavor {
        config.flavor = flavor.clone();
    }
    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(node_name) = &args.node_name {
        config.node_name = Some(node_name.clone());
    }
    if let Some(floating_ip) = &args.floating_ip {
        config.floating_ip = floating_ip.clone();
    }
    if let Some(key_pair) = &args.key_pair {
        config.key_pair = Some(key_pair.clone());
    }
    if let Some(zone) = &args.availability_zone {
        config.availability_zone = Some(zone.clone());
    }
    if let Some(user_data) = &args.user_data {
        config.user_data = Some(Utf8PathBuf::from(user_data));
    }
    if let Some(protocol) = &args.bootstrap_protocol {
        config.bootstrap_protocol = protocol.clone();
    }
    if let Some(network) = &args.bootstrap_network {
        config.bootstrap_network = network.clone();
    }
    if args.private_network {
        config.private_network = true;
    }
    if !args.run_list.is_empty() {
        config.run_list = args.run_list.clone();
    }
    if let Some(environment) = &args.environment {
        config.environment = Some(environment.clone());
    }
    if let Some(user) = &args.ssh_user {
        config.ssh_user = user.clone();
    }
    if let Some(identity) = &args.identity_file {
        config.identity_file = Some(Utf8PathBuf::from(identity));
    }
    if let Some(timeout) = args.server_create_timeout {
        config.server_create_timeout = timeout;
    }
}

fn print_summary(mut target: impl Write, plan: &ProvisionPlan, result: &ProvisioningResult) {
    writeln!(target, "Instance ID: {}", result.instance.id).ok();
    writeln!(target, "Instance Name: {}", result.instance.name).ok();
    writeln!(target, "Flavor: {}", result.instance.flavor_id).ok();
    writeln!(target, "Image: {}", result.instance.image_id).ok();
    match &result.instance.key_name {
        Some(key_name) => {
            writeln!(target, "Key Pair: {key_name}").ok();
        }
        None => {
            if let Some(password) = &result.instance.password {
                writeln!(target, "Password: {password}").ok();
            }
        }
    }
    for (network, records) in result.instance.addresses.iter() {
        let joined = records
            .iter()
            .map(|record| record.address.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(target, "{network} IP addresses: {joined}").ok();
    }
    writeln!(
        target,
        "Environment: {}",
        plan.bootstrap.environment.as_deref().unwrap_or("_default")
    )
    .ok();
    if !plan.bootstrap.run_list.is_empty() {
        writeln!(target, "Run List: {}", plan.bootstrap.run_list.join(", ")).ok();
    }
    writeln!(
        target,
        "Bootstrapped {} over {} (exit {})",
        result.target.address,
        result.target.protocol.as_str(),
        result.exit_code
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
