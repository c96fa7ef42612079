//! Bootstrap collaborator contract and the process-spawning implementation.
//!
//! The bootstrap step installs and runs the configuration-management agent
//! on the new instance. This crate treats it as an opaque collaborator that
//! takes a target address plus a derived configuration and yields an exit
//! status; the shipped implementation shells out to the operator's
//! configured bootstrap command (by default `knife`), inheriting stdio so
//! progress streams straight through to the terminal.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Command;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::probe::Protocol;
use crate::provider::Instance;

/// Address, port, and protocol chosen for the bootstrap handoff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapTarget {
    /// The single address selected for remote execution.
    pub address: String,
    /// TCP port of the remote-execution channel.
    pub port: u16,
    /// Channel protocol.
    pub protocol: Protocol,
}

/// SSH credentials and transport settings for the bootstrap step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Remote user to connect as.
    pub user: String,
    /// Password, when key-based authentication is not in use.
    pub password: Option<String>,
    /// SSH port.
    pub port: u16,
    /// Identity file used for authentication.
    pub identity_file: Option<Utf8PathBuf>,
    /// Whether to verify the remote host key.
    pub host_key_verify: bool,
    /// Whether remote commands need sudo (derived, non-root users only).
    pub use_sudo: bool,
}

impl SshSettings {
    /// Default SSH user.
    pub const DEFAULT_USER: &'static str = "root";
    /// Default SSH port.
    pub const DEFAULT_PORT: u16 = 22;
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: Self::DEFAULT_USER.to_owned(),
            password: None,
            port: Self::DEFAULT_PORT,
            identity_file: None,
            host_key_verify: true,
            use_sudo: false,
        }
    }
}

/// WinRM credentials and transport settings for the bootstrap step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinrmSettings {
    /// Remote user to connect as.
    pub user: String,
    /// Password for the remote user.
    pub password: Option<String>,
    /// WinRM port.
    pub port: u16,
    /// WinRM transport (for example `plaintext` or `ssl`).
    pub transport: Option<String>,
    /// Kerberos keytab file, when Kerberos authentication is in use.
    pub kerberos_keytab_file: Option<Utf8PathBuf>,
}

impl WinrmSettings {
    /// Default WinRM user.
    pub const DEFAULT_USER: &'static str = "Administrator";
    /// Default WinRM port.
    pub const DEFAULT_PORT: u16 = 5985;
}

impl Default for WinrmSettings {
    fn default() -> Self {
        Self {
            user: Self::DEFAULT_USER.to_owned(),
            password: None,
            port: Self::DEFAULT_PORT,
            transport: None,
            kerberos_keytab_file: None,
        }
    }
}

/// Configuration handed to the bootstrap collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapConfig {
    /// Channel protocol used for the handoff.
    pub protocol: Protocol,
    /// Node name registered with the configuration-management server.
    pub node_name: String,
    /// Roles and recipes to apply on the first run.
    pub run_list: Vec<String>,
    /// Environment for the new node.
    pub environment: Option<String>,
    /// JSON attributes added to the first run.
    pub first_boot_attributes: serde_json::Value,
    /// Secret key used to encrypt data bag item values.
    pub secret: Option<String>,
    /// File containing the secret key.
    pub secret_file: Option<Utf8PathBuf>,
    /// SSH settings, used when `protocol` is [`Protocol::Ssh`].
    pub ssh: SshSettings,
    /// WinRM settings, used when `protocol` is [`Protocol::Winrm`].
    pub winrm: WinrmSettings,
}

impl BootstrapConfig {
    /// Creates a config with defaults for the given protocol.
    #[must_use]
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            node_name: String::new(),
            run_list: Vec::new(),
            environment: None,
            first_boot_attributes: serde_json::Value::Null,
            secret: None,
            secret_file: None,
            ssh: SshSettings::default(),
            winrm: WinrmSettings::default(),
        }
    }

    /// Port of the channel selected by `protocol`.
    #[must_use]
    pub const fn target_port(&self) -> u16 {
        match self.protocol {
            Protocol::Ssh => self.ssh.port,
            Protocol::Winrm => self.winrm.port,
        }
    }

    /// Adopts explicitly overridden WinRM values into SSH fields that still
    /// hold their defaults.
    ///
    /// Some configuration front-ends populate the WinRM credential scheme
    /// even when the SSH channel ends up being used; this merge keeps the
    /// two schemes from stomping on each other. It applies only when the
    /// SSH channel is selected.
    pub fn merge_winrm_overrides(&mut self) {
        if self.protocol == Protocol::Winrm {
            return;
        }
        if self.ssh.user == SshSettings::DEFAULT_USER
            && self.winrm.user != WinrmSettings::DEFAULT_USER
        {
            self.ssh.user = self.winrm.user.clone();
        }
        if self.ssh.port == SshSettings::DEFAULT_PORT
            && self.winrm.port != WinrmSettings::DEFAULT_PORT
        {
            self.ssh.port = self.winrm.port;
        }
        if self.ssh.password.is_none() && self.winrm.password.is_some() {
            self.ssh.password = self.winrm.password.clone();
        }
        if self.ssh.identity_file.is_none() && self.winrm.kerberos_keytab_file.is_some() {
            self.ssh.identity_file = self.winrm.kerberos_keytab_file.clone();
        }
    }

    /// Derives the per-instance config handed to the collaborator.
    ///
    /// The node name is filled in, the provider-generated admin password is
    /// adopted when no key pair is attached, and sudo is enabled for
    /// non-root SSH users. When a key pair is attached the password is
    /// cleared so key-based authentication is used.
    #[must_use]
    pub fn for_instance(&self, node_name: &str, instance: &Instance) -> Self {
        let mut config = self.clone();
        config.node_name = node_name.to_owned();
        if instance.key_name.is_none() {
            config.ssh.password = config.ssh.password.or_else(|| instance.password.clone());
        } else {
            config.ssh.password = None;
        }
        config.ssh.use_sudo = config.ssh.user != SshSettings::DEFAULT_USER;
        config
    }
}

/// Errors raised while running the bootstrap step.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BootstrapError {
    /// Raised when the bootstrap command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the bootstrap command finishes without an exit status.
    #[error("{program} terminated without an exit status")]
    MissingExitCode {
        /// Command that completed without a status.
        program: String,
    },
}

/// Future returned by bootstrap operations.
pub type BootstrapFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, BootstrapError>> + Send + 'a>>;

/// Opaque bootstrap collaborator.
pub trait Bootstrap {
    /// Runs the bootstrap step against `target`, returning its exit status
    /// unmodified.
    fn run<'a>(
        &'a self,
        target: &'a BootstrapTarget,
        config: &'a BootstrapConfig,
    ) -> BootstrapFuture<'a, i32>;
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BootstrapError>;
}

/// Real command runner that shells out to the host operating system,
/// inheriting stdout and stderr so bootstrap progress streams through.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BootstrapError> {
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|err| BootstrapError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: status.code(),
        })
    }
}

/// Bootstrap implementation that spawns the configured bootstrap command
/// with a knife-compatible argument set.
#[derive(Clone, Debug)]
pub struct ProcessBootstrap<R: CommandRunner> {
    program: String,
    runner: R,
}

impl ProcessBootstrap<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub const fn with_process_runner(program: String) -> Self {
        Self::new(program, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> ProcessBootstrap<R> {
    /// Creates a bootstrap using the provided runner and program.
    #[must_use]
    pub const fn new(program: String, runner: R) -> Self {
        Self { program, runner }
    }

    fn build_args(target: &BootstrapTarget, config: &BootstrapConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match target.protocol {
            Protocol::Ssh => {
                args.push(OsString::from("bootstrap"));
                args.push(OsString::from(&target.address));
                args.push(OsString::from("--ssh-user"));
                args.push(OsString::from(&config.ssh.user));
                args.push(OsString::from("--ssh-port"));
                args.push(OsString::from(config.ssh.port.to_string()));
                if let Some(password) = &config.ssh.password {
                    args.push(OsString::from("--ssh-password"));
                    args.push(OsString::from(password));
                }
                if let Some(identity) = &config.ssh.identity_file {
                    args.push(OsString::from("--identity-file"));
                    args.push(OsString::from(identity.as_str()));
                }
                if !config.ssh.host_key_verify {
                    args.push(OsString::from("--no-host-key-verify"));
                }
                if config.ssh.use_sudo {
                    args.push(OsString::from("--sudo"));
                }
            }
            Protocol::Winrm => {
                args.push(OsString::from("bootstrap"));
                args.push(OsString::from("windows"));
                args.push(OsString::from("winrm"));
                args.push(OsString::from(&target.address));
                args.push(OsString::from("--winrm-user"));
                args.push(OsString::from(&config.winrm.user));
                args.push(OsString::from("--winrm-port"));
                args.push(OsString::from(config.winrm.port.to_string()));
                if let Some(password) = &config.winrm.password {
                    args.push(OsString::from("--winrm-password"));
                    args.push(OsString::from(password));
                }
                if let Some(transport) = &config.winrm.transport {
                    args.push(OsString::from("--winrm-transport"));
                    args.push(OsString::from(transport));
                }
            }
        }
        Self::push_common_args(&mut args, config);
        args
    }

    fn push_common_args(args: &mut Vec<OsString>, config: &BootstrapConfig) {
        args.push(OsString::from("--node-name"));
        args.push(OsString::from(&config.node_name));
        if !config.run_list.is_empty() {
            args.push(OsString::from("--run-list"));
            args.push(OsString::from(config.run_list.join(",")));
        }
        if let Some(environment) = &config.environment {
            args.push(OsString::from("--environment"));
            args.push(OsString::from(environment));
        }
        if !config.first_boot_attributes.is_null() {
            args.push(OsString::from("--json-attributes"));
            args.push(OsString::from(config.first_boot_attributes.to_string()));
        }
        if let Some(secret) = &config.secret {
            args.push(OsString::from("--secret"));
            args.push(OsString::from(secret));
        }
        if let Some(secret_file) = &config.secret_file {
            args.push(OsString::from("--secret-file"));
            args.push(OsString::from(secret_file.as_str()));
        }
    }
}

impl<R: CommandRunner + Clone + Send + Sync + 'static> Bootstrap for ProcessBootstrap<R> {
    fn run<'a>(
        &'a self,
        target: &'a BootstrapTarget,
        config: &'a BootstrapConfig,
    ) -> BootstrapFuture<'a, i32> {
        Box::pin(async move {
            let args = Self::build_args(target, config);
            debug!(program = %self.program, protocol = target.protocol.as_str(), "starting bootstrap");
            // The command blocks until the agent run finishes, which can take
            // minutes; hand it to the blocking pool so the async workers stay
            // free for concurrent provisioning runs.
            let program = self.program.clone();
            let runner = self.runner.clone();
            let output = tokio::task::spawn_blocking(move || runner.run(&program, &args))
                .await
                .map_err(|err| BootstrapError::Spawn {
                    program: self.program.clone(),
                    message: err.to_string(),
                })??;
            output.code.ok_or_else(|| BootstrapError::MissingExitCode {
                program: self.program.clone(),
            })
        })
    }
}
