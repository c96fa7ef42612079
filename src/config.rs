//! Configuration loading via `ortho-config`.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap::{BootstrapConfig, SshSettings, WinrmSettings};
use crate::floating::FloatingIpRequest;
use crate::probe::Protocol;
use crate::provision::ProvisionPlan;

/// OpenStack credentials and endpoints derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "OS")]
pub struct OpenStackConfig {
    /// Pre-issued authentication token sent as `X-Auth-Token`.
    pub auth_token: String,
    /// Base URL of the compute (Nova v2) endpoint, including the tenant
    /// path segment.
    pub compute_url: String,
    /// Region name, captured for diagnostics; endpoint selection is done
    /// by the operator via `compute_url`.
    pub region: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in cumulus.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl OpenStackConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.auth_token,
            &FieldMetadata::new(
                "OpenStack auth token",
                "OS_AUTH_TOKEN",
                "auth_token",
                "openstack",
            ),
        )?;
        require_field(
            &self.compute_url,
            &FieldMetadata::new(
                "OpenStack compute endpoint",
                "OS_COMPUTE_URL",
                "compute_url",
                "openstack",
            ),
        )?;
        Ok(())
    }
}

/// Server-create settings derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CUMULUS")]
pub struct CreateConfig {
    /// Flavor name or identifier for the new instance.
    pub flavor: String,
    /// Image identifier or name pattern for the new instance.
    pub image: String,
    /// Node name; a random `os-` prefixed name is generated when absent.
    pub node_name: Option<String>,
    /// Security group names to attach.
    #[ortho_config(default = vec!["default".to_owned()])]
    pub security_groups: Vec<String>,
    /// Instance metadata as `key=value` pairs.
    #[ortho_config(default = Vec::new())]
    pub metadata: Vec<String>,
    /// Availability zone hint for the scheduler.
    pub availability_zone: Option<String>,
    /// Key pair name to inject into the instance.
    pub key_pair: Option<String>,
    /// Path to a user-data file handed to the instance on first boot.
    pub user_data: Option<Utf8PathBuf>,
    /// Network identifiers to attach the instance to.
    #[ortho_config(default = Vec::new())]
    pub network_ids: Vec<String>,
    /// Floating IP request: `-1` for none, empty for automatic selection,
    /// or a specific allocated address.
    #[ortho_config(default = "-1".to_owned())]
    pub floating_ip: String,
    /// Network whose address is used for bootstrapping.
    #[ortho_config(default = "public".to_owned())]
    pub bootstrap_network: String,
    /// When disabled, the first available address is used instead of
    /// network-based selection.
    #[ortho_config(default = true)]
    pub network: bool,
    /// Forces bootstrapping over the private network.
    #[ortho_config(default = false)]
    pub private_network: bool,
    /// Bootstrap channel: `ssh` or `winrm`.
    #[ortho_config(default = "ssh".to_owned())]
    pub bootstrap_protocol: String,
    /// Seconds to wait for the instance to become active.
    #[ortho_config(default = 600)]
    pub server_create_timeout: u64,
    /// Roles and recipes applied on the first run.
    #[ortho_config(default = Vec::new())]
    pub run_list: Vec<String>,
    /// Environment for the new node.
    pub environment: Option<String>,
    /// JSON document of attributes added to the first run; empty for none.
    #[ortho_config(default = String::new())]
    pub first_boot_attributes: String,
    /// Secret key used to encrypt data bag item values.
    pub secret: Option<String>,
    /// File containing the secret key.
    pub secret_file: Option<Utf8PathBuf>,
    /// SSH user for the bootstrap connection.
    #[ortho_config(default = SshSettings::DEFAULT_USER.to_owned())]
    pub ssh_user: String,
    /// SSH password; the provider-generated password is adopted when this
    /// is unset and no key pair is attached.
    pub ssh_password: Option<String>,
    /// SSH port for the bootstrap connection.
    #[ortho_config(default = SshSettings::DEFAULT_PORT)]
    pub ssh_port: u16,
    /// SSH identity file for key-based authentication.
    pub identity_file: Option<Utf8PathBuf>,
    /// Whether to verify the remote host key during bootstrap.
    #[ortho_config(default = true)]
    pub host_key_verify: bool,
    /// WinRM user for the bootstrap connection.
    #[ortho_config(default = WinrmSettings::DEFAULT_USER.to_owned())]
    pub winrm_user: String,
    /// WinRM password.
    pub winrm_password: Option<String>,
    /// WinRM port for the bootstrap connection.
    #[ortho_config(default = WinrmSettings::DEFAULT_PORT)]
    pub winrm_port: u16,
    /// WinRM transport (for example `plaintext` or `ssl`).
    pub winrm_transport: Option<String>,
    /// Kerberos keytab file for WinRM authentication.
    pub kerberos_keytab_file: Option<Utf8PathBuf>,
    /// Program invoked for the bootstrap handoff.
    #[ortho_config(default = "knife".to_owned())]
    pub bootstrap_command: String,
}

impl CreateConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.flavor,
            &FieldMetadata::new("instance flavor", "CUMULUS_FLAVOR", "flavor", "cumulus"),
        )?;
        require_field(
            &self.image,
            &FieldMetadata::new("instance image", "CUMULUS_IMAGE", "image", "cumulus"),
        )?;
        Ok(())
    }

    /// Seconds the provisioner waits for the instance to become active.
    #[must_use]
    pub const fn create_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server_create_timeout)
    }

    /// Builds a [`ProvisionPlan`] from the configured values.
    ///
    /// `user_data` carries the payload read from [`Self::user_data`]; the
    /// caller resolves the file so this conversion stays free of IO.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or a value cannot be
    /// decoded (unknown protocol, malformed metadata pair, or invalid
    /// first-boot JSON).
    pub fn to_plan(&self, user_data: Option<String>) -> Result<ProvisionPlan, ConfigError> {
        self.validate()?;

        let mut plan = ProvisionPlan::new(&self.flavor, &self.image, self.bootstrap_config()?);
        plan.node_name = self.node_name.clone();
        plan.security_groups = self.security_groups.clone();
        plan.metadata = parse_metadata(&self.metadata)?;
        plan.availability_zone = self.availability_zone.clone();
        plan.key_pair = self.key_pair.clone();
        plan.user_data = user_data;
        plan.network_ids = self.network_ids.clone();
        plan.floating_ip = FloatingIpRequest::from_config(&self.floating_ip);
        plan.bootstrap_network = self.bootstrap_network.clone();
        plan.network = self.network;
        plan.private_network = self.private_network;
        Ok(plan)
    }

    fn bootstrap_config(&self) -> Result<BootstrapConfig, ConfigError> {
        let protocol = match self.bootstrap_protocol.as_str() {
            "ssh" => Protocol::Ssh,
            "winrm" => Protocol::Winrm,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "unknown bootstrap protocol '{other}': expected ssh or winrm"
                )));
            }
        };

        let mut config = BootstrapConfig::new(protocol);
        config.run_list = self.run_list.clone();
        config.environment = self.environment.clone();
        config.first_boot_attributes = parse_first_boot(&self.first_boot_attributes)?;
        config.secret = self.secret.clone();
        config.secret_file = self.secret_file.clone();
        config.ssh.user = self.ssh_user.clone();
        config.ssh.password = self.ssh_password.clone();
        config.ssh.port = self.ssh_port;
        config.ssh.identity_file = self.identity_file.clone();
        config.ssh.host_key_verify = self.host_key_verify;
        config.winrm.user = self.winrm_user.clone();
        config.winrm.password = self.winrm_password.clone();
        config.winrm.port = self.winrm_port;
        config.winrm.transport = self.winrm_transport.clone();
        config.winrm.kerberos_keytab_file = self.kerberos_keytab_file.clone();
        config.merge_winrm_overrides();
        Ok(config)
    }
}

fn parse_metadata(pairs: &[String]) -> Result<HashMap<String, String>, ConfigError> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| {
                    ConfigError::InvalidValue(format!(
                        "malformed metadata entry '{pair}': expected key=value"
                    ))
                })
        })
        .collect()
}

fn parse_first_boot(raw: &str) -> Result<serde_json::Value, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(raw).map_err(|err| {
        ConfigError::InvalidValue(format!("invalid first-boot attributes JSON: {err}"))
    })
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value that cannot be decoded.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
