//! End-to-end provisioning orchestration.
//!
//! The workflow validates the request, submits the create call, polls the
//! instance until it is active, optionally associates a floating IP,
//! resolves the bootstrap address, drives the readiness probe, and hands
//! the instance off to the bootstrap collaborator. One provisioning run
//! drives one instance; callers wanting parallelism run independent
//! provisioners. Both polling loops are cooperative: every iteration
//! awaits, so cancelling (dropping or aborting) the future stops them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::address::{self, NetworkSelector};
use crate::bootstrap::{Bootstrap, BootstrapConfig, BootstrapError, BootstrapTarget};
use crate::floating::{self, AllocationError, FloatingIpRequest};
use crate::probe::{Protocol, ReadinessProbe};
use crate::provider::{
    AddressRecord, CloudProvider, Instance, InstanceStatus, ProviderError, ServerSpec, SpecError,
};
use crate::validate::{self, ValidationError};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const CREATE_TIMEOUT: Duration = Duration::from_secs(600);
const SSH_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Declarative input for one provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionPlan {
    /// Flavor name or identifier.
    pub flavor: String,
    /// Image identifier or name pattern.
    pub image: String,
    /// Node name; generated when absent.
    pub node_name: Option<String>,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// Optional availability zone.
    pub availability_zone: Option<String>,
    /// Key-value metadata for the instance.
    pub metadata: HashMap<String, String>,
    /// Key pair name to inject.
    pub key_pair: Option<String>,
    /// Opaque user-data payload.
    pub user_data: Option<String>,
    /// Network identifiers to attach.
    pub network_ids: Vec<String>,
    /// Floating IP request tri-state.
    pub floating_ip: FloatingIpRequest,
    /// Network name used for bootstrap address resolution.
    pub bootstrap_network: String,
    /// When `false`, network-based selection is disabled and the first
    /// available address is used instead.
    pub network: bool,
    /// Forces the bootstrap network to `private`.
    pub private_network: bool,
    /// Bootstrap configuration template; per-instance values are derived
    /// just before the handoff.
    pub bootstrap: BootstrapConfig,
}

impl ProvisionPlan {
    /// Creates a plan with defaults matching the CLI defaults.
    #[must_use]
    pub fn new(
        flavor: impl Into<String>,
        image: impl Into<String>,
        bootstrap: BootstrapConfig,
    ) -> Self {
        Self {
            flavor: flavor.into(),
            image: image.into(),
            node_name: None,
            security_groups: vec!["default".to_owned()],
            availability_zone: None,
            metadata: HashMap::new(),
            key_pair: None,
            user_data: None,
            network_ids: Vec::new(),
            floating_ip: FloatingIpRequest::None,
            bootstrap_network: "public".to_owned(),
            network: true,
            private_network: false,
            bootstrap,
        }
    }
}

/// Terminal outcome of a successful provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningResult {
    /// Final local snapshot of the instance, including a locally appended
    /// floating address when one was associated.
    pub instance: Instance,
    /// The address, port, and protocol used for the handoff.
    pub target: BootstrapTarget,
    /// Exit status of the bootstrap collaborator, passed through unmodified.
    pub exit_code: i32,
}

/// Errors surfaced while provisioning.
///
/// Failures after instance creation leave the instance running on the
/// provider; this crate never deletes a partially provisioned instance.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Pre-flight validation failed; nothing was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The provider rejected the create request.
    #[error("bad request: {message}")]
    InvalidRequest {
        /// Message returned by the provider.
        message: String,
    },
    /// The provider rejected the flavor reference at create time.
    #[error("invalid flavor specified: {reference}")]
    FlavorNotFound {
        /// The flavor reference the provider rejected.
        reference: String,
    },
    /// Provider failure surfaced unmodified; never silently retried.
    #[error(transparent)]
    Provider(ProviderError),
    /// The instance did not become active before the create timeout.
    #[error("server did not become active before the timeout (last status: {last_status})")]
    Timeout {
        /// Status observed on the final poll.
        last_status: InstanceStatus,
    },
    /// Floating IP allocation or association failed.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// No address could be resolved for bootstrapping.
    #[error("no IP address available for bootstrapping")]
    NoBootstrapAddress,
    /// The instance never became reachable within the optional readiness
    /// timeout. Only raised when a timeout was explicitly configured.
    #[error("{address}:{port} not reachable within {seconds}s")]
    NotReachable {
        /// Address that was probed.
        address: String,
        /// Port that was probed.
        port: u16,
        /// The configured readiness timeout in seconds.
        seconds: u64,
    },
    /// The bootstrap collaborator failed to run.
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[source] BootstrapError),
}

impl From<SpecError> for ProvisionError {
    fn from(value: SpecError) -> Self {
        Self::InvalidRequest {
            message: value.to_string(),
        }
    }
}

/// Drives one instance from a declarative plan to a bootstrapped host.
#[derive(Debug)]
pub struct Provisioner<P, B> {
    provider: P,
    bootstrap: B,
    probe: ReadinessProbe,
    poll_interval: Duration,
    create_timeout: Duration,
    ready_timeout: Option<Duration>,
    ssh_settle_delay: Duration,
}

impl<P, B> Provisioner<P, B>
where
    P: CloudProvider,
    B: Bootstrap,
{
    /// Creates a provisioner with production timings.
    #[must_use]
    pub const fn new(provider: P, bootstrap: B) -> Self {
        Self {
            provider,
            bootstrap,
            probe: ReadinessProbe::new(),
            poll_interval: POLL_INTERVAL,
            create_timeout: CREATE_TIMEOUT,
            ready_timeout: None,
            ssh_settle_delay: SSH_SETTLE_DELAY,
        }
    }

    /// Overrides the status polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    /// Overrides the create-to-active timeout (default 600 seconds).
    #[must_use]
    pub const fn with_create_timeout(mut self, value: Duration) -> Self {
        self.create_timeout = value;
        self
    }

    /// Bounds the readiness loop, which is otherwise unbounded.
    ///
    /// The unbounded loop is the reference behaviour: once the instance is
    /// active the network layer is assumed to eventually come up, and the
    /// caller cancels the future to bail out. Setting a timeout here is a
    /// deviation for callers that prefer a hard stop.
    #[must_use]
    pub const fn with_ready_timeout(mut self, value: Duration) -> Self {
        self.ready_timeout = Some(value);
        self
    }

    /// Overrides the readiness probe.
    #[must_use]
    pub fn with_probe(mut self, value: ReadinessProbe) -> Self {
        self.probe = value;
        self
    }

    /// Overrides the settle delay applied after the first successful SSH
    /// probe.
    #[must_use]
    pub const fn with_ssh_settle_delay(mut self, value: Duration) -> Self {
        self.ssh_settle_delay = value;
        self
    }

    /// Read access to the provider collaborator.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Read access to the bootstrap collaborator.
    #[must_use]
    pub const fn bootstrap(&self) -> &B {
        &self.bootstrap
    }

    /// Runs the full workflow and returns the terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when validation, creation, polling,
    /// floating allocation, address resolution, or the bootstrap handoff
    /// fail. Failures after creation leave the instance running.
    pub async fn provision(
        &self,
        plan: &ProvisionPlan,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let catalog =
            validate::validate(&plan.flavor, &plan.image, &plan.floating_ip, &self.provider)
                .await?;

        let node_name = plan
            .node_name
            .clone()
            .unwrap_or_else(generate_node_name);
        let spec = ServerSpec::builder()
            .name(&node_name)
            .image_ref(&catalog.image.id)
            .flavor_ref(&catalog.flavor.id)
            .security_groups(plan.security_groups.clone())
            .availability_zone(plan.availability_zone.clone())
            .metadata(plan.metadata.clone())
            .key_name(plan.key_pair.clone())
            .user_data(plan.user_data.clone())
            .network_ids(plan.network_ids.clone())
            .build()?;
        debug!(name = %spec.name, flavor = %spec.flavor_ref, image = %spec.image_ref, "submitting create request");

        let created = self.create_server(&spec).await?;
        info!(id = %created.id, name = %created.name, "server created");

        let mut instance = self.wait_until_active(&created.id).await?;

        if plan.floating_ip.is_requested() {
            let allocated =
                floating::allocate(&plan.floating_ip, &instance.id, &self.provider).await?;
            info!(address = %allocated.ip, "floating IP bound");
            // Reloading the instance is expensive, so the association is
            // mirrored into the local snapshot instead of re-querying.
            instance
                .addresses
                .push("public", AddressRecord::floating_v4(allocated.ip));
        }

        let address = self.bootstrap_address(plan, &instance)?.to_owned();
        let target = BootstrapTarget {
            address,
            port: plan.bootstrap.target_port(),
            protocol: plan.bootstrap.protocol,
        };
        debug!(address = %target.address, port = target.port, protocol = target.protocol.as_str(), "bootstrap target resolved");

        self.wait_until_reachable(&target).await?;

        let config = plan.bootstrap.for_instance(&node_name, &instance);
        let exit_code = self
            .bootstrap
            .run(&target, &config)
            .await
            .map_err(ProvisionError::Bootstrap)?;
        info!(exit_code, "bootstrap finished");

        Ok(ProvisioningResult {
            instance,
            target,
            exit_code,
        })
    }

    /// Submits the create request, classifying provider-side rejections.
    async fn create_server(&self, spec: &ServerSpec) -> Result<Instance, ProvisionError> {
        match self.provider.create_server(spec).await {
            Ok(instance) => Ok(instance),
            Err(ProviderError::BadRequest { message }) => {
                if message.contains("Invalid flavorRef") {
                    Err(ProvisionError::FlavorNotFound {
                        reference: spec.flavor_ref.clone(),
                    })
                } else {
                    Err(ProvisionError::InvalidRequest { message })
                }
            }
            Err(other) => Err(ProvisionError::Provider(other)),
        }
    }

    /// Polls the instance status until it becomes active or the create
    /// timeout elapses.
    async fn wait_until_active(&self, id: &str) -> Result<Instance, ProvisionError> {
        let deadline = Instant::now() + self.create_timeout;
        loop {
            let instance = self
                .provider
                .get_server(id)
                .await
                .map_err(ProvisionError::Provider)?;
            if instance.status == InstanceStatus::Active {
                return Ok(instance);
            }
            debug!(id, status = %instance.status, "waiting for server");
            if Instant::now() >= deadline {
                return Err(ProvisionError::Timeout {
                    last_status: instance.status,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Resolves the single address used for the bootstrap handoff.
    fn bootstrap_address<'a>(
        &self,
        plan: &ProvisionPlan,
        instance: &'a Instance,
    ) -> Result<&'a str, ProvisionError> {
        let network = if plan.private_network {
            "private"
        } else {
            plan.bootstrap_network.as_str()
        };

        let resolved = if plan.network {
            address::resolve(&instance.addresses, &NetworkSelector::from_network_name(network))
        } else {
            address::first_available(&instance.addresses)
        };
        resolved.ok_or(ProvisionError::NoBootstrapAddress)
    }

    /// Drives the readiness probe until the target accepts connections.
    ///
    /// There is no built-in upper bound unless a ready timeout was
    /// configured; the loop awaits every iteration, so cancellation is the
    /// caller's escape hatch.
    async fn wait_until_reachable(&self, target: &BootstrapTarget) -> Result<(), ProvisionError> {
        let started = Instant::now();
        loop {
            if self
                .probe
                .probe(&target.address, target.port, target.protocol)
                .await
            {
                break;
            }
            if let Some(limit) = self.ready_timeout {
                if started.elapsed() >= limit {
                    return Err(ProvisionError::NotReachable {
                        address: target.address.clone(),
                        port: target.port,
                        seconds: limit.as_secs(),
                    });
                }
            }
        }

        if target.protocol == Protocol::Ssh {
            // Give sshd a moment to finish host key generation after the
            // first successful connect.
            sleep(self.ssh_settle_delay).await;
        }
        Ok(())
    }
}

/// Generates an instance name when none was configured.
fn generate_node_name() -> String {
    format!("os-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Addresses;
    use crate::test_support::{FakeProvider, ScriptedBootstrap, catalog_provider};

    fn plan() -> ProvisionPlan {
        ProvisionPlan::new("m1.small", "ubuntu.*", BootstrapConfig::new(Protocol::Ssh))
    }

    fn fast_provisioner(
        provider: FakeProvider,
        bootstrap: ScriptedBootstrap,
    ) -> Provisioner<FakeProvider, ScriptedBootstrap> {
        Provisioner::new(provider, bootstrap)
            .with_poll_interval(Duration::from_millis(1))
            .with_create_timeout(Duration::from_millis(50))
            .with_ssh_settle_delay(Duration::from_millis(0))
    }

    #[test]
    fn generated_node_names_carry_the_os_prefix() {
        let name = generate_node_name();
        assert!(name.starts_with("os-"));
        assert!(name.len() > 3);
    }

    #[tokio::test]
    async fn poll_reaches_active_within_timeout() {
        let provider = catalog_provider().with_status_sequence(vec![
            InstanceStatus::Building,
            InstanceStatus::Building,
            InstanceStatus::Active,
        ]);
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());

        let instance = provisioner.wait_until_active("srv-1").await.expect("active");
        assert_eq!(instance.status, InstanceStatus::Active);
    }

    #[tokio::test]
    async fn poll_times_out_with_last_observed_status() {
        let provider =
            catalog_provider().with_status_sequence(vec![InstanceStatus::Building]);
        let provisioner = Provisioner::new(provider, ScriptedBootstrap::succeeding())
            .with_poll_interval(Duration::from_millis(2))
            .with_create_timeout(Duration::from_millis(5));

        let err = provisioner
            .wait_until_active("srv-1")
            .await
            .expect_err("timeout");
        assert!(matches!(
            err,
            ProvisionError::Timeout {
                last_status: InstanceStatus::Building
            }
        ));
    }

    #[tokio::test]
    async fn invalid_flavor_ref_maps_to_flavor_not_found() {
        let provider = catalog_provider().with_create_error(ProviderError::BadRequest {
            message: "Invalid flavorRef provided".to_owned(),
        });
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());

        let err = provisioner.provision(&plan()).await.expect_err("rejected");
        assert!(matches!(err, ProvisionError::FlavorNotFound { .. }));
    }

    #[tokio::test]
    async fn other_bad_requests_surface_the_provider_message() {
        let provider = catalog_provider().with_create_error(ProviderError::BadRequest {
            message: "quota exceeded".to_owned(),
        });
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());

        let err = provisioner.provision(&plan()).await.expect_err("rejected");
        assert!(matches!(err, ProvisionError::InvalidRequest { message } if message == "quota exceeded"));
    }

    #[tokio::test]
    async fn non_400_errors_pass_through_unmodified() {
        let provider = catalog_provider().with_create_error(ProviderError::Api {
            code: 503,
            message: "maintenance".to_owned(),
        });
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());

        let err = provisioner.provision(&plan()).await.expect_err("rejected");
        assert!(matches!(err, ProvisionError::Provider(ProviderError::Api { code: 503, .. })));
    }

    #[tokio::test]
    async fn missing_bootstrap_address_fails_the_run() {
        // Instance only has a private network while bootstrap wants public.
        let provider = catalog_provider()
            .with_status_sequence(vec![InstanceStatus::Active])
            .with_addresses(Addresses::from_pairs(vec![(
                "private".to_owned(),
                vec![AddressRecord::fixed_v4("10.0.0.4")],
            )]));
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());

        let err = provisioner.provision(&plan()).await.expect_err("no address");
        assert!(matches!(err, ProvisionError::NoBootstrapAddress));
    }

    #[test]
    fn private_network_flag_forces_the_private_network() {
        let provider = catalog_provider();
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());
        let mut selected = plan();
        selected.private_network = true;

        let instance = Instance {
            id: "srv-1".to_owned(),
            name: "os-node".to_owned(),
            status: InstanceStatus::Active,
            flavor_id: "1".to_owned(),
            image_id: "img-9".to_owned(),
            addresses: Addresses::from_pairs(vec![
                (
                    "public".to_owned(),
                    vec![AddressRecord::fixed_v4("198.51.100.7")],
                ),
                (
                    "private".to_owned(),
                    vec![AddressRecord::fixed_v4("10.0.0.4")],
                ),
            ]),
            password: None,
            key_name: None,
        };

        let address = provisioner
            .bootstrap_address(&selected, &instance)
            .expect("private address");
        assert_eq!(address, "10.0.0.4");
    }

    #[test]
    fn disabled_network_selection_takes_first_available() {
        let provider = catalog_provider();
        let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());
        let mut selected = plan();
        selected.network = false;
        selected.bootstrap_network = "does-not-exist".to_owned();

        let instance = Instance {
            id: "srv-1".to_owned(),
            name: "os-node".to_owned(),
            status: InstanceStatus::Active,
            flavor_id: "1".to_owned(),
            image_id: "img-9".to_owned(),
            addresses: Addresses::from_pairs(vec![(
                "tenant-net".to_owned(),
                vec![AddressRecord::fixed_v4("192.0.2.9")],
            )]),
            password: None,
            key_name: None,
        };

        let address = provisioner
            .bootstrap_address(&selected, &instance)
            .expect("fallback address");
        assert_eq!(address, "192.0.2.9");
    }
}
