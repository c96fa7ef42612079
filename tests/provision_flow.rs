//! End-to-end provisioning flow against scripted collaborators.
//!
//! The provider and bootstrap are in-memory doubles; the readiness probe
//! runs against a real local TCP listener so the wait loop is exercised
//! for real.

use std::time::Duration;

use cumulus::FloatingIpRequest;
use cumulus::bootstrap::BootstrapConfig;
use cumulus::probe::Protocol;
use cumulus::provider::{AddressRecord, Addresses, FloatingIp, InstanceStatus};
use cumulus::provision::{ProvisionError, ProvisionPlan, Provisioner};
use cumulus::test_support::{FakeProvider, ScriptedBootstrap, catalog_provider};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept loop standing in for the instance's remote-execution endpoint.
async fn spawn_endpoint(write_banner: bool) -> (JoinHandle<()>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            if write_banner {
                stream.writable().await.ok();
                stream.try_write(b"SSH-2.0-OpenSSH_9.6\r\n").ok();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        }
    });
    (handle, port)
}

fn reachable_provider() -> FakeProvider {
    catalog_provider()
        .with_status_sequence(vec![InstanceStatus::Building, InstanceStatus::Active])
        .with_addresses(Addresses::from_pairs(vec![(
            "public".to_owned(),
            vec![AddressRecord::fixed_v4("127.0.0.1")],
        )]))
}

fn fast_provisioner(
    provider: FakeProvider,
    bootstrap: ScriptedBootstrap,
) -> Provisioner<FakeProvider, ScriptedBootstrap> {
    Provisioner::new(provider, bootstrap)
        .with_poll_interval(Duration::from_millis(1))
        .with_create_timeout(Duration::from_secs(1))
        .with_ssh_settle_delay(Duration::ZERO)
}

#[tokio::test]
async fn full_run_creates_waits_associates_and_bootstraps() {
    let (endpoint, port) = spawn_endpoint(true).await;
    let provider = reachable_provider().with_floating_ips(vec![
        FloatingIp {
            id: "fip-0".to_owned(),
            ip: "203.0.113.1".to_owned(),
            fixed_ip: Some("10.0.0.2".to_owned()),
        },
        FloatingIp {
            id: "fip-1".to_owned(),
            ip: "203.0.113.5".to_owned(),
            fixed_ip: None,
        },
    ]);

    let mut bootstrap_config = BootstrapConfig::new(Protocol::Ssh);
    bootstrap_config.ssh.port = port;
    let mut plan = ProvisionPlan::new("m1.small", "ubuntu.*", bootstrap_config);
    plan.floating_ip = FloatingIpRequest::Auto;

    let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());
    let result = provisioner.provision(&plan).await.expect("full run");

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.target.address, "127.0.0.1");
    assert_eq!(result.target.port, port);

    // The create request carried the resolved catalog identifiers and a
    // generated node name.
    let spec = provisioner_spec(&provisioner);
    assert_eq!(spec.flavor_ref, "1");
    assert_eq!(spec.image_ref, "img-9");
    assert!(spec.name.starts_with("os-"));

    // The free address was associated and mirrored into the local snapshot
    // without a reload.
    assert_eq!(
        provisioner_associations(&provisioner),
        vec![("srv-1".to_owned(), "203.0.113.5".to_owned())]
    );
    let public = result.instance.addresses.network("public").expect("public");
    assert_eq!(
        public.last().map(|record| record.address.as_str()),
        Some("203.0.113.5")
    );
    assert!(public.last().is_some_and(|record| !record.fixed));

    endpoint.abort();
}

#[tokio::test]
async fn bootstrap_exit_status_passes_through() {
    let (endpoint, port) = spawn_endpoint(true).await;
    let mut bootstrap_config = BootstrapConfig::new(Protocol::Ssh);
    bootstrap_config.ssh.port = port;
    let plan = ProvisionPlan::new("m1.small", "ubuntu.*", bootstrap_config);

    let provisioner =
        fast_provisioner(reachable_provider(), ScriptedBootstrap::with_exit_code(7));
    let result = provisioner.provision(&plan).await.expect("run completes");
    assert_eq!(result.exit_code, 7);

    endpoint.abort();
}

#[tokio::test]
async fn generated_password_reaches_the_bootstrap_config() {
    let (endpoint, port) = spawn_endpoint(true).await;
    let provider = reachable_provider().with_admin_password("generated-secret");

    let mut bootstrap_config = BootstrapConfig::new(Protocol::Ssh);
    bootstrap_config.ssh.port = port;
    let plan = ProvisionPlan::new("m1.small", "ubuntu.*", bootstrap_config);

    let provisioner = fast_provisioner(provider, ScriptedBootstrap::succeeding());
    let result = provisioner.provision(&plan).await.expect("run completes");

    let invocations = provisioner_invocations(&provisioner);
    let (target, config) = invocations.first().expect("one bootstrap call");
    assert_eq!(target.address, "127.0.0.1");
    assert_eq!(config.ssh.password.as_deref(), Some("generated-secret"));
    assert_eq!(config.node_name, result.instance.name);

    endpoint.abort();
}

#[tokio::test]
async fn winrm_flow_probes_with_a_plain_connect() {
    let (endpoint, port) = spawn_endpoint(false).await;
    let mut bootstrap_config = BootstrapConfig::new(Protocol::Winrm);
    bootstrap_config.winrm.port = port;
    let plan = ProvisionPlan::new("m1.small", "ubuntu.*", bootstrap_config);

    let provisioner = fast_provisioner(reachable_provider(), ScriptedBootstrap::succeeding());
    let result = provisioner.provision(&plan).await.expect("run completes");
    assert_eq!(result.target.protocol, Protocol::Winrm);
    assert_eq!(result.target.port, port);

    endpoint.abort();
}

#[tokio::test]
async fn stalled_build_times_out_with_the_last_status() {
    let provider = catalog_provider().with_status_sequence(vec![InstanceStatus::Building]);
    let plan = ProvisionPlan::new("m1.small", "ubuntu.*", BootstrapConfig::new(Protocol::Ssh));

    let provisioner = Provisioner::new(provider, ScriptedBootstrap::succeeding())
        .with_poll_interval(Duration::from_millis(2))
        .with_create_timeout(Duration::from_millis(10));

    let err = provisioner.provision(&plan).await.expect_err("stalls");
    assert!(matches!(
        err,
        ProvisionError::Timeout {
            last_status: InstanceStatus::Building
        }
    ));
}

// Accessor helpers: the provisioner owns its collaborators, so inspection
// goes through the fakes it was built from.
fn provisioner_spec(provisioner: &Provisioner<FakeProvider, ScriptedBootstrap>) -> cumulus::ServerSpec {
    provisioner.provider().created_spec().expect("create was called")
}

fn provisioner_associations(
    provisioner: &Provisioner<FakeProvider, ScriptedBootstrap>,
) -> Vec<(String, String)> {
    provisioner.provider().associations()
}

fn provisioner_invocations(
    provisioner: &Provisioner<FakeProvider, ScriptedBootstrap>,
) -> Vec<(cumulus::BootstrapTarget, BootstrapConfig)> {
    provisioner.bootstrap().invocations()
}
