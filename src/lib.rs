//! Core library for the cumulus provisioning tool.
//!
//! The crate exposes a cloud provider abstraction, an OpenStack
//! implementation, and an orchestrator that drives one instance through the
//! full workflow: validate → create → wait for active → optional floating
//! IP → readiness probe → bootstrap handoff.

pub mod address;
pub mod bootstrap;
pub mod config;
pub mod floating;
pub mod openstack;
pub mod probe;
pub mod provider;
pub mod provision;
pub mod test_support;
pub mod validate;

pub use address::NetworkSelector;
pub use bootstrap::{
    Bootstrap, BootstrapConfig, BootstrapError, BootstrapTarget, ProcessBootstrap,
    ProcessCommandRunner,
};
pub use config::{ConfigError, CreateConfig, OpenStackConfig};
pub use floating::{AllocationError, FloatingIpRequest};
pub use openstack::OpenStackProvider;
pub use probe::{Protocol, ReadinessProbe};
pub use provider::{
    CloudProvider, Flavor, FloatingIp, Image, Instance, InstanceStatus, ProviderError, ServerSpec,
};
pub use provision::{ProvisionError, ProvisionPlan, Provisioner, ProvisioningResult};
pub use validate::{ResolvedCatalog, ValidationError};
