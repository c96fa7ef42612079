//! Cloud provider abstraction and the value snapshots it returns.
//!
//! The provider's object model (instances, flavors, floating addresses) is
//! exposed as plain immutable snapshots produced by explicit query calls.
//! Any refresh is an explicit, named operation on [`CloudProvider`]; nothing
//! reloads implicitly.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Lifecycle status reported by the provider for a compute instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// The instance is still being built.
    Building,
    /// The instance is active and reachable through the compute API.
    Active,
    /// The provider marked the instance as failed.
    Error,
    /// Any status string this crate does not recognise.
    Unknown,
}

impl InstanceStatus {
    /// Parses a provider status string such as `BUILD` or `ACTIVE`.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "BUILD" | "BUILDING" => Self::Building,
            "ACTIVE" => Self::Active,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Returns the lowercase label used in log and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Active => "active",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single entry within a network's ordered address list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressRecord {
    /// Literal IP address string as reported by the provider.
    pub address: String,
    /// IP version of the address (4 or 6).
    pub version: u8,
    /// Whether the address is a fixed assignment rather than a floating one.
    pub fixed: bool,
}

impl AddressRecord {
    /// Builds a fixed IPv4 record.
    #[must_use]
    pub fn fixed_v4(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: 4,
            fixed: true,
        }
    }

    /// Builds a floating IPv4 record, used when a newly associated floating
    /// address is appended to a local snapshot.
    #[must_use]
    pub fn floating_v4(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: 4,
            fixed: false,
        }
    }
}

/// Network-name to address-list mapping that preserves provider order.
///
/// No sort is ever applied: which network appears "first" is semantic and
/// must match the order the provider returned.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Addresses(Vec<(String, Vec<AddressRecord>)>);

impl Addresses {
    /// Creates an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a mapping from already-ordered pairs.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, Vec<AddressRecord>)>) -> Self {
        Self(pairs)
    }

    /// Returns the address list for `name`, if the network is present.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&[AddressRecord]> {
        self.0
            .iter()
            .find(|(network, _)| network == name)
            .map(|(_, records)| records.as_slice())
    }

    /// Returns the first network in provider order together with its list.
    #[must_use]
    pub fn first_network(&self) -> Option<(&str, &[AddressRecord])> {
        self.0
            .first()
            .map(|(network, records)| (network.as_str(), records.as_slice()))
    }

    /// Appends a record to `network`, creating the network entry when absent.
    pub fn push(&mut self, network: impl Into<String>, record: AddressRecord) {
        let name = network.into();
        if let Some((_, records)) = self.0.iter_mut().find(|(existing, _)| *existing == name) {
            records.push(record);
            return;
        }
        self.0.push((name, vec![record]));
    }

    /// Iterates networks and their address lists in provider order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AddressRecord])> {
        self.0
            .iter()
            .map(|(network, records)| (network.as_str(), records.as_slice()))
    }

    /// Returns `true` when no networks are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flavor catalog entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Flavor {
    /// Provider identifier of the flavor.
    pub id: String,
    /// Human readable flavor name (for example `m1.small`).
    pub name: String,
}

/// Image catalog entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Provider identifier of the image.
    pub id: String,
    /// Human readable image name.
    pub name: String,
}

/// Floating IP allocation as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FloatingIp {
    /// Provider identifier of the allocation.
    pub id: String,
    /// The floating address itself.
    pub ip: String,
    /// Fixed address the floating IP is bound to, when associated.
    pub fixed_ip: Option<String>,
}

impl FloatingIp {
    /// An allocation is free exactly when it has no bound fixed address.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.fixed_ip.is_none()
    }
}

/// Local snapshot of a provider-side instance.
///
/// The snapshot is refreshed only by explicit [`CloudProvider::get_server`]
/// calls and may therefore be stale; the orchestrator mutates it locally
/// only to append a newly associated floating address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider identifier of the instance.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Last observed lifecycle status.
    pub status: InstanceStatus,
    /// Identifier of the flavor the instance was built from.
    pub flavor_id: String,
    /// Identifier of the image the instance was built from.
    pub image_id: String,
    /// Network addresses in provider order.
    pub addresses: Addresses,
    /// Generated admin password, when the provider returned one.
    pub password: Option<String>,
    /// Key pair name attached to the instance, if any.
    pub key_name: Option<String>,
}

/// Declarative server creation request. Constructed once, never mutated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSpec {
    /// Instance name.
    pub name: String,
    /// Resolved image identifier.
    pub image_ref: String,
    /// Resolved flavor identifier.
    pub flavor_ref: String,
    /// Security group names to attach.
    pub security_groups: Vec<String>,
    /// Optional availability zone.
    pub availability_zone: Option<String>,
    /// Key-value metadata attached to the instance.
    pub metadata: HashMap<String, String>,
    /// Key pair name to inject.
    pub key_name: Option<String>,
    /// Opaque user-data payload passed to the instance on first boot.
    pub user_data: Option<String>,
    /// Network identifiers to attach, in order.
    pub network_ids: Vec<String>,
}

impl ServerSpec {
    /// Starts a builder for a [`ServerSpec`].
    #[must_use]
    pub fn builder() -> ServerSpecBuilder {
        ServerSpecBuilder::default()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingField`] when `name`, `image_ref`, or
    /// `flavor_ref` is empty.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::MissingField("name".to_owned()));
        }
        if self.image_ref.is_empty() {
            return Err(SpecError::MissingField("image_ref".to_owned()));
        }
        if self.flavor_ref.is_empty() {
            return Err(SpecError::MissingField("flavor_ref".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`ServerSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerSpecBuilder {
    name: String,
    image_ref: String,
    flavor_ref: String,
    security_groups: Vec<String>,
    availability_zone: Option<String>,
    metadata: HashMap<String, String>,
    key_name: Option<String>,
    user_data: Option<String>,
    network_ids: Vec<String>,
}

impl ServerSpecBuilder {
    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the resolved image identifier.
    #[must_use]
    pub fn image_ref(mut self, value: impl Into<String>) -> Self {
        self.image_ref = value.into();
        self
    }

    /// Sets the resolved flavor identifier.
    #[must_use]
    pub fn flavor_ref(mut self, value: impl Into<String>) -> Self {
        self.flavor_ref = value.into();
        self
    }

    /// Sets the security group names.
    #[must_use]
    pub fn security_groups(mut self, value: Vec<String>) -> Self {
        self.security_groups = value;
        self
    }

    /// Sets the optional availability zone.
    #[must_use]
    pub fn availability_zone(mut self, value: Option<String>) -> Self {
        self.availability_zone = value;
        self
    }

    /// Sets the metadata map.
    #[must_use]
    pub fn metadata(mut self, value: HashMap<String, String>) -> Self {
        self.metadata = value;
        self
    }

    /// Sets the optional key pair name.
    #[must_use]
    pub fn key_name(mut self, value: Option<String>) -> Self {
        self.key_name = value;
        self
    }

    /// Sets the optional user-data payload.
    #[must_use]
    pub fn user_data(mut self, value: Option<String>) -> Self {
        self.user_data = value;
        self
    }

    /// Sets the network identifiers to attach.
    #[must_use]
    pub fn network_ids(mut self, value: Vec<String>) -> Self {
        self.network_ids = value;
        self
    }

    /// Builds and validates the [`ServerSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingField`] when a required field is empty.
    pub fn build(self) -> Result<ServerSpec, SpecError> {
        let spec = ServerSpec {
            name: self.name.trim().to_owned(),
            image_ref: self.image_ref.trim().to_owned(),
            flavor_ref: self.flavor_ref.trim().to_owned(),
            security_groups: self.security_groups,
            availability_zone: self.availability_zone,
            metadata: self.metadata,
            key_name: self.key_name,
            user_data: self.user_data,
            network_ids: self.network_ids,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while building a [`ServerSpec`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

/// Errors surfaced by provider implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// 400-class rejection carrying the provider's message.
    #[error("bad request: {message}")]
    BadRequest {
        /// Message body returned by the provider.
        message: String,
    },
    /// Non-400 API failure.
    #[error("provider error ({code}): {message}")]
    Api {
        /// HTTP status code returned by the provider.
        code: u16,
        /// Message body returned by the provider.
        message: String,
    },
    /// Transport-level failure before an API response was produced.
    #[error("transport error: {message}")]
    Transport {
        /// Operating system or HTTP client error string.
        message: String,
    },
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Stable interface to the compute API consumed by the orchestrator.
///
/// Implementations must be usable from multiple concurrent provisioning
/// runs; all methods take `&self`.
pub trait CloudProvider {
    /// Submits a server creation request and returns the initial snapshot.
    fn create_server<'a>(&'a self, spec: &'a ServerSpec) -> ProviderFuture<'a, Instance>;

    /// Fetches a fresh snapshot of the instance.
    fn get_server<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Instance>;

    /// Lists the flavor catalog in provider order.
    fn list_flavors(&self) -> ProviderFuture<'_, Vec<Flavor>>;

    /// Lists the image catalog in provider order.
    fn list_images(&self) -> ProviderFuture<'_, Vec<Image>>;

    /// Lists currently allocated floating IPs in provider order.
    fn list_floating_ips(&self) -> ProviderFuture<'_, Vec<FloatingIp>>;

    /// Associates an allocated floating IP with the given instance.
    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ProviderFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_covers_known_values() {
        assert_eq!(InstanceStatus::from_provider("BUILD"), InstanceStatus::Building);
        assert_eq!(InstanceStatus::from_provider("active"), InstanceStatus::Active);
        assert_eq!(InstanceStatus::from_provider("ERROR"), InstanceStatus::Error);
        assert_eq!(InstanceStatus::from_provider("PAUSED"), InstanceStatus::Unknown);
    }

    #[test]
    fn addresses_preserve_insertion_order() {
        let mut addresses = Addresses::new();
        addresses.push("internal", AddressRecord::fixed_v4("10.0.0.4"));
        addresses.push("public", AddressRecord::fixed_v4("198.51.100.7"));

        let first = addresses.first_network().map(|(name, _)| name);
        assert_eq!(first, Some("internal"));
    }

    #[test]
    fn addresses_push_appends_to_existing_network() {
        let mut addresses = Addresses::from_pairs(vec![(
            "public".to_owned(),
            vec![AddressRecord::fixed_v4("198.51.100.7")],
        )]);
        addresses.push("public", AddressRecord::floating_v4("203.0.113.5"));

        let records = addresses.network("public").unwrap_or_default();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records.last().map(|record| record.address.as_str()),
            Some("203.0.113.5")
        );
    }

    #[test]
    fn builder_rejects_missing_flavor_ref() {
        let err = ServerSpec::builder()
            .name("node-1")
            .image_ref("img-1")
            .build()
            .expect_err("missing flavor_ref should fail");
        assert_eq!(err, SpecError::MissingField("flavor_ref".to_owned()));
    }

    #[test]
    fn builder_trims_string_fields() {
        let spec = ServerSpec::builder()
            .name("  node-1  ")
            .image_ref("img-1")
            .flavor_ref("fl-1")
            .build()
            .expect("valid spec");
        assert_eq!(spec.name, "node-1");
    }

    #[test]
    fn floating_ip_free_iff_unbound() {
        let free = FloatingIp {
            id: "1".to_owned(),
            ip: "203.0.113.5".to_owned(),
            fixed_ip: None,
        };
        let bound = FloatingIp {
            fixed_ip: Some("10.0.0.4".to_owned()),
            ..free.clone()
        };
        assert!(free.is_free());
        assert!(!bound.is_free());
    }
}
