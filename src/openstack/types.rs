//! Wire payloads for the Nova v2 compute API.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::provider::{
    AddressRecord, Addresses, Flavor, FloatingIp, Image, Instance, InstanceStatus, ServerSpec,
};

/// Identifier that some deployments report as a number and others as text.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    pub(super) fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WireRef {
    pub(super) id: WireId,
}

#[derive(Debug, Deserialize)]
pub(super) struct FlavorList {
    pub(super) flavors: Vec<WireFlavor>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireFlavor {
    pub(super) id: WireId,
    pub(super) name: String,
}

impl From<WireFlavor> for Flavor {
    fn from(value: WireFlavor) -> Self {
        Self {
            id: value.id.into_string(),
            name: value.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ImageList {
    pub(super) images: Vec<WireImage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireImage {
    pub(super) id: WireId,
    pub(super) name: String,
}

impl From<WireImage> for Image {
    fn from(value: WireImage) -> Self {
        Self {
            id: value.id.into_string(),
            name: value.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: WireServer,
}

/// Server document as returned by `GET /servers/{id}` and `POST /servers`.
///
/// The `addresses` values stay as raw JSON here; they are decoded per
/// network so one malformed entry does not poison the whole snapshot.
#[derive(Debug, Deserialize)]
pub(super) struct WireServer {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) status: String,
    #[serde(default)]
    pub(super) flavor: Option<WireRef>,
    #[serde(default)]
    pub(super) image: Option<WireRef>,
    #[serde(default)]
    pub(super) addresses: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "adminPass")]
    pub(super) admin_pass: Option<String>,
    #[serde(default)]
    pub(super) key_name: Option<String>,
}

const fn default_version() -> u8 {
    4
}

#[derive(Debug, Deserialize)]
pub(super) struct WireAddress {
    pub(super) addr: String,
    #[serde(default = "default_version")]
    pub(super) version: u8,
    #[serde(default, rename = "OS-EXT-IPS:type")]
    pub(super) kind: Option<String>,
}

impl From<WireAddress> for AddressRecord {
    fn from(value: WireAddress) -> Self {
        Self {
            fixed: value.kind.as_deref() != Some("floating"),
            address: value.addr,
            version: value.version,
        }
    }
}

impl WireServer {
    /// Converts the wire document into the local snapshot, preserving the
    /// network order the provider used.
    pub(super) fn into_instance(self) -> Instance {
        let mut addresses = Addresses::new();
        for (network, value) in self.addresses {
            let records: Vec<WireAddress> = serde_json::from_value(value).unwrap_or_default();
            for record in records {
                addresses.push(network.clone(), record.into());
            }
        }

        Instance {
            id: self.id,
            name: self.name,
            status: InstanceStatus::from_provider(&self.status),
            flavor_id: self
                .flavor
                .map(|reference| reference.id.into_string())
                .unwrap_or_default(),
            image_id: self
                .image
                .map(|reference| reference.id.into_string())
                .unwrap_or_default(),
            addresses,
            password: self.admin_pass,
            key_name: self.key_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CreateServerEnvelope {
    pub(super) server: CreateServerBody,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateServerBody {
    name: String,
    #[serde(rename = "imageRef")]
    image_ref: String,
    #[serde(rename = "flavorRef")]
    flavor_ref: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    security_groups: Vec<SecurityGroupRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_zone: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<NetworkRef>,
}

#[derive(Debug, Serialize)]
pub(super) struct SecurityGroupRef {
    name: String,
}

#[derive(Debug, Serialize)]
pub(super) struct NetworkRef {
    uuid: String,
}

impl From<&ServerSpec> for CreateServerEnvelope {
    fn from(spec: &ServerSpec) -> Self {
        Self {
            server: CreateServerBody {
                name: spec.name.clone(),
                image_ref: spec.image_ref.clone(),
                flavor_ref: spec.flavor_ref.clone(),
                security_groups: spec
                    .security_groups
                    .iter()
                    .map(|name| SecurityGroupRef { name: name.clone() })
                    .collect(),
                availability_zone: spec.availability_zone.clone(),
                metadata: spec.metadata.clone(),
                key_name: spec.key_name.clone(),
                // Nova requires user data to arrive base64 encoded.
                user_data: spec.user_data.as_ref().map(|data| BASE64.encode(data)),
                networks: spec
                    .network_ids
                    .iter()
                    .map(|uuid| NetworkRef { uuid: uuid.clone() })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct FloatingIpList {
    pub(super) floating_ips: Vec<WireFloatingIp>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireFloatingIp {
    pub(super) id: WireId,
    pub(super) ip: String,
    #[serde(default)]
    pub(super) fixed_ip: Option<String>,
}

impl From<WireFloatingIp> for FloatingIp {
    fn from(value: WireFloatingIp) -> Self {
        Self {
            id: value.id.into_string(),
            ip: value.ip,
            fixed_ip: value.fixed_ip,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AddFloatingIpAction {
    #[serde(rename = "addFloatingIp")]
    pub(super) add_floating_ip: AddFloatingIpBody,
}

#[derive(Debug, Serialize)]
pub(super) struct AddFloatingIpBody {
    pub(super) address: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct BadRequestEnvelope {
    #[serde(rename = "badRequest")]
    pub(super) bad_request: ApiFault,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiFault {
    pub(super) message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_document_decodes_addresses_in_provider_order() {
        let raw = r#"{
            "server": {
                "id": "srv-1",
                "name": "os-node",
                "status": "ACTIVE",
                "flavor": {"id": 42},
                "image": {"id": "img-9"},
                "key_name": "deploy-key",
                "addresses": {
                    "internal": [{"version": 4, "addr": "10.0.0.4"}],
                    "public": [
                        {"version": 4, "addr": "198.51.100.7"},
                        {"version": 4, "addr": "203.0.113.5", "OS-EXT-IPS:type": "floating"}
                    ]
                }
            }
        }"#;

        let envelope: ServerEnvelope = serde_json::from_str(raw).expect("valid document");
        let instance = envelope.server.into_instance();
        assert_eq!(instance.status, InstanceStatus::Active);
        assert_eq!(instance.flavor_id, "42");
        assert_eq!(instance.key_name.as_deref(), Some("deploy-key"));

        let first = instance.addresses.first_network().map(|(name, _)| name);
        assert_eq!(first, Some("internal"));
        let public = instance.addresses.network("public").expect("public net");
        assert!(public.first().is_some_and(|record| record.fixed));
        assert!(public.last().is_some_and(|record| !record.fixed));
    }

    #[test]
    fn create_body_base64_encodes_user_data_and_skips_empty_fields() {
        let spec = ServerSpec::builder()
            .name("os-node")
            .image_ref("img-9")
            .flavor_ref("42")
            .user_data(Some("#cloud-config\n".to_owned()))
            .build()
            .expect("valid spec");

        let rendered =
            serde_json::to_value(CreateServerEnvelope::from(&spec)).expect("serializable");
        assert_eq!(rendered["server"]["imageRef"], "img-9");
        assert_eq!(rendered["server"]["user_data"], "I2Nsb3VkLWNvbmZpZwo=");
        assert!(rendered["server"].get("networks").is_none());
        assert!(rendered["server"].get("availability_zone").is_none());
    }

    #[test]
    fn bad_request_envelope_exposes_the_message() {
        let raw = r#"{"badRequest": {"code": 400, "message": "Invalid flavorRef provided."}}"#;
        let envelope: BadRequestEnvelope = serde_json::from_str(raw).expect("valid fault");
        assert_eq!(envelope.bad_request.message, "Invalid flavorRef provided.");
    }
}
