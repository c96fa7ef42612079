//! OpenStack compute (Nova v2) implementation of [`CloudProvider`].

mod types;

use std::sync::LazyLock;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{ConfigError, OpenStackConfig};
use crate::provider::{
    CloudProvider, Flavor, FloatingIp, Image, Instance, ProviderError, ProviderFuture, ServerSpec,
};
use types::{
    AddFloatingIpAction, AddFloatingIpBody, BadRequestEnvelope, CreateServerEnvelope, FlavorList,
    FloatingIpList, ImageList, ServerEnvelope,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_HEADER: &str = "X-Auth-Token";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider backed by an OpenStack compute endpoint.
///
/// The provider is stateless beyond its credentials, so one value can serve
/// concurrent provisioning runs.
#[derive(Clone, Debug)]
pub struct OpenStackProvider {
    auth_token: String,
    base_url: String,
}

impl OpenStackProvider {
    /// Constructs a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(config: OpenStackConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            auth_token: config.auth_token,
            base_url: config.compute_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        debug!(path, "compute API GET");
        let response = HTTP_CLIENT
            .get(self.url(path))
            .header(AUTH_HEADER, &self.auth_token)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        debug!(path, "compute API POST");
        let response = HTTP_CLIENT
            .post(self.url(path))
            .header(AUTH_HEADER, &self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    /// Posts an action whose success response carries no body.
    async fn post_action<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        debug!(path, "compute API action");
        let response = HTTP_CLIENT
            .post(self.url(path))
            .header(AUTH_HEADER, &self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body_text = response.text().await.map_err(transport)?;
        Err(Self::api_error(status.as_u16(), &body_text))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(Self::api_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|err| ProviderError::Transport {
            message: format!("malformed response body: {err}"),
        })
    }

    /// Maps a non-success response to a provider error, unwrapping the
    /// `badRequest` fault envelope when present.
    fn api_error(code: u16, body: &str) -> ProviderError {
        if code == 400 {
            let message = serde_json::from_str::<BadRequestEnvelope>(body)
                .map_or_else(|_| body.trim().to_owned(), |fault| fault.bad_request.message);
            return ProviderError::BadRequest { message };
        }
        ProviderError::Api {
            code,
            message: body.trim().to_owned(),
        }
    }
}

impl CloudProvider for OpenStackProvider {
    fn create_server<'a>(&'a self, spec: &'a ServerSpec) -> ProviderFuture<'a, Instance> {
        Box::pin(async move {
            let envelope: ServerEnvelope = self
                .post_json("servers", &CreateServerEnvelope::from(spec))
                .await?;
            Ok(envelope.server.into_instance())
        })
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Instance> {
        Box::pin(async move {
            let envelope: ServerEnvelope = self.get_json(&format!("servers/{id}")).await?;
            Ok(envelope.server.into_instance())
        })
    }

    fn list_flavors(&self) -> ProviderFuture<'_, Vec<Flavor>> {
        Box::pin(async move {
            let list: FlavorList = self.get_json("flavors/detail").await?;
            Ok(list.flavors.into_iter().map(Flavor::from).collect())
        })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<Image>> {
        Box::pin(async move {
            let list: ImageList = self.get_json("images/detail").await?;
            Ok(list.images.into_iter().map(Image::from).collect())
        })
    }

    fn list_floating_ips(&self) -> ProviderFuture<'_, Vec<FloatingIp>> {
        Box::pin(async move {
            let list: FloatingIpList = self.get_json("os-floating-ips").await?;
            Ok(list.floating_ips.into_iter().map(FloatingIp::from).collect())
        })
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let action = AddFloatingIpAction {
                add_floating_ip: AddFloatingIpBody {
                    address: address.to_owned(),
                },
            };
            self.post_action(&format!("servers/{server_id}/action"), &action)
                .await
        })
    }
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}
