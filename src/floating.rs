//! Floating IP selection and association.
//!
//! Floating allocations are queried fresh on every call; nothing is cached
//! across polls. Association failures are terminal for the run and are
//! never retried.

use thiserror::Error;
use tracing::debug;

use crate::provider::{CloudProvider, FloatingIp, ProviderError};

/// Floating IP request decoded from configuration.
///
/// The configuration sentinel `-1` means no floating IP was requested; a
/// bare flag (empty value) requests automatic selection from the project's
/// allocated pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FloatingIpRequest {
    /// No floating IP requested.
    None,
    /// Pick the first free allocated address.
    Auto,
    /// Associate this specific allocated address.
    Specific(String),
}

impl FloatingIpRequest {
    /// Decodes the configuration value (`-1` sentinel, empty, or address).
    #[must_use]
    pub fn from_config(value: &str) -> Self {
        match value.trim() {
            "-1" => Self::None,
            "" => Self::Auto,
            address => Self::Specific(address.to_owned()),
        }
    }

    /// Returns `true` unless the request is the `None` sentinel.
    #[must_use]
    pub const fn is_requested(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Errors raised while allocating or associating a floating IP.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AllocationError {
    /// Raised when every allocated address is already bound.
    #[error("unable to assign a floating IP from allocated IPs")]
    NoFreeAddress,
    /// Raised when the requested address is not in the allocated list.
    ///
    /// Existence was already checked by validation, but provider state may
    /// have changed in between; this is an expected TOCTOU window.
    #[error("floating IP {address} is not allocated to this project")]
    AddressNotFound {
        /// The address that was requested.
        address: String,
    },
    /// Provider failure during listing or association, surfaced unmodified.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Finds or validates a floating IP for `request` and associates it with
/// the instance.
///
/// The caller is expected to short-circuit the [`FloatingIpRequest::None`]
/// sentinel upstream; passing it here fails with
/// [`AllocationError::NoFreeAddress`] after an empty scan.
///
/// # Errors
///
/// Returns [`AllocationError::NoFreeAddress`] when auto-selection finds no
/// unbound address, [`AllocationError::AddressNotFound`] when a specific
/// address is absent from the allocated list, or
/// [`AllocationError::Provider`] when a provider call fails.
pub async fn allocate<P: CloudProvider + ?Sized>(
    request: &FloatingIpRequest,
    server_id: &str,
    provider: &P,
) -> Result<FloatingIp, AllocationError> {
    let allocated = provider.list_floating_ips().await?;
    debug!(count = allocated.len(), "scanning allocated floating IPs");

    let selected = match request {
        FloatingIpRequest::None | FloatingIpRequest::Auto => allocated
            .into_iter()
            .find(FloatingIp::is_free)
            .ok_or(AllocationError::NoFreeAddress)?,
        FloatingIpRequest::Specific(address) => allocated
            .into_iter()
            .find(|entry| entry.ip == *address)
            .ok_or_else(|| AllocationError::AddressNotFound {
                address: address.clone(),
            })?,
    };

    provider
        .associate_floating_ip(server_id, &selected.ip)
        .await?;
    debug!(address = %selected.ip, server_id, "floating IP associated");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;

    fn pool(entries: &[(&str, Option<&str>)]) -> Vec<FloatingIp> {
        entries
            .iter()
            .enumerate()
            .map(|(index, (ip, fixed))| FloatingIp {
                id: format!("fip-{index}"),
                ip: (*ip).to_owned(),
                fixed_ip: fixed.map(str::to_owned),
            })
            .collect()
    }

    #[test]
    fn request_decoding_matches_sentinels() {
        assert_eq!(FloatingIpRequest::from_config("-1"), FloatingIpRequest::None);
        assert_eq!(FloatingIpRequest::from_config(""), FloatingIpRequest::Auto);
        assert_eq!(
            FloatingIpRequest::from_config("203.0.113.5"),
            FloatingIpRequest::Specific("203.0.113.5".to_owned())
        );
    }

    #[tokio::test]
    async fn auto_selects_first_free_in_provider_order() {
        let provider = FakeProvider::new().with_floating_ips(pool(&[
            ("203.0.113.1", Some("10.0.0.2")),
            ("203.0.113.5", None),
            ("203.0.113.9", None),
        ]));

        let selected = allocate(&FloatingIpRequest::Auto, "srv-1", &provider)
            .await
            .expect("a free address exists");
        assert_eq!(selected.ip, "203.0.113.5");
        assert_eq!(
            provider.associations(),
            vec![("srv-1".to_owned(), "203.0.113.5".to_owned())]
        );
    }

    #[tokio::test]
    async fn auto_fails_when_every_address_is_bound() {
        let provider = FakeProvider::new().with_floating_ips(pool(&[
            ("203.0.113.1", Some("10.0.0.2")),
            ("203.0.113.5", Some("10.0.0.3")),
        ]));

        let err = allocate(&FloatingIpRequest::Auto, "srv-1", &provider)
            .await
            .expect_err("no free address");
        assert_eq!(err, AllocationError::NoFreeAddress);
        assert!(provider.associations().is_empty());
    }

    #[tokio::test]
    async fn specific_address_must_still_exist() {
        let provider =
            FakeProvider::new().with_floating_ips(pool(&[("203.0.113.1", None)]));

        let request = FloatingIpRequest::Specific("203.0.113.99".to_owned());
        let err = allocate(&request, "srv-1", &provider)
            .await
            .expect_err("address vanished since validation");
        assert!(matches!(err, AllocationError::AddressNotFound { address } if address == "203.0.113.99"));
    }

    #[tokio::test]
    async fn association_errors_propagate_unmodified() {
        let provider = FakeProvider::new()
            .with_floating_ips(pool(&[("203.0.113.5", None)]))
            .with_associate_error(ProviderError::Api {
                code: 500,
                message: "boom".to_owned(),
            });

        let err = allocate(&FloatingIpRequest::Auto, "srv-1", &provider)
            .await
            .expect_err("association fails");
        assert!(matches!(err, AllocationError::Provider(ProviderError::Api { code: 500, .. })));
    }
}
