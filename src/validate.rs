//! Pre-flight validation executed before any mutating API call.
//!
//! All checks are read-only against the provider and short-circuit on the
//! first failure, so a bad request never creates partial state.

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::floating::FloatingIpRequest;
use crate::provider::{CloudProvider, Flavor, FloatingIp, Image, ProviderError};

/// Flavor and image resolved during validation.
///
/// The provisioner builds the server spec from these concrete identifiers
/// rather than re-resolving the user's references.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedCatalog {
    /// The flavor matched by name or identifier.
    pub flavor: Flavor,
    /// The image matched by identifier or name pattern.
    pub image: Image,
}

/// Errors raised by pre-flight validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when no flavor matches the reference by name or identifier.
    #[error("flavor '{reference}' not found in the provider's flavor catalog")]
    FlavorNotFound {
        /// The flavor name or identifier that was requested.
        reference: String,
    },
    /// Raised when no image matches the reference by identifier or pattern.
    #[error("image '{reference}' not found in the provider's image catalog")]
    ImageNotFound {
        /// The image identifier or name pattern that was requested.
        reference: String,
    },
    /// Raised when the image reference is not a valid pattern.
    #[error("invalid image pattern '{pattern}': {message}")]
    ImagePattern {
        /// The pattern as supplied.
        pattern: String,
        /// Compilation error reported by the regex engine.
        message: String,
    },
    /// Raised when the requested floating IP is invalid or none are free.
    #[error("requested floating IP is invalid or none are available")]
    FloatingIpUnavailable,
    /// Provider failure during a catalog query.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Runs the pre-flight checks in order: flavor, image, floating IP.
///
/// # Errors
///
/// Returns the first failing check's [`ValidationError`]; later checks are
/// not performed.
pub async fn validate<P: CloudProvider + ?Sized>(
    flavor_ref: &str,
    image_ref: &str,
    floating: &FloatingIpRequest,
    provider: &P,
) -> Result<ResolvedCatalog, ValidationError> {
    let flavor = resolve_flavor(flavor_ref, provider).await?;
    debug!(flavor = %flavor.id, "flavor resolved");
    let image = resolve_image(image_ref, provider).await?;
    debug!(image = %image.id, "image resolved");
    check_floating(floating, provider).await?;
    Ok(ResolvedCatalog { flavor, image })
}

async fn resolve_flavor<P: CloudProvider + ?Sized>(
    reference: &str,
    provider: &P,
) -> Result<Flavor, ValidationError> {
    provider
        .list_flavors()
        .await?
        .into_iter()
        .find(|flavor| flavor.name == reference || flavor.id == reference)
        .ok_or_else(|| ValidationError::FlavorNotFound {
            reference: reference.to_owned(),
        })
}

async fn resolve_image<P: CloudProvider + ?Sized>(
    reference: &str,
    provider: &P,
) -> Result<Image, ValidationError> {
    let pattern = Regex::new(reference).map_err(|err| ValidationError::ImagePattern {
        pattern: reference.to_owned(),
        message: err.to_string(),
    })?;

    provider
        .list_images()
        .await?
        .into_iter()
        .find(|image| pattern.is_match(&image.name) || image.id == reference)
        .ok_or_else(|| ValidationError::ImageNotFound {
            reference: reference.to_owned(),
        })
}

async fn check_floating<P: CloudProvider + ?Sized>(
    request: &FloatingIpRequest,
    provider: &P,
) -> Result<(), ValidationError> {
    match request {
        FloatingIpRequest::None => Ok(()),
        FloatingIpRequest::Auto => {
            let allocated = provider.list_floating_ips().await?;
            if allocated.iter().any(FloatingIp::is_free) {
                Ok(())
            } else {
                Err(ValidationError::FloatingIpUnavailable)
            }
        }
        FloatingIpRequest::Specific(address) => {
            let allocated = provider.list_floating_ips().await?;
            if allocated.iter().any(|entry| entry.ip == *address) {
                Ok(())
            } else {
                Err(ValidationError::FloatingIpUnavailable)
            }
        }
    }
}
