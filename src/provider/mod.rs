//! Identity-provider descriptors.
//!
//! A [`Provider`] binds a provider's identity (name, issuer, accepted
//! audiences) to its key cache and its claims-to-identity mapping rule.
//! One long-lived instance exists per external provider, created at startup;
//! only the embedded [`KeyCache`] mutates afterwards.

pub mod config;

use anyhow::Context;
use std::time::Duration;

use crate::keys::{KeyCache, KeyFormat};

pub use config::ProviderConfig;

/// Google's published certificate endpoint.
pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";
/// Google's token issuer.
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Apple's published JWKS endpoint.
pub const APPLE_KEYS_URL: &str = "https://appleid.apple.com/auth/keys";
/// Apple's token issuer.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// A claim the identity mapping pulls from the token's free-form claim set.
#[derive(Debug, Clone)]
pub struct ClaimField {
    /// Claim name in the token payload.
    pub claim: String,
    /// Whether verification fails when the claim is absent.
    pub required: bool,
}

impl ClaimField {
    /// An optional claim field.
    pub fn optional(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            required: false,
        }
    }

    /// A mandatory claim field.
    pub fn required(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            required: true,
        }
    }
}

/// Rule mapping validated claims to an identity.
///
/// The subject is always required; the fields here cover the
/// provider-specific extras.
#[derive(Debug, Clone, Default)]
pub struct IdentityMapping {
    /// Claim carrying the user's email, if any.
    pub email: Option<ClaimField>,
    /// Claim carrying the user's display name, if any.
    pub display_name: Option<ClaimField>,
}

/// Descriptor for one external identity provider.
pub struct Provider {
    name: String,
    issuer: String,
    audiences: Vec<String>,
    keys: KeyCache,
    mapping: IdentityMapping,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .field("audiences", &self.audiences)
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Build a provider from configuration. Fails on misconfiguration;
    /// intended to run at startup, not per request.
    pub fn from_config(config: ProviderConfig) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("invalid provider configuration '{}'", config.name))?;

        let mapping = IdentityMapping {
            email: config.email_claim.map(ClaimField::optional),
            display_name: config.display_name_claim.map(ClaimField::optional),
        };

        Ok(Self {
            keys: KeyCache::new(
                config.key_source_url,
                config.key_format,
                Duration::from_secs(config.key_refresh_secs),
            ),
            name: config.name,
            issuer: config.issuer,
            audiences: config.audiences,
            mapping,
        })
    }

    /// "Sign in with Google": PEM certificate map keyed by kid.
    pub fn google(audiences: Vec<String>, key_refresh: Duration) -> Self {
        Self {
            name: "google".to_string(),
            issuer: GOOGLE_ISSUER.to_string(),
            audiences,
            keys: KeyCache::new(GOOGLE_CERTS_URL, KeyFormat::PemMap, key_refresh),
            mapping: IdentityMapping {
                email: Some(ClaimField::optional("email")),
                display_name: Some(ClaimField::optional("name")),
            },
        }
    }

    /// "Sign in with Apple": JWK set.
    pub fn apple(audiences: Vec<String>, key_refresh: Duration) -> Self {
        Self {
            name: "apple".to_string(),
            issuer: APPLE_ISSUER.to_string(),
            audiences,
            keys: KeyCache::new(APPLE_KEYS_URL, KeyFormat::JwkSet, key_refresh),
            mapping: IdentityMapping {
                email: Some(ClaimField::optional("email")),
                display_name: None,
            },
        }
    }

    /// Fully custom provider, for tests and providers outside the
    /// well-known set.
    pub fn custom(
        name: impl Into<String>,
        issuer: impl Into<String>,
        audiences: Vec<String>,
        keys: KeyCache,
        mapping: IdentityMapping,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: issuer.into(),
            audiences,
            keys,
            mapping,
        }
    }

    /// Provider name used as the routing key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact issuer string expected in tokens.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Accepted audiences.
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// The provider's key cache.
    pub fn keys(&self) -> &KeyCache {
        &self.keys
    }

    /// The provider's claims-to-identity mapping rule.
    pub fn mapping(&self) -> &IdentityMapping {
        &self.mapping
    }
}
