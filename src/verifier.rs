//! Token verification.
//!
//! [`Verifier::verify`] runs the claim-validation sequence: resolve the
//! provider, refresh its keys if stale, check the signature against the
//! cached key matching the token's `kid`, then validate expiry, issuer and
//! audience before mapping the claims to an [`Identity`]. The sequence is
//! strictly linear; all retry behavior lives in the key fetch.

use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};
use crate::fetch::KeyFetch;
use crate::keys::KeySnapshot;
use crate::provider::{ClaimField, IdentityMapping, Provider};
use crate::registry::Registry;

/// Normalized identity produced by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable subject identifier from the token.
    pub id: String,
    /// Display name, when the provider maps one and the token carries it.
    pub display_name: Option<String>,
    /// Email, when the provider maps one and the token carries it.
    pub email: Option<String>,
}

/// Claims parsed from a raw token.
#[derive(Debug, Deserialize)]
pub struct Claims {
    /// Subject (user identifier)
    pub sub: Option<String>,
    /// Issuer
    pub iss: Option<String>,
    /// Audience (string or array)
    #[serde(default)]
    pub aud: Audience,
    /// Expiration time (Unix seconds)
    pub exp: Option<i64>,
    /// Not before (Unix seconds)
    pub nbf: Option<i64>,
    /// Issued at (Unix seconds)
    pub iat: Option<i64>,
    /// Provider-specific claims (email, name, ...)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Audience claim: absent, a single string, or an array of strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// No audience claim present.
    #[default]
    None,
    /// A single audience string.
    Single(String),
    /// Multiple audience strings.
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether the claim contains `aud` exactly.
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Signature algorithms accepted on inbound tokens. Symmetric algorithms
/// are excluded: provider keys are public, so an HS* token could be forged
/// by anyone holding the published key material.
pub const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Verifies identity tokens against registered providers.
pub struct Verifier {
    registry: Arc<Registry>,
    fetcher: Arc<dyn KeyFetch>,
}

impl Verifier {
    /// Create a verifier over the given registry and fetch strategy.
    pub fn new(registry: Arc<Registry>, fetcher: Arc<dyn KeyFetch>) -> Self {
        Self { registry, fetcher }
    }

    /// Create a verifier that fetches keys over HTTPS.
    pub fn with_http_fetcher(registry: Arc<Registry>) -> anyhow::Result<Self> {
        let fetcher = Arc::new(crate::fetch::HttpKeyFetcher::new()?);
        Ok(Self::new(registry, fetcher))
    }

    /// Verify `raw_token` against the provider registered under
    /// `provider_name`, returning the mapped identity or the first failure.
    pub async fn verify(&self, provider_name: &str, raw_token: &str) -> Result<Identity> {
        let provider = self.registry.resolve(provider_name)?;

        let snapshot = self.snapshot_for(&provider).await?;

        let header = decode_header(raw_token)
            .map_err(|e| AuthError::MalformedToken(format!("invalid token header: {e}")))?;

        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        debug!(
            provider = %provider.name(),
            kid = ?header.kid,
            alg = ?header.alg,
            "validating identity token"
        );

        let key = match header.kid.as_deref() {
            Some(kid) => snapshot.get(kid).ok_or_else(|| AuthError::InvalidKid {
                kid: kid.to_string(),
            })?,
            // Without a kid the token is only acceptable when the provider
            // publishes a single key.
            None => snapshot.sole_key().ok_or(AuthError::InvalidKid {
                kid: "(missing)".to_string(),
            })?,
        };

        let claims = check_signature(raw_token, key, header.alg)?;

        let now = Utc::now().timestamp();
        check_validity_window(&claims, now)?;
        check_issuer(&claims, provider.issuer())?;
        check_audience(&claims, provider.audiences())?;

        let identity = map_identity(&claims, provider.mapping())?;

        debug!(
            provider = %provider.name(),
            subject = %identity.id,
            "identity token verified"
        );

        Ok(identity)
    }

    /// Fresh keys when possible; previously cached keys when a refresh
    /// fails but an earlier one succeeded. Only a provider that has never
    /// loaded keys surfaces the refresh error.
    async fn snapshot_for(&self, provider: &Provider) -> Result<Arc<KeySnapshot>> {
        match provider.keys().ensure_fresh(self.fetcher.as_ref()).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => match provider.keys().current() {
                Some(stale) => {
                    warn!(
                        provider = %provider.name(),
                        error = %err,
                        "key refresh failed, serving with previously cached keys"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }
}

/// Verify the signature only; every claim check happens explicitly
/// afterwards so each failure maps to its own error kind.
fn check_signature(raw_token: &str, key: &DecodingKey, alg: Algorithm) -> Result<Claims> {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims::<&str>(&[]);

    let data = decode::<Claims>(raw_token, key, &validation).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::MalformedToken(e.to_string()),
            ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm(e.to_string()),
            _ => AuthError::InvalidSignature,
        }
    })?;

    Ok(data.claims)
}

/// `now` must fall within `[nbf, exp)`. A token without `exp` does not
/// expire; a token without `nbf` is valid from issuance.
fn check_validity_window(claims: &Claims, now: i64) -> Result<()> {
    if let Some(exp) = claims.exp {
        if now >= exp {
            return Err(AuthError::Expired);
        }
    }

    if let Some(nbf) = claims.nbf {
        if now < nbf {
            return Err(AuthError::Expired);
        }
    }

    Ok(())
}

fn check_issuer(claims: &Claims, expected: &str) -> Result<()> {
    let found = claims.iss.as_deref().unwrap_or_default();
    if found != expected {
        return Err(AuthError::InvalidIssuer {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

fn check_audience(claims: &Claims, accepted: &[String]) -> Result<()> {
    if accepted.iter().any(|aud| claims.aud.contains(aud)) {
        return Ok(());
    }
    Err(AuthError::InvalidAudience)
}

/// Apply the provider's mapping rule to validated claims.
fn map_identity(claims: &Claims, mapping: &IdentityMapping) -> Result<Identity> {
    let id = claims
        .sub
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingClaim("sub".to_string()))?
        .to_string();

    Ok(Identity {
        id,
        display_name: mapped_field(claims, mapping.display_name.as_ref())?,
        email: mapped_field(claims, mapping.email.as_ref())?,
    })
}

fn mapped_field(claims: &Claims, field: Option<&ClaimField>) -> Result<Option<String>> {
    let Some(field) = field else {
        return Ok(None);
    };

    match extract_claim(claims, &field.claim) {
        Some(value) => Ok(Some(value)),
        None if field.required => Err(AuthError::MissingClaim(field.claim.clone())),
        None => Ok(None),
    }
}

/// Pull a claim value as a string from the free-form claim set.
fn extract_claim(claims: &Claims, claim_name: &str) -> Option<String> {
    match claim_name {
        "sub" => claims.sub.clone(),
        "iss" => claims.iss.clone(),
        _ => claims.extra.get(claim_name).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(payload: serde_json::Value) -> Claims {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn test_audience_contains() {
        let single = Audience::Single("api".to_string());
        assert!(single.contains("api"));
        assert!(!single.contains("other"));

        let multi = Audience::Multiple(vec!["api".to_string(), "web".to_string()]);
        assert!(multi.contains("api"));
        assert!(multi.contains("web"));
        assert!(!multi.contains("other"));

        let none = Audience::None;
        assert!(!none.contains("anything"));
    }

    #[test]
    fn test_validity_window() {
        let c = claims(json!({"exp": 1000, "nbf": 500}));
        assert!(check_validity_window(&c, 499).is_err());
        assert!(check_validity_window(&c, 500).is_ok());
        assert!(check_validity_window(&c, 999).is_ok());
        assert!(matches!(
            check_validity_window(&c, 1000),
            Err(AuthError::Expired)
        ));

        // No exp: never expires.
        let c = claims(json!({}));
        assert!(check_validity_window(&c, i64::MAX).is_ok());
    }

    #[test]
    fn test_issuer_check() {
        let c = claims(json!({"iss": "https://accounts.google.com"}));
        assert!(check_issuer(&c, "https://accounts.google.com").is_ok());
        assert!(matches!(
            check_issuer(&c, "https://appleid.apple.com"),
            Err(AuthError::InvalidIssuer { .. })
        ));

        let missing = claims(json!({}));
        assert!(check_issuer(&missing, "https://accounts.google.com").is_err());
    }

    #[test]
    fn test_audience_intersection() {
        let c = claims(json!({"aud": ["client-123", "client-456"]}));
        assert!(check_audience(&c, &["client-456".to_string()]).is_ok());
        assert!(matches!(
            check_audience(&c, &["other-client".to_string()]),
            Err(AuthError::InvalidAudience)
        ));
    }

    #[test]
    fn test_map_identity_requires_subject() {
        let mapping = IdentityMapping::default();
        let c = claims(json!({"email": "a@example.com"}));
        assert!(matches!(
            map_identity(&c, &mapping),
            Err(AuthError::MissingClaim(claim)) if claim == "sub"
        ));

        let c = claims(json!({"sub": ""}));
        assert!(map_identity(&c, &mapping).is_err());
    }

    #[test]
    fn test_map_identity_optional_and_required_fields() {
        let c = claims(json!({"sub": "user-1", "email": "a@example.com"}));

        let mapping = IdentityMapping {
            email: Some(ClaimField::optional("email")),
            display_name: Some(ClaimField::optional("name")),
        };
        let identity = map_identity(&c, &mapping).unwrap();
        assert_eq!(identity.id, "user-1");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert!(identity.display_name.is_none(), "absent optional field is tolerated");

        let strict = IdentityMapping {
            email: None,
            display_name: Some(ClaimField::required("name")),
        };
        assert!(matches!(
            map_identity(&c, &strict),
            Err(AuthError::MissingClaim(claim)) if claim == "name"
        ));
    }

    #[test]
    fn test_extract_claim_handles_numbers() {
        let c = claims(json!({"sub": "u", "account_id": 42}));
        assert_eq!(extract_claim(&c, "account_id").as_deref(), Some("42"));
        assert_eq!(extract_claim(&c, "sub").as_deref(), Some("u"));
        assert!(extract_claim(&c, "missing").is_none());
    }
}
