//! Verification error types.
//!
//! Every failure surfaces as a typed [`AuthError`] so callers can map kinds
//! to responses without parsing message strings.

use thiserror::Error;

use crate::fetch::FetchError;

/// Errors produced while verifying an identity token.
///
/// Marked `#[non_exhaustive]` — downstream match expressions must include a
/// wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No provider registered under the requested name.
    #[error("invalid provider: {name}")]
    InvalidProvider {
        /// The name that failed to resolve.
        name: String,
    },

    /// Fetching the provider's published key material failed.
    #[error("key fetch failed: {0}")]
    KeyFetch(#[from] FetchError),

    /// The fetched key material could not be decoded into usable keys.
    #[error("key decode failed: {0}")]
    KeyDecode(String),

    /// No cached key matches the token's key identifier.
    #[error("invalid kid: {kid}")]
    InvalidKid {
        /// Key identifier from the token header.
        kid: String,
    },

    /// The token signature does not verify against the matched key.
    #[error("invalid signature")]
    InvalidSignature,

    /// The token is not structurally a JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token's algorithm is not in the accepted asymmetric set.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The current time is outside the token's validity window.
    #[error("expired")]
    Expired,

    /// The token issuer does not exactly match the provider's issuer.
    #[error("invalid iss: expected {expected}, got {found}")]
    InvalidIssuer {
        /// Issuer configured on the provider.
        expected: String,
        /// Issuer found in the token.
        found: String,
    },

    /// No token audience matches any accepted audience.
    #[error("invalid aud")]
    InvalidAudience,

    /// A claim the provider's identity mapping requires is absent.
    #[error("missing claim: {0}")]
    MissingClaim(String),
}

/// Result type alias for verification operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::InvalidProvider {
            name: "unknown".into(),
        };
        assert_eq!(err.to_string(), "invalid provider: unknown");

        let err = AuthError::Expired;
        assert_eq!(err.to_string(), "expired");

        let err = AuthError::InvalidIssuer {
            expected: "https://accounts.google.com".into(),
            found: "https://evil.example".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid iss: expected https://accounts.google.com, got https://evil.example"
        );

        let err = AuthError::MissingClaim("sub".into());
        assert_eq!(err.to_string(), "missing claim: sub");
    }

    #[test]
    fn test_fetch_error_conversion() {
        let fetch_err = FetchError::Timeout { attempts: 3 };
        let err: AuthError = fetch_err.into();
        assert!(matches!(err, AuthError::KeyFetch(FetchError::Timeout { attempts: 3 })));
    }
}
