//! Provider configuration.

use serde::{Deserialize, Serialize};

use crate::keys::KeyFormat;

/// Configuration for one external identity provider.
///
/// Supplied at startup; validation failures are fatal there, never per
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider name used as the routing key (e.g. "google").
    pub name: String,

    /// Token issuer (iss claim). Must match exactly.
    /// Example: "https://accounts.google.com"
    pub issuer: String,

    /// URL publishing the provider's verification keys.
    /// Example: "https://appleid.apple.com/auth/keys"
    pub key_source_url: String,

    /// Wire format of the published key material.
    pub key_format: KeyFormat,

    /// Accepted audiences (aud claim). A token must match at least one.
    pub audiences: Vec<String>,

    /// Key cache refresh interval in seconds.
    #[serde(default = "default_key_refresh")]
    pub key_refresh_secs: u64,

    /// Claim holding the user's email, if the provider supplies one.
    #[serde(default = "default_email_claim")]
    pub email_claim: Option<String>,

    /// Claim holding the user's display name, if the provider supplies one.
    #[serde(default)]
    pub display_name_claim: Option<String>,
}

fn default_key_refresh() -> u64 {
    3600 // 1 hour
}

fn default_email_claim() -> Option<String> {
    Some("email".to_string())
}

impl ProviderConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("provider name is required".to_string());
        }

        if self.issuer.is_empty() {
            return Err("provider issuer is required".to_string());
        }

        if self.key_source_url.is_empty() {
            return Err("provider key_source_url is required".to_string());
        }

        if !self.key_source_url.starts_with("https://")
            && !self.key_source_url.starts_with("http://")
        {
            return Err("provider key_source_url must be a valid HTTP(S) URL".to_string());
        }

        if self.audiences.is_empty() {
            return Err("provider requires at least one accepted audience".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ProviderConfig {
        ProviderConfig {
            name: "google".to_string(),
            issuer: "https://accounts.google.com".to_string(),
            key_source_url: "https://www.googleapis.com/oauth2/v1/certs".to_string(),
            key_format: KeyFormat::PemMap,
            audiences: vec!["client-123".to_string()],
            key_refresh_secs: default_key_refresh(),
            email_claim: default_email_claim(),
            display_name_claim: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_fields() {
        let mut config = valid_config();
        config.name = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.issuer = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.key_source_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.audiences.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialization_defaults() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{
                "name": "apple",
                "issuer": "https://appleid.apple.com",
                "key_source_url": "https://appleid.apple.com/auth/keys",
                "key_format": "jwk-set",
                "audiences": ["com.example.app"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.key_refresh_secs, 3600);
        assert_eq!(config.email_claim.as_deref(), Some("email"));
        assert!(config.display_name_claim.is_none());
    }
}
