//! # idtoken
//!
//! Verification of identity tokens ("Sign in with Apple", "Sign in with
//! Google", and similar OpenID-Connect-style providers), producing a
//! normalized [`Identity`] or a typed [`AuthError`].
//!
//! This crate provides:
//! - **Provider registry**: dependency-injected name → provider lookup
//! - **Key caching**: per-provider TTL-refreshed signing-key snapshots
//! - **Resilient key fetch**: bounded retries with linear backoff behind an
//!   injectable fetch strategy
//! - **Claim validation**: signature, expiry, issuer and audience checks in
//!   a fixed order, each with its own error kind
//!
//! The HTTP surface that exposes verification as an endpoint is out of
//! scope; callers hand `verify` a provider name and a raw token.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use idtoken::{Provider, Registry, Verifier};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(Registry::new());
//! registry.register([
//!     Provider::google(vec!["client-123".into()], Duration::from_secs(3600)),
//!     Provider::apple(vec!["com.example.app".into()], Duration::from_secs(3600)),
//! ]);
//!
//! let verifier = Verifier::with_http_fetcher(registry)?;
//! let identity = verifier.verify("google", "eyJhbGciOiJSUzI1NiIs...").await?;
//! println!("verified subject: {}", identity.id);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Verification error types.
pub mod error;
/// Key-material fetching with retries.
pub mod fetch;
/// Signing-key caching and decoding.
pub mod keys;
/// Identity-provider descriptors and configuration.
pub mod provider;
/// Provider registry.
pub mod registry;
/// Token verification.
pub mod verifier;

pub use error::{AuthError, Result};
pub use fetch::{HttpKeyFetcher, KeyFetch};
pub use keys::{KeyCache, KeyFormat};
pub use provider::{ClaimField, IdentityMapping, Provider, ProviderConfig};
pub use registry::Registry;
pub use verifier::{Audience, Claims, Identity, Verifier};
