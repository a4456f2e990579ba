//! Named-PEM-map decoding.
//!
//! Some providers publish their signing keys as a JSON object mapping key
//! identifiers to PEM strings (X.509 certificates or bare public keys),
//! e.g. Google's `oauth2/v1/certs` endpoint. Each entry is reduced to its
//! SubjectPublicKeyInfo and converted to a `jsonwebtoken` decoding key.

use base64::{engine::general_purpose::STANDARD, Engine};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use tracing::{debug, warn};
use x509_parser::prelude::*;
use x509_parser::oid_registry::{OID_PKCS1_RSAENCRYPTION, OID_SIG_ED25519};

use crate::error::{AuthError, Result};

/// Decode a `{kid: pem}` JSON body into `kid -> DecodingKey`.
///
/// Entries that fail to parse are logged and skipped; an empty result is an
/// error so a refresh never installs an unusable key set.
pub fn decode_pem_map(body: &[u8]) -> Result<HashMap<String, DecodingKey>> {
    let entries: HashMap<String, String> = serde_json::from_slice(body)
        .map_err(|e| AuthError::KeyDecode(format!("invalid PEM map body: {e}")))?;

    let mut keys = HashMap::new();
    for (kid, pem) in entries {
        match decode_pem_entry(&pem) {
            Ok(key) => {
                debug!(kid = %kid, "loaded PEM key");
                keys.insert(kid, key);
            }
            Err(e) => {
                warn!(kid = %kid, error = %e, "skipping unparseable PEM entry");
            }
        }
    }

    if keys.is_empty() {
        return Err(AuthError::KeyDecode(
            "no usable signing keys in PEM map".to_string(),
        ));
    }

    Ok(keys)
}

/// Decode a single PEM entry (certificate or bare public key).
fn decode_pem_entry(pem: &str) -> Result<DecodingKey> {
    if let Some(der) = pem_body(pem, "CERTIFICATE")? {
        let (_, cert) = parse_x509_certificate(&der)
            .map_err(|e| AuthError::KeyDecode(format!("invalid X.509 certificate: {e:?}")))?;
        return spki_to_decoding_key(cert.public_key());
    }

    if let Some(der) = pem_body(pem, "PUBLIC KEY")? {
        let (_, spki) = SubjectPublicKeyInfo::from_der(&der)
            .map_err(|e| AuthError::KeyDecode(format!("invalid public key: {e:?}")))?;
        return spki_to_decoding_key(&spki);
    }

    Err(AuthError::KeyDecode(
        "PEM entry is neither a certificate nor a public key".to_string(),
    ))
}

/// Extract the DER body between PEM markers for `label`, if present.
fn pem_body(pem: &str, label: &str) -> Result<Option<Vec<u8>>> {
    let start_marker = format!("-----BEGIN {label}-----");
    let end_marker = format!("-----END {label}-----");

    let Some(start) = pem.find(&start_marker) else {
        return Ok(None);
    };
    // Search only the tail: an END marker before BEGIN must not match.
    let body_start = start + start_marker.len();
    let end = pem[body_start..]
        .find(&end_marker)
        .map(|i| body_start + i)
        .ok_or_else(|| AuthError::KeyDecode(format!("PEM missing END {label} marker")))?;

    let base64_content: String = pem[body_start..end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let der = STANDARD
        .decode(&base64_content)
        .map_err(|e| AuthError::KeyDecode(format!("bad PEM base64: {e}")))?;

    Ok(Some(der))
}

/// Convert a SubjectPublicKeyInfo to a DecodingKey.
fn spki_to_decoding_key(spki: &SubjectPublicKeyInfo<'_>) -> Result<DecodingKey> {
    let alg = &spki.algorithm.algorithm;
    let key_data: &[u8] = spki.subject_public_key.data.as_ref();

    if *alg == OID_PKCS1_RSAENCRYPTION {
        // The bit string payload is a PKCS#1 RSAPublicKey.
        Ok(DecodingKey::from_rsa_der(key_data))
    } else if *alg == OID_SIG_ED25519 {
        // The bit string payload is the raw 32-byte public key.
        DecodingKey::from_ed_components(&URL_SAFE_NO_PAD.encode(key_data))
            .map_err(|e| AuthError::KeyDecode(format!("invalid Ed25519 key: {e}")))
    } else {
        Err(AuthError::KeyDecode(format!(
            "unsupported public key algorithm: {alg}"
        )))
    }
}
