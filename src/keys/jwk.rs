//! JWK-set decoding.
//!
//! Decodes a provider's published JWK set into `jsonwebtoken` decoding keys,
//! keyed by `kid`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

/// JWKS response body.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

/// Individual JSON Web Key.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, OKP)
    pub kty: String,
    /// Key ID
    pub kid: Option<String>,
    /// Algorithm
    pub alg: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub key_use: Option<String>,

    // RSA parameters
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA exponent (base64url)
    pub e: Option<String>,

    // EC / OKP parameters
    /// Curve name
    pub crv: Option<String>,
    /// EC x coordinate or OKP public key (base64url)
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    pub y: Option<String>,
}

/// Decode a JWK-set body into `kid -> DecodingKey`.
///
/// Encryption keys are skipped; keys that fail to parse are logged and
/// skipped. An empty result is an error — a refresh must never install an
/// unusable key set.
pub fn decode_jwk_set(body: &[u8]) -> Result<HashMap<String, DecodingKey>> {
    let jwks: Jwks = serde_json::from_slice(body)
        .map_err(|e| AuthError::KeyDecode(format!("invalid JWKS body: {e}")))?;

    let mut keys = HashMap::new();
    for jwk in jwks.keys {
        if jwk.key_use.as_deref() == Some("enc") {
            continue;
        }

        match jwk_to_decoding_key(&jwk) {
            Ok(key) => {
                let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                debug!(kid = %kid, kty = %jwk.kty, "loaded JWK");
                keys.insert(kid, key);
            }
            Err(e) => {
                warn!(kid = ?jwk.kid, kty = %jwk.kty, error = %e, "skipping unparseable JWK");
            }
        }
    }

    if keys.is_empty() {
        return Err(AuthError::KeyDecode(
            "no usable signing keys in JWKS".to_string(),
        ));
    }

    Ok(keys)
}

/// Convert a single JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = field(jwk.n.as_ref(), "RSA key missing 'n'")?;
            let e = field(jwk.e.as_ref(), "RSA key missing 'e'")?;
            DecodingKey::from_rsa_components(n, e)
                .map_err(|e| AuthError::KeyDecode(format!("invalid RSA components: {e}")))
        }
        "EC" => {
            let x = field(jwk.x.as_ref(), "EC key missing 'x'")?;
            let y = field(jwk.y.as_ref(), "EC key missing 'y'")?;
            let crv = field(jwk.crv.as_ref(), "EC key missing 'crv'")?;

            let x_bytes = URL_SAFE_NO_PAD
                .decode(x)
                .map_err(|e| AuthError::KeyDecode(format!("bad EC x coordinate: {e}")))?;
            let y_bytes = URL_SAFE_NO_PAD
                .decode(y)
                .map_err(|e| AuthError::KeyDecode(format!("bad EC y coordinate: {e}")))?;

            // Uncompressed EC point (0x04 || x || y)
            let mut point = vec![0x04];
            point.extend_from_slice(&x_bytes);
            point.extend_from_slice(&y_bytes);

            match crv.as_str() {
                "P-256" | "P-384" => {
                    let der = wrap_ec_public_key(&point, crv)?;
                    Ok(DecodingKey::from_ec_der(&der))
                }
                _ => Err(AuthError::KeyDecode(format!("unsupported EC curve: {crv}"))),
            }
        }
        "OKP" => {
            let crv = field(jwk.crv.as_ref(), "OKP key missing 'crv'")?;
            if crv != "Ed25519" {
                return Err(AuthError::KeyDecode(format!(
                    "unsupported OKP curve: {crv}"
                )));
            }
            let x = field(jwk.x.as_ref(), "OKP key missing 'x'")?;
            DecodingKey::from_ed_components(x)
                .map_err(|e| AuthError::KeyDecode(format!("invalid Ed25519 key: {e}")))
        }
        kty => Err(AuthError::KeyDecode(format!("unsupported key type: {kty}"))),
    }
}

fn field<'a>(value: Option<&'a String>, missing: &str) -> Result<&'a String> {
    value.ok_or_else(|| AuthError::KeyDecode(missing.to_string()))
}

/// Wrap an uncompressed EC point in a DER SubjectPublicKeyInfo.
fn wrap_ec_public_key(point: &[u8], curve: &str) -> Result<Vec<u8>> {
    // OID for id-ecPublicKey
    const ID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

    let curve_oid: &[u8] = match curve {
        "P-256" => &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07],
        "P-384" => &[0x2B, 0x81, 0x04, 0x00, 0x22],
        _ => {
            return Err(AuthError::KeyDecode(format!(
                "unsupported curve for DER encoding: {curve}"
            )))
        }
    };

    // AlgorithmIdentifier { id-ecPublicKey, namedCurve }
    let mut alg_id = Vec::new();
    push_der(&mut alg_id, 0x06, ID_EC_PUBLIC_KEY);
    push_der(&mut alg_id, 0x06, curve_oid);

    // BIT STRING: unused-bits byte then the point
    let mut key_bits = vec![0x00];
    key_bits.extend_from_slice(point);

    let mut body = Vec::new();
    push_der(&mut body, 0x30, &alg_id);
    push_der(&mut body, 0x03, &key_bits);

    let mut der = Vec::new();
    push_der(&mut der, 0x30, &body);
    Ok(der)
}

/// Append one DER TLV. Handles the one- and two-byte length forms, which
/// covers every SPKI this module builds.
fn push_der(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    if content.len() < 128 {
        out.push(content.len() as u8);
    } else {
        out.push(0x81);
        out.push(content.len() as u8);
    }
    out.extend_from_slice(content);
}
