//! Payload signing and signing-secret generation.
//!
//! - `sha256=<hex>` HMAC-SHA256 signatures over the exact payload bytes
//! - constant-time verification for receivers
//! - `whsec_`-prefixed secrets from the OS CSPRNG

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

/// Prefix of every generated signing secret.
pub const SECRET_PREFIX: &str = "whsec_";

/// Prefix of the `X-Webhook-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Random bytes per generated secret.
const SECRET_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Compute the `X-Webhook-Signature` value for a payload.
///
/// Returns `sha256=` followed by the lowercase hex HMAC-SHA256 of `payload`
/// keyed with `secret`.
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);

    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received `X-Webhook-Signature` header using constant-time comparison.
pub fn verify_signature(secret: &str, payload: &[u8], header_value: &str) -> bool {
    let computed = compute_signature(secret, payload);
    constant_time_eq(header_value.as_bytes(), computed.as_bytes())
}

/// Generate a new signing secret: 32 random bytes, base64, `whsec_` prefix.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", BASE64.encode(bytes))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
