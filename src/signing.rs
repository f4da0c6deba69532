//! HMAC signatures over outbound webhook bodies.
//!
//! The signature covers the exact byte sequence that is POSTed; any
//! re-serialization on the receiving side invalidates it.

use hmac::Hmac;
use hmac::Mac;
use rand::RngCore;
use secrecy::Secret;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// `sha256=<lowercase hex of HMAC-SHA256(secret, body)>`, the value sent as
/// `X-Signature`.
pub fn signature_header(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take a key of any size");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of an `X-Signature` header value against a body.
/// The relay only produces signatures; this is what subscribers are expected
/// to run on their side, and what the test suite runs against captured
/// requests.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(digest) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take a key of any size");
    mac.update(body);
    // verify_slice is the constant-time comparison
    mac.verify_slice(&digest).is_ok()
}

/// 32 bytes from the thread RNG, hex-encoded. The hex string itself is the
/// shared secret: its ASCII bytes are the HMAC key, and it is what the
/// create-subscription response hands the subscriber (exactly once).
pub fn generate_secret_key() -> Secret<String> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Secret::new(hex::encode(bytes))
}

/// Unix seconds for the `X-Timestamp` header.
pub fn unix_timestamp() -> i64 { chrono::Utc::now().timestamp() }
