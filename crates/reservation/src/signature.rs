//! HMAC-SHA256 signatures used by the payment gateway.
//!
//! Signatures travel as lowercase hex. Verification decodes the hex and
//! compares the MAC in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8], message: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message);
    mac
}

/// Hex-encoded HMAC-SHA256 of `message` under `secret`.
pub fn sign_hex(secret: &[u8], message: &[u8]) -> String {
    hex::encode(keyed(secret, message).finalize().into_bytes())
}

/// Checks a hex signature against `message`. Malformed hex never verifies.
pub fn verify_hex(secret: &[u8], message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed(secret, message).verify_slice(&expected).is_ok()
}

/// The message a gateway signs when it reports a payment for an order.
pub fn payment_message(order_id: &str, payment_id: &str) -> String {
    format!("{order_id}|{payment_id}")
}

/// Verifies webhook bodies against the shared webhook secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs a raw body the way the gateway does.
    pub fn sign(&self, body: &[u8]) -> String {
        sign_hex(&self.secret, body)
    }

    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        verify_hex(&self.secret, body, signature)
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}
