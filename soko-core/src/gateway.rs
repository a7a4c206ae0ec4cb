use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

/// An initialized gateway checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Payment gateway seam: webhook authenticity on the inbound side,
/// transaction initialization on the outbound side.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Verify the HMAC signature the gateway attached to a webhook body.
    /// Must be checked before anything is read from the payload.
    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Initialize an outbound payment session for an order, returning the
    /// authorization URL the buyer is redirected to and the gateway
    /// reference the webhook will later carry.
    async fn initialize_transaction(&self, order: &Order)
        -> Result<PaymentSession, GatewayError>;
}

/// HMAC-SHA256 over the raw body, hex digest, compared in constant time
pub fn verify_hmac_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
