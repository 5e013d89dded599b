//! Webhook event decoding and authenticity verification
//!
//! Provider webhook deliveries are verified with HMAC-SHA256 over the raw
//! request body before any field of the payload is parsed or trusted.
//! Unsigned or wrongly-signed deliveries are rejected outright; there is no
//! unverified processing path.

use crate::error::{Error, Result};
use crate::types::{Currency, PaymentEvent};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    id: String,
    amount: Decimal,
    currency: String,
    reference: String,
}

/// Verifies provider webhook signatures and decodes payment events
pub struct WebhookDecoder {
    secret: String,
}

impl WebhookDecoder {
    /// Create decoder with the provider's shared secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Verify `signature` (hex-encoded HMAC-SHA256 of `body`) and decode the
    /// payload into a payment event. Verification happens before parsing.
    pub fn decode(&self, body: &[u8], signature: &str) -> Result<PaymentEvent> {
        self.verify(body, signature)?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidEvent(format!("malformed webhook payload: {}", e)))?;

        let currency = Currency::from_str(&payload.currency).ok_or_else(|| {
            Error::InvalidEvent(format!("unsupported currency: {}", payload.currency))
        })?;

        Ok(PaymentEvent {
            provider_id: payload.id,
            amount: payload.amount,
            currency,
            reference: payload.reference,
        })
    }

    fn verify(&self, body: &[u8], signature: &str) -> Result<()> {
        let expected = hex::decode(signature)
            .map_err(|_| Error::UnverifiedEvent("signature is not valid hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| Error::Config("invalid webhook secret".to_string()))?;
        mac.update(body);

        // Constant-time comparison
        mac.verify_slice(&expected)
            .map_err(|_| Error::UnverifiedEvent("signature mismatch".to_string()))?;

        Ok(())
    }
}
