use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::info;

use crate::error::{AppError, AppResult, PayoutError};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a signed webhook, in seconds
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// The irrevocable fiat payout call
///
/// `reference` is the matched transaction hash; it is forwarded as the
/// processor idempotency key, which is what makes running more than one
/// worker safe.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn pay(
        &self,
        amount: Decimal,
        currency: &str,
        destination: &str,
        reference: &str,
    ) -> AppResult<String>;
}

/// Stripe API client: payout transfers, checkout links and webhook
/// signature verification
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: String,
    webhook_secret: Option<String>,
}

#[derive(Deserialize)]
struct TransferResponse {
    id: String,
}

#[derive(Deserialize)]
struct PaymentLinkResponse {
    url: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: "https://api.stripe.com".to_string(),
            secret_key: secret_key.to_string(),
            webhook_secret,
        }
    }

    /// Fiat amount -> integer minor units (cents), rounded half away from
    /// zero
    fn minor_units(amount: Decimal) -> AppResult<i64> {
        (amount * Decimal::from(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| {
                AppError::Payout(PayoutError::Rejected(format!(
                    "amount not representable in minor units: {}",
                    amount
                )))
            })
    }

    /// Create a hosted checkout link shown to the seller at session
    /// creation. Best effort: session creation does not fail when this does.
    pub async fn create_checkout_link(
        &self,
        token_amount: Decimal,
        fiat_net: Decimal,
        currency: &str,
    ) -> AppResult<String> {
        let unit_amount = Self::minor_units(fiat_net)?;
        let params: Vec<(&str, String)> = vec![
            ("line_items[0][price_data][currency]", currency.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("Token sale {:.4}", token_amount),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                unit_amount.to_string(),
            ),
            ("line_items[0][quantity]", "1".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_links", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::External(format!(
                "payment link creation failed: {}",
                response.status()
            )));
        }

        let link: PaymentLinkResponse = response.json().await?;
        Ok(link.url)
    }

    /// Check a `t=...,v1=...` signature header against the raw body
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> AppResult<()> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| AppError::Config("webhook secret not configured".to_string()))?;

        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();
        for element in signature_header.split(',') {
            match element.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(AppError::Unauthorized)?;
        if (now_unix - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(AppError::Unauthorized);
        }

        for signature in &signatures {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| AppError::Config("invalid webhook secret".to_string()))?;
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            if mac.verify_slice(signature).is_ok() {
                return Ok(());
            }
        }

        Err(AppError::Unauthorized)
    }
}

#[async_trait]
impl PayoutProvider for StripeClient {
    async fn pay(
        &self,
        amount: Decimal,
        currency: &str,
        destination: &str,
        reference: &str,
    ) -> AppResult<String> {
        let minor = Self::minor_units(amount)?;
        let params: Vec<(&str, String)> = vec![
            ("amount", minor.to_string()),
            ("currency", currency.to_string()),
            ("destination", destination.to_string()),
            (
                "description",
                format!("Token off-ramp payout | TX: {}", reference),
            ),
        ];

        let response = self
            .client
            .post(format!("{}/v1/transfers", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", reference)
            .form(&params)
            .send()
            .await
            .map_err(|e| PayoutError::ProviderCall(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let transfer: TransferResponse = response
                .json()
                .await
                .map_err(|e| PayoutError::ProviderCall(format!("bad transfer response: {}", e)))?;
            info!(
                "Payout of {} {} sent to {} (transfer {})",
                amount, currency, destination, transfer.id
            );
            return Ok(transfer.id);
        }

        let message = response
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| format!("HTTP {}", status));

        if status.is_server_error() || status.as_u16() == 429 {
            Err(PayoutError::ProviderCall(message).into())
        } else {
            Err(PayoutError::Rejected(message).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> StripeClient {
        StripeClient::new(
            "sk_test_123",
            Some("whsec_test".to_string()),
            Duration::from_secs(5),
        )
    }

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_minor_units_rounding() {
        assert_eq!(StripeClient::minor_units(dec!(12.34)).unwrap(), 1234);
        assert_eq!(StripeClient::minor_units(dec!(0.0975)).unwrap(), 10);
        assert_eq!(StripeClient::minor_units(dec!(0.004)).unwrap(), 0);
        assert_eq!(StripeClient::minor_units(dec!(99.995)).unwrap(), 10000);
    }

    #[test]
    fn test_webhook_signature_accepts_valid() {
        let client = client();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign("whsec_test", now, payload));

        assert!(client
            .verify_webhook_signature(payload, &header, now + 30)
            .is_ok());
    }

    #[test]
    fn test_webhook_signature_rejects_tampered_payload() {
        let client = client();
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign("whsec_test", now, b"original"));

        assert!(client
            .verify_webhook_signature(b"tampered", &header, now)
            .is_err());
    }

    #[test]
    fn test_webhook_signature_rejects_stale_timestamp() {
        let client = client();
        let payload = b"{}";
        let old = 1_700_000_000;
        let header = format!("t={},v1={}", old, sign("whsec_test", old, payload));

        assert!(client
            .verify_webhook_signature(payload, &header, old + WEBHOOK_TOLERANCE_SECS + 1)
            .is_err());
    }

    #[test]
    fn test_webhook_signature_requires_configured_secret() {
        let client = StripeClient::new("sk_test_123", None, Duration::from_secs(5));
        assert!(client
            .verify_webhook_signature(b"{}", "t=1,v1=00", 1)
            .is_err());
    }
}
