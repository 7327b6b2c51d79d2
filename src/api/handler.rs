use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use http::HeaderMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    chain::{
        decode::{decode_transfer_calldata, normalize_amount, parse_hex_u64},
        EventSink, TransferEvent,
    },
    config::Config,
    error::{AppError, AppResult},
    payout::{models::DeadLetteredJob, StripeClient},
    pricing::RateCache,
    session::SessionService,
    storage::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionService>,
    pub rates: Arc<RateCache>,
    pub stripe: Arc<StripeClient>,
    /// Present only in push mode; the chain webhook feeds it
    pub event_sink: Option<EventSink>,
}

/// Create a sell session
/// POST /api/v1/session
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> AppResult<Json<SessionResponse>> {
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let session = state
        .sessions
        .create(request.token_amount, &request.payout_destination)
        .await?;

    // The checkout link is a convenience for the seller; losing it is not
    // a reason to fail the session.
    let checkout_url = if state.config.stripe_secret_key.is_empty() {
        None
    } else {
        match state
            .stripe
            .create_checkout_link(
                session.token_amount,
                session.fiat_net,
                &state.config.fiat_currency,
            )
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Checkout link creation failed for {}: {}", session.id, e);
                None
            }
        }
    };

    let deposit_address = state.config.service_wallet.clone();
    let message = format!(
        "Send exactly {} tokens to {}",
        session.token_amount, deposit_address
    );

    Ok(Json(SessionResponse {
        session_id: session.id,
        deposit_address,
        token_amount: session.token_amount,
        fiat_net: session.fiat_net,
        fee_percent: state.sessions.fee_percent(),
        status: session.status,
        checkout_url,
        message,
    }))
}

/// GET /api/v1/session/:id
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionStatusResponse>> {
    let session = state.sessions.get(id).await?;
    Ok(Json(session.into()))
}

/// GET /api/v1/rate
pub async fn current_rate(State(state): State<AppState>) -> Json<RateResponse> {
    Json(RateResponse {
        rate: state.rates.current_rate(),
        currency: state.config.fiat_currency.clone(),
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        queue_depth: state.store.queue_depth().await?,
    }))
}

/// GET /api/v1/admin/dead-letters
pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DeadLetteredJob>>> {
    Ok(Json(state.store.dead_letters().await?))
}

/// Push-mode chain event ingest
/// POST /webhook/chain
pub async fn chain_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChainWebhookPayload>,
) -> AppResult<Json<WebhookResponse>> {
    if let Some(expected) = &state.config.chain_webhook_secret {
        let provided = headers
            .get("x-webhook-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            return Err(AppError::Unauthorized);
        }
    }

    let events = decode_webhook_events(&payload, &state.config);
    let count = events.len();

    match &state.event_sink {
        Some(sink) => {
            if count > 0 {
                info!("Chain webhook delivered {} transfer event(s)", count);
            }
            sink.deliver(events);
            Ok(Json(WebhookResponse {
                accepted: true,
                events: count,
                message: "queued for reconciliation".to_string(),
            }))
        }
        None => {
            // Poll mode: the watcher will pick these transfers up itself.
            Ok(Json(WebhookResponse {
                accepted: false,
                events: count,
                message: "push ingest disabled".to_string(),
            }))
        }
    }
}

/// Extract service-wallet token transfers from a mined-transaction payload
fn decode_webhook_events(payload: &ChainWebhookPayload, config: &Config) -> Vec<TransferEvent> {
    let Some(block) = payload
        .event
        .as_ref()
        .and_then(|e| e.data.as_ref())
        .and_then(|d| d.block.as_ref())
    else {
        return Vec::new();
    };

    let block_height = block
        .number
        .as_deref()
        .and_then(|n| parse_hex_u64(n).ok())
        .unwrap_or(0);

    let mut events = Vec::new();
    for tx in &block.transactions {
        // Only calls into the token contract can carry a transfer
        let Some(to) = tx.to.as_deref() else { continue };
        if to.to_lowercase() != config.token_contract {
            continue;
        }
        let Some(input) = tx.input.as_deref() else { continue };

        let (recipient, raw) = match decode_transfer_calldata(input) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => continue,
            Err(e) => {
                warn!("Undecodable calldata in tx {}: {}", tx.hash, e);
                continue;
            }
        };

        if recipient != config.service_wallet {
            continue;
        }

        let amount = match normalize_amount(raw, config.token_decimals) {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Unrepresentable transfer value in tx {}: {}", tx.hash, e);
                continue;
            }
        };

        events.push(TransferEvent {
            tx_hash: tx.hash.to_lowercase(),
            from: tx.from.as_deref().unwrap_or_default().to_lowercase(),
            amount,
            block_height: tx
                .block_number
                .as_deref()
                .and_then(|n| parse_hex_u64(n).ok())
                .unwrap_or(block_height),
        });
    }

    events
}

/// Payment-processor confirmation webhook
/// POST /webhook/payment
///
/// Verifies the signature and logs the confirmation. Deliberately does not
/// feed back into the pipeline: payouts are driven by observed chain
/// transfers alone.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<serde_json::Value>> {
    if state.config.stripe_webhook_secret.is_some() {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        state
            .stripe
            .verify_webhook_signature(body.as_bytes(), signature, Utc::now().timestamp())?;
    }

    let event_type = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or_else(|| "unknown".to_string());

    info!("Payment webhook received: {}", event_type);
    Ok(Json(serde_json::json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        let mut config = Config::from_env().unwrap();
        config.token_contract = "0xef3f5c1892a8d7a3304e4a15959e124402d69974".to_string();
        config.service_wallet = "0x1111111111111111111111111111111111111111".to_string();
        config.token_decimals = 18;
        config
    }

    fn transfer_tx(to_contract: &str, recipient_hex40: &str, value_hex: &str) -> WebhookTransaction {
        WebhookTransaction {
            hash: "0xABCDEF".to_string(),
            from: Some("0xSELLER00000000000000000000000000000000aa".to_string()),
            to: Some(to_contract.to_string()),
            input: Some(format!("0xa9059cbb{:0>64}{:0>64}", recipient_hex40, value_hex)),
            block_number: Some("0x64".to_string()),
        }
    }

    fn payload(transactions: Vec<WebhookTransaction>) -> ChainWebhookPayload {
        ChainWebhookPayload {
            kind: Some("MINED_TRANSACTION".to_string()),
            event: Some(WebhookEvent {
                data: Some(WebhookData {
                    block: Some(WebhookBlock {
                        number: Some("0x64".to_string()),
                        transactions,
                    }),
                }),
            }),
        }
    }

    #[test]
    fn test_decode_webhook_extracts_wallet_transfers() {
        let config = test_config();
        let payload = payload(vec![
            // 10 tokens to the service wallet
            transfer_tx(
                "0xEF3F5C1892A8d7A3304E4A15959E124402d69974",
                "1111111111111111111111111111111111111111",
                "8ac7230489e80000",
            ),
            // Same contract, different recipient
            transfer_tx(
                "0xef3f5c1892a8d7a3304e4a15959e124402d69974",
                "2222222222222222222222222222222222222222",
                "8ac7230489e80000",
            ),
            // Different contract entirely
            transfer_tx(
                "0x3333333333333333333333333333333333333333",
                "1111111111111111111111111111111111111111",
                "8ac7230489e80000",
            ),
        ]);

        let events = decode_webhook_events(&payload, &config);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, dec!(10));
        assert_eq!(events[0].block_height, 100);
        assert_eq!(events[0].tx_hash, "0xabcdef");
    }

    #[test]
    fn test_decode_webhook_ignores_non_transfer_calls() {
        let config = test_config();
        let mut tx = transfer_tx(
            "0xef3f5c1892a8d7a3304e4a15959e124402d69974",
            "1111111111111111111111111111111111111111",
            "8ac7230489e80000",
        );
        tx.input = Some("0x095ea7b3deadbeef".to_string());

        assert!(decode_webhook_events(&payload(vec![tx]), &config).is_empty());
    }

    #[test]
    fn test_decode_webhook_without_block_is_empty() {
        let config = test_config();
        let payload = ChainWebhookPayload {
            kind: None,
            event: None,
        };
        assert!(decode_webhook_events(&payload, &config).is_empty());
    }
}
