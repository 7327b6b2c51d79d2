use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Pull interface for the external token -> fiat rate, best effort
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rate(&self) -> AppResult<Decimal>;
}

/// Market-data client against a CoinGecko-compatible simple-price API
pub struct MarketDataClient {
    client: Client,
    base_url: String,
    asset_id: String,
    vs_currency: String,
}

impl MarketDataClient {
    pub fn new(base_url: &str, asset_id: &str, vs_currency: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            asset_id: asset_id.to_string(),
            vs_currency: vs_currency.to_lowercase(),
        }
    }
}

#[async_trait]
impl RateSource for MarketDataClient {
    async fn fetch_rate(&self) -> AppResult<Decimal> {
        if self.asset_id.is_empty() {
            return Err(AppError::Config(
                "RATE_ASSET_ID not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies={}",
            self.base_url, self.asset_id, self.vs_currency
        );

        let response = self.client.get(&url).send().await?;
        let body: HashMap<String, HashMap<String, Decimal>> = response.json().await?;

        body.get(&self.asset_id)
            .and_then(|prices| prices.get(&self.vs_currency))
            .copied()
            .ok_or_else(|| {
                AppError::External(format!(
                    "No {}/{} price in response",
                    self.asset_id, self.vs_currency
                ))
            })
    }
}
