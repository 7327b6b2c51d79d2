use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::pricing::oracle::RateSource;

/// Cached token -> fiat exchange rate
///
/// Readers never block on I/O and never observe zero: the cache starts from
/// a configured fallback and only ever replaces the value with a successful,
/// positive fetch. The refresher task owns the only writer.
pub struct RateCache {
    rate: RwLock<Decimal>,
}

impl RateCache {
    pub fn new(fallback: Decimal) -> Self {
        Self {
            rate: RwLock::new(fallback),
        }
    }

    pub fn current_rate(&self) -> Decimal {
        *self.rate.read()
    }

    fn update(&self, rate: Decimal) {
        *self.rate.write() = rate;
    }
}

/// Background task refreshing the rate cache on a fixed interval
pub struct RateRefresher {
    cache: Arc<RateCache>,
    source: Arc<dyn RateSource>,
    refresh_interval: Duration,
}

impl RateRefresher {
    pub fn new(cache: Arc<RateCache>, source: Arc<dyn RateSource>, refresh_interval: Duration) -> Self {
        Self {
            cache,
            source,
            refresh_interval,
        }
    }

    /// Start the refresh loop (runs in background). A failed fetch keeps the
    /// previous value.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.refresh_interval);

            loop {
                ticker.tick().await;

                match self.source.fetch_rate().await {
                    Ok(rate) if rate > Decimal::ZERO => {
                        debug!("Refreshed exchange rate: {}", rate);
                        self.cache.update(rate);
                    }
                    Ok(rate) => {
                        warn!("Ignoring non-positive exchange rate from source: {}", rate);
                    }
                    Err(e) => {
                        warn!("Rate fetch failed, keeping previous value: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        responses: Vec<AppResult<Decimal>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        async fn fetch_rate(&self) -> AppResult<Decimal> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(i) {
                Some(Ok(rate)) => Ok(*rate),
                Some(Err(_)) | None => Err(AppError::External("feed down".to_string())),
            }
        }
    }

    #[test]
    fn test_starts_from_fallback() {
        let cache = RateCache::new(dec!(0.0087));
        assert_eq!(cache.current_rate(), dec!(0.0087));
    }

    #[tokio::test]
    async fn test_keeps_previous_value_on_failure() {
        let cache = Arc::new(RateCache::new(dec!(0.0087)));
        let source = Arc::new(ScriptedSource {
            responses: vec![
                Ok(dec!(0.01)),
                Err(AppError::External("feed down".to_string())),
                Ok(dec!(0)),
            ],
            calls: AtomicUsize::new(0),
        });

        // Drive the same logic the refresher loop runs, without the timer
        for _ in 0..3 {
            match source.fetch_rate().await {
                Ok(rate) if rate > Decimal::ZERO => cache.update(rate),
                _ => {}
            }
        }

        // Good fetch applied; failure and zero both ignored
        assert_eq!(cache.current_rate(), dec!(0.01));
    }
}
