use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    api::handler::AppState,
    chain::{ChainWatcher, EvmRpcClient, EventSource, PushEventSource},
    config::{Config, EventSourceKind, StorageBackend},
    error::{AppError, AppResult},
    payout::{PayoutWorker, StripeClient},
    pricing::{MarketDataClient, RateCache, RateRefresher},
    reconciler::Reconciler,
    session::SessionService,
    storage::{MemoryStore, PgStore, Store},
};

pub async fn initialize_app_state(config: Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let config = Arc::new(config);
    let http_timeout = Duration::from_secs(config.http_timeout_secs);
    let processed_retention = chrono::Duration::days(config.processed_retention_days);

    // Durable state
    let store: Arc<dyn Store> = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = initialize_database(&config.database_url).await?;
            Arc::new(PgStore::new(pool, processed_retention))
        }
        StorageBackend::Memory => {
            warn!("⚠️  Memory storage selected - queue and sessions will not survive a restart");
            Arc::new(MemoryStore::new(processed_retention))
        }
    };

    // Rate cache with its single-writer refresher
    let rates = Arc::new(RateCache::new(config.fallback_rate));
    let rate_source = Arc::new(MarketDataClient::new(
        &config.rate_api_url,
        &config.rate_asset_id,
        &config.fiat_currency,
        http_timeout,
    ));
    RateRefresher::new(rates.clone(), rate_source, Duration::from_secs(config.rate_refresh_secs))
        .start();
    info!(
        "✅ Rate refresher started ({}s interval, fallback {})",
        config.rate_refresh_secs, config.fallback_rate
    );

    let sessions = Arc::new(SessionService::new(
        store.clone(),
        rates.clone(),
        config.fee_percent,
        config.min_session_amount,
        config.max_session_amount,
        chrono::Duration::seconds(config.session_ttl_secs),
    ));

    let stripe = Arc::new(StripeClient::new(
        &config.stripe_secret_key,
        config.stripe_webhook_secret.clone(),
        http_timeout,
    ));

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        config.min_transfer_amount,
        config.match_tolerance,
    ));

    // Event source: poll the chain, or ingest pushed payloads
    let event_sink = match config.event_source {
        EventSourceKind::Poll => {
            let client = Arc::new(
                EvmRpcClient::new(
                    &config.chain_rpc_url,
                    &config.token_contract,
                    &config.service_wallet,
                    config.token_decimals,
                    http_timeout,
                )
                .map_err(|e| {
                    AppError::Config(format!(
                        "poll mode needs TOKEN_CONTRACT and SERVICE_WALLET_ADDRESS: {}",
                        e
                    ))
                })?,
            );
            Arc::new(ChainWatcher::new(
                client,
                store.clone(),
                reconciler.clone(),
                Duration::from_secs(config.poll_interval_secs),
            ))
            .start();
            info!(
                "✅ Chain watcher started (polling every {}s)",
                config.poll_interval_secs
            );
            None
        }
        EventSourceKind::Push => {
            let (source, sink) = PushEventSource::new(reconciler.clone());
            Arc::new(source).start();
            info!("✅ Push event source started (webhook ingest)");
            Some(sink)
        }
    };

    // Payout worker, supervised: if the loop ever ends the process exits and
    // the external supervisor restarts it; the durable queue loses nothing.
    let worker = Arc::new(PayoutWorker::new(
        store.clone(),
        stripe.clone(),
        &config.fiat_currency,
        config.max_payout_retries,
        Duration::from_secs(config.worker_poll_secs),
    ));
    let worker_handle = worker.start();
    tokio::spawn(async move {
        let result = worker_handle.await;
        error!(
            "Payout worker exited ({:?}) - terminating so the supervisor restarts us",
            result
        );
        std::process::exit(1);
    });
    info!("✅ Payout worker started");

    // Session expiry sweep (every minute)
    let expiry_store = store.clone();
    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(60)).await;

            match expiry_store.expire_stale_sessions().await {
                Ok(count) => {
                    if count > 0 {
                        info!("🗑️  Expired {} stale sessions", count);
                    }
                }
                Err(e) => error!("Failed to expire stale sessions: {:?}", e),
            }
        }
    });

    // Processed-set retention sweep (hourly)
    let prune_store = store.clone();
    tokio::spawn(async move {
        loop {
            sleep(Duration::from_secs(3600)).await;

            match prune_store.prune_processed().await {
                Ok(count) => {
                    if count > 0 {
                        info!("🗑️  Pruned {} processed-transfer markers", count);
                    }
                }
                Err(e) => error!("Failed to prune processed transfers: {:?}", e),
            }
        }
    });
    info!("✅ Housekeeping sweeps started");

    Ok(AppState {
        config,
        store,
        sessions,
        rates,
        stripe,
        event_sink,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
