//! Server wiring
//!
//! Builds every component from the loaded configuration, spawns the
//! scheduling loops, and assembles the router with its layers.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use feedmill_core::{
    CircuitBreaker, IngestService, ScheduleHandler, SubscriptionRotator, SummarizeService,
};
use feedmill_core::scheduler::JobFn;
use feedmill_inoreader::{
    InoreaderClient, QuotaCounters, RateLimitManager, TokenBroker, TokenFileStore,
    TransportSettings, UsageStore,
};
use feedmill_storage::Store;
use feedmill_summarize::PreProcessorClient;

use crate::api::api_router;
use crate::middleware::auth::AuthStore;
use crate::server::config::{data_dir, AppConfig};

/// Shared handles the API layer works with.
pub struct AppState {
    pub store: Store,
    pub quota: Arc<RateLimitManager>,
    pub scheduler: Arc<ScheduleHandler>,
    pub summarizer: Arc<SummarizeService>,
    pub rotator: Arc<SubscriptionRotator>,
    pub started_at: DateTime<Utc>,
}

/// Adapter persisting quota counters through the storage layer.
struct StoreUsageSink(Store);

#[async_trait]
impl UsageStore for StoreUsageSink {
    async fn record_daily_usage(&self, counters: &QuotaCounters) -> anyhow::Result<()> {
        self.0
            .record_daily_usage(
                counters.day_key,
                counters.zone1_used as i64,
                counters.zone1_limit as i64,
                counters.zone2_used as i64,
                counters.zone2_limit as i64,
            )
            .await?;
        Ok(())
    }
}

/// Build the router plus the shutdown token for the scheduling loops.
pub async fn build_app(
    config: AppConfig,
) -> Result<(Router, Arc<AppState>, CancellationToken)> {
    let store = Store::from_path(&config.database.path).await?;

    let transport = TransportSettings::from_env();
    let token_store = Arc::new(TokenFileStore::new(data_dir().join("inoreader_token.enc")));
    let broker = Arc::new(
        TokenBroker::new(config.oauth_config(), &transport)?.with_store(token_store),
    );

    let quota = Arc::new(
        RateLimitManager::new(config.rate_limit_config())
            .with_usage_store(Arc::new(StoreUsageSink(store.clone()))),
    );
    quota
        .register_alert_callback(Arc::new(|alert| {
            warn!(
                zone = %alert.zone,
                severity = alert.severity.as_str(),
                threshold = alert.threshold_pct,
                usage_pct = alert.usage_pct,
                "api quota threshold crossed"
            );
        }))
        .await;

    let api_client = Arc::new(InoreaderClient::new(
        config.inoreader.base_url.clone(),
        transport.build_direct()?,
        Arc::clone(&broker),
        Arc::clone(&quota),
    ));

    let rotator = Arc::new(SubscriptionRotator::new(config.rotator_config()));
    // A restart mid-day can rotate on the previously synced set before
    // the first sync lands.
    rotator
        .load_subscriptions(store.list_subscription_ids().await?)
        .await;

    let ingest = Arc::new(IngestService::new(
        api_client,
        store.clone(),
        Arc::clone(&rotator),
        config.ingest_config(),
    ));

    let sync_job: JobFn = {
        let ingest = Arc::clone(&ingest);
        Arc::new(move || {
            let ingest = Arc::clone(&ingest);
            Box::pin(async move {
                let outcome = ingest.execute_subscription_sync().await?;
                Ok(format!(
                    "synced {} subscriptions ({} upserted, {} failed)",
                    outcome.remote_count, outcome.upserted, outcome.failed
                ))
            })
        })
    };
    let fetch_job: JobFn = {
        let ingest = Arc::clone(&ingest);
        Arc::new(move || {
            let ingest = Arc::clone(&ingest);
            Box::pin(async move {
                let outcome = ingest.process_next_rotation().await?;
                Ok(match outcome.subscription_id {
                    Some(id) => format!(
                        "{id}: fetched {}, saved {}, skipped {}",
                        outcome.fetched, outcome.saved, outcome.skipped
                    ),
                    None => "rotation complete for today".to_string(),
                })
            })
        })
    };

    let scheduler = Arc::new(ScheduleHandler::new(
        config.scheduler_config(),
        sync_job,
        fetch_job,
    ));

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_config()));
    let pre_processor = Arc::new(PreProcessorClient::new(
        config.summarizer.pre_processor_url.clone(),
    )?);
    let summarizer = Arc::new(SummarizeService::new(
        store.clone(),
        pre_processor,
        breaker,
        config.summarize_config(),
    )?);

    let shutdown = CancellationToken::new();
    scheduler.start(shutdown.clone());
    info!("scheduling loops started");

    let auth = Arc::new(AuthStore::from_config(&config.auth));
    let state = Arc::new(AppState {
        store,
        quota,
        scheduler,
        summarizer,
        rotator,
        started_at: Utc::now(),
    });

    let router = api_router()
        .layer(Extension(Arc::clone(&state)))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok((router, state, shutdown))
}
