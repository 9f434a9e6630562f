//! Tendril scheduler binary.
//!
//! Runs the notification workers and the due-task sweeper over an in-memory
//! task store until interrupted.

use std::sync::Arc;

use tendril_cache::ResilientCache;
use tendril_core::{Clock, SystemClock};
use tendril_notify::{LogSink, NotificationManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tendril_scheduler::telemetry;
use tendril_scheduler::{
    DueSweeper, MemoryTaskStore, RecommendationClient, SchedulerService, TaskStore, TendrilConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init_tracing()?;

    info!("tendril scheduler starting");

    let config = TendrilConfig::load()?;
    info!(
        workers = config.notifications.worker_count(),
        advisor_enabled = config.advisor.enabled,
        sweeper_enabled = config.sweeper.enabled,
        "configuration loaded"
    );

    if let Some(metrics) = &config.metrics {
        let addr = telemetry::init_metrics(metrics)?;
        info!(addr = %addr, "prometheus exporter listening");
    }

    let cache = Arc::new(connect_cache(&config).await);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let notifications = Arc::new(NotificationManager::start(
        config.notifications.clone(),
        Arc::new(LogSink),
        Arc::clone(&clock),
    )?);

    let advisor = RecommendationClient::from_config(&config.advisor)?.with_cache(Arc::clone(&cache));
    let service = SchedulerService::builder(Arc::clone(&store), Arc::clone(&notifications))
        .advisor(advisor)
        .cache(Arc::clone(&cache))
        .calculator(config.schedule.calculator()?)
        .clock(Arc::clone(&clock))
        .advisor_timeout(config.advisor.total_timeout)
        .snapshot_ttl(config.schedule.snapshot_ttl)
        .build();
    info!(service = ?service, "scheduler service ready");

    let cancel = CancellationToken::new();
    let sweeper = config.sweeper.enabled.then(|| {
        let sweeper = DueSweeper::new(
            Arc::clone(&store),
            Arc::clone(&notifications),
            Arc::clone(&clock),
            &config.sweeper,
        );
        tokio::spawn(sweeper.run(cancel.clone()))
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    cancel.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }

    let timeout = config.notifications.shutdown_timeout;
    if let Err(e) = notifications.shutdown(timeout).await {
        error!(error = %e, "notification shutdown incomplete");
    }
    if let Err(e) = cache.close().await {
        warn!(error = %e, "failed to close cache");
    }

    info!("tendril scheduler stopped");
    Ok(())
}

async fn connect_cache(config: &TendrilConfig) -> ResilientCache {
    let cache = match ResilientCache::connect(&config.cache) {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "failed to configure cache, using in-memory cache");
            return ResilientCache::in_memory();
        }
    };

    match cache.health().await {
        Ok(()) => {
            info!("cache connected");
            cache
        }
        Err(e) => {
            error!(error = %e, "failed to reach cache, using in-memory cache");
            ResilientCache::in_memory()
        }
    }
}
