use anyhow::Result;
use axum::serve;
use relay_core::{
    config::{AppConfig, CounterStoreKind},
    metrics::MetricsCollector,
    ratelimit::{RateLimiter, redis::RedisCounterStore},
    registry::EndpointRegistry,
    relay::{Forwarder, RelayEngine},
    usage::{BillingRates, UsageRecorder, aggregate::UsageAggregator},
};
use server::{router, state::AppState};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};
use tokio::{signal, sync::broadcast};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,relay_core={0},server={0}", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        // "pretty" and any other format default to pretty logging
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false),
            )
            .init();
    }
}

/// Container for initialized core services.
struct CoreServices {
    state: AppState,
    aggregator: Arc<UsageAggregator>,
}

/// Builds the rate limiter for the configured counter store.
///
/// A Redis store that cannot be reached at startup degrades to the local
/// store with a warning rather than refusing to start: the limiter is a
/// gate, not a ledger.
async fn init_rate_limiter(config: &AppConfig) -> Arc<RateLimiter> {
    match (config.rate_limit.store, config.rate_limit.redis_url.as_deref()) {
        (CounterStoreKind::Redis, Some(url)) => match RedisCounterStore::connect(url).await {
            Ok(store) => {
                info!("rate limiter using shared redis counter store");
                Arc::new(RateLimiter::with_store(Arc::new(store)))
            }
            Err(e) => {
                warn!(error = %e, "redis counter store unreachable, using local fallback");
                Arc::new(RateLimiter::local())
            }
        },
        _ => Arc::new(RateLimiter::local()),
    }
}

/// Initializes all core services (registry, limiter, recorder, engine).
async fn init_core_services(config: &AppConfig) -> Result<CoreServices> {
    let metrics = if config.metrics.enabled {
        Arc::new(
            MetricsCollector::new()
                .map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {e}"))?,
        )
    } else {
        Arc::new(MetricsCollector::disabled())
    };

    let registry = Arc::new(EndpointRegistry::from_seeds(config.endpoints.iter().cloned()));
    metrics.set_endpoint_count(registry.len());
    info!(endpoint_count = registry.len(), "endpoint registry seeded");

    let recorder = Arc::new(UsageRecorder::new());
    let aggregator = Arc::new(UsageAggregator::new(
        recorder.clone(),
        config.aggregation_interval(),
        config.aggregate_retention(),
    ));

    let forwarder = Forwarder::new()
        .map_err(|e| anyhow::anyhow!("Forwarder initialization failed: {e}"))?;
    let engine = Arc::new(
        RelayEngine::new(registry.clone(), forwarder, recorder.clone(), metrics.clone())
            .with_relay_timeout(config.request_timeout()),
    );

    let limiter = init_rate_limiter(config).await;

    let billing = Arc::new(BillingRates::new(
        config.billing.cost_per_relay,
        config.billing.tier_rates.clone(),
    ));

    let state = AppState {
        engine,
        limiter,
        registry,
        recorder,
        aggregator: aggregator.clone(),
        metrics,
        billing,
        rate_limit: config.rate_limit.clone(),
        server: config.server.clone(),
        start_time: Instant::now(),
    };

    Ok(CoreServices { state, aggregator })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration loading failed: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!("starting relaygate");
    debug!(
        endpoint_count = config.endpoints.len(),
        rate_limit_enabled = config.rate_limit.enabled,
        bind_port = config.server.bind_port,
        "configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let services = init_core_services(&config).await?;
    let aggregator_handle = services.aggregator.clone().start(shutdown_tx.subscribe());

    let app = router::create_router(services.state);
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "relay server listening");

    let result = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = result {
        error!(error = %e, "server error occurred");
    }

    let _ = shutdown_tx.send(());
    let _ = aggregator_handle.await;

    info!("relaygate stopped");
    Ok(())
}
