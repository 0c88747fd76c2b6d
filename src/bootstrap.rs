use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::AppState,
    config::Config,
    error::AppResult,
    ledger::{DataProvider, MemoryDataProvider, PgDataProvider},
    oracle::{
        providers::{
            aggregator::AggregatorOracle, api::ApiOracle, attestation::AttestationOracle,
        },
        webhook::WebhookHandler,
        OracleProvider, OracleRouter,
    },
    resolution::{events::LogSubscriber, EngineConfig, ResolutionEngine},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Data provider: Postgres when configured, in-memory otherwise
    let provider: Arc<dyn DataProvider> = match &config.database_url {
        Some(url) => {
            let pool = initialize_database(url).await?;
            Arc::new(PgDataProvider::new(pool))
        }
        None => {
            info!("⚠️  DATABASE_URL not set - using in-memory data provider");
            Arc::new(MemoryDataProvider::new())
        }
    };

    info!("⚙️  Initializing oracle providers...");

    let attestation = Arc::new(AttestationOracle::new());
    let api_oracle = Arc::new(ApiOracle::new(config.oracle_api_base_url.clone()));
    let aggregator = Arc::new(AggregatorOracle::new(
        vec![
            attestation.clone() as Arc<dyn OracleProvider>,
            api_oracle.clone() as Arc<dyn OracleProvider>,
        ],
        config.aggregator_quorum,
    ));

    let mut router = OracleRouter::new();
    router.register("attestation".to_string(), attestation.clone());
    router.register("api".to_string(), api_oracle);
    router.register("aggregator".to_string(), aggregator);
    let router = Arc::new(router);
    info!(
        "🔗 Oracle router initialized with providers: {:?}",
        router.registered_oracles()
    );

    let engine_config = EngineConfig {
        oracle_timeout: Duration::from_millis(config.oracle_timeout_ms),
        oracle_retry_attempts: config.oracle_retry_attempts,
        ..EngineConfig::default()
    };
    let engine = Arc::new(ResolutionEngine::new(
        provider.clone(),
        router.clone(),
        engine_config,
    ));
    engine.subscribe(Arc::new(LogSubscriber));
    info!("✅ Resolution engine initialized");

    let _poller =
        engine.start_deadline_poller(Duration::from_secs(config.deadline_poll_interval_secs));
    info!(
        "⏰ Deadline poller started (every {}s)",
        config.deadline_poll_interval_secs
    );

    let webhooks = Arc::new(WebhookHandler::new(
        engine.clone(),
        config.webhook_secrets.clone(),
        chrono::Duration::hours(config.webhook_nonce_retention_hours),
    ));
    info!(
        "✅ Webhook handler initialized ({} oracle secret(s) configured)",
        config.webhook_secrets.len()
    );

    Ok(AppState {
        engine,
        router,
        webhooks,
        attestation,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
