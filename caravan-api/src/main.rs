use anyhow::Context;
use caravan_api::{app, worker, AppState, AuthConfig, Backends};
use caravan_core::events::LogPublisher;
use caravan_core::{EventPublisher, SystemClock};
use caravan_inventory::{InventoryStore, MemoryInventoryStore};
use caravan_pooling::{GroupStore, MemoryGroupStore, MockPaymentProcessor};
use caravan_store::app_config::{Config, StorageBackend};
use caravan_store::{DbClient, EventProducer, PgGroupStore, PgInventoryStore, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "caravan_api=debug,caravan_inventory=debug,caravan_pooling=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Caravan API on port {}", config.server.port);

    let (inventory, groups): (Arc<dyn InventoryStore>, Arc<dyn GroupStore>) =
        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; state is lost on restart");
                (
                    Arc::new(MemoryInventoryStore::new()),
                    Arc::new(MemoryGroupStore::new()),
                )
            }
            StorageBackend::Postgres => {
                let db = DbClient::new(&config.database.url, config.database.max_connections)
                    .await
                    .context("Failed to connect to Postgres")?;
                db.migrate().await.context("Failed to run migrations")?;
                (
                    Arc::new(PgInventoryStore::new(db.pool.clone())),
                    Arc::new(PgGroupStore::new(db.pool.clone())),
                )
            }
        };

    let redis = match &config.redis.url {
        Some(url) => Some(Arc::new(
            RedisClient::new(url)
                .await
                .context("Failed to connect to Redis")?,
        )),
        None => {
            tracing::info!("No Redis configured; rate limiting disabled");
            None
        }
    };

    let events: Arc<dyn EventPublisher> = match &config.kafka.brokers {
        Some(brokers) => Arc::new(
            EventProducer::new(brokers).context("Failed to create Kafka producer")?,
        ),
        None => Arc::new(LogPublisher),
    };

    let backends = Backends {
        inventory,
        groups,
        processor: Arc::new(MockPaymentProcessor::new(config.payment.key_id.clone())),
        clock: Arc::new(SystemClock),
        events,
    };
    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
        webhook_secret: config.payment.webhook_secret.clone(),
    };
    let app_state = AppState::assemble(backends, config.business_rules.clone(), auth, redis)
        .context("Failed to register metrics")?;

    let sweep_every = Duration::from_secs(config.business_rules.sweep_interval_seconds.max(1));
    tokio::spawn(worker::start_hold_sweeper(
        app_state.holds.clone(),
        sweep_every,
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
