use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use ridepool_api::{app, worker, AppState};
use ridepool_core::{AuditLogger, EventPublisher, NoopTripLock, Notifier, SettlementStore, SystemClock, TripLock};
use ridepool_settlement::{SettlementContext, SettlementEngine, SideEffects};
use ridepool_store::app_config::{Config, StorageBackend};
use ridepool_store::{
    DbClient, EventProducer, InMemorySettlementStore, KafkaNotifier, PostgresSettlementStore, RedisClient,
    TracingNotifier,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ridepool_api=debug,ridepool_settlement=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Ridepool API on port {}", config.server.port);

    let store: Arc<dyn SettlementStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store, state is lost on restart");
            Arc::new(InMemorySettlementStore::new())
        }
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PostgresSettlementStore::new(db.pool))
        }
    };

    let effects = if config.kafka.enabled {
        let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
        let kafka = Arc::new(KafkaNotifier::new(producer, &config.kafka));
        SideEffects::new(
            kafka.clone() as Arc<dyn Notifier>,
            kafka.clone() as Arc<dyn AuditLogger>,
            kafka as Arc<dyn EventPublisher>,
        )
    } else {
        let notifier = Arc::new(TracingNotifier);
        SideEffects::new(notifier.clone(), notifier.clone(), notifier)
    };

    let lock: Arc<dyn TripLock> = if config.redis.enabled {
        Arc::new(RedisClient::new(&config.redis.url).context("Failed to open Redis client")?)
    } else {
        Arc::new(NoopTripLock)
    };

    let ctx = SettlementContext::new(store, effects, Arc::new(SystemClock), config.settlement.clone());
    let app_state = AppState::new(SettlementEngine::new(ctx, lock));

    if config.scheduler.enabled {
        tokio::spawn(worker::start_completion_worker(
            app_state.engine.clone(),
            config.scheduler.interval_seconds,
        ));
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
