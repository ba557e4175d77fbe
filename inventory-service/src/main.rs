use anyhow::Result;
use clap::Parser;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use shared::{EventLog, KafkaEventLog, PgCursorStore, StreamWorker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inventory_service::api::{self, AppState};
use inventory_service::config::Config;
use inventory_service::reconciler::InventoryReconciler;
use inventory_service::store::{InventoryStore, PgInventoryStore};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    info!("Running database migrations...");
    shared::db::run_migrations(&config.database_url, MIGRATIONS).await?;

    let pool = shared::db::build_pool(&config.database_url, config.db_pool_size).await?;
    let store: Arc<dyn InventoryStore> = Arc::new(PgInventoryStore::new(pool.clone()));
    let cursors = Arc::new(PgCursorStore::new(pool));
    let log: Arc<dyn EventLog> = Arc::new(KafkaEventLog::connect(config.log.kafka(&config.consumer_name))?);

    let shutdown = CancellationToken::new();

    let reconciler = StreamWorker::new(
        config.log.worker(&config.consumer_name, &config.orders_stream),
        log.clone(),
        cursors,
        InventoryReconciler::new(store.clone(), log.clone()).with_status_stream(&config.inventory_stream),
    );
    let reconciler_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = reconciler.run(shutdown.clone()).await {
                error!("Inventory reconciler stopped: {}", e);
                shutdown.cancel();
            }
        }
    });

    let app = api::create_router(AppState { store, log });
    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    info!("Inventory service listening on http://{}", config.addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::shutdown::on_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = reconciler_task.await;
    info!("Inventory service stopped");

    Ok(())
}
