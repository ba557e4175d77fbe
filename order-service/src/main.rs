use anyhow::Result;
use clap::Parser;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use shared::{EventLog, KafkaEventLog, PgCursorStore, StreamWorker};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use order_service::api::{self, AppState};
use order_service::config::Config;
use order_service::finalizer::OrderFinalizer;
use order_service::outbox::OutboxRelay;
use order_service::store::{OrderStore, PgOrderStore};
use order_service::writer::OrderWriter;

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
    let store: Arc<dyn OrderStore> = Arc::new(
        PgOrderStore::new(pool.clone()).with_orders_stream(&config.orders_stream),
    );
    let cursors = Arc::new(PgCursorStore::new(pool));
    let log: Arc<dyn EventLog> = Arc::new(KafkaEventLog::connect(config.log.kafka(&config.consumer_name))?);

    let shutdown = CancellationToken::new();
    let wake = Arc::new(Notify::new());

    let relay = OutboxRelay::new(store.clone(), log.clone(), wake.clone())
        .with_interval(config.outbox_interval())
        .with_batch_size(config.outbox_batch_size);
    let relay_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { relay.run(shutdown).await }
    });

    let finalizer = StreamWorker::new(
        config.log.worker(&config.consumer_name, &config.inventory_stream),
        log.clone(),
        cursors,
        OrderFinalizer::new(store.clone()),
    );
    let finalizer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = finalizer.run(shutdown.clone()).await {
                error!("Order finalizer stopped: {}", e);
                shutdown.cancel();
            }
        }
    });

    let app = api::create_router(AppState {
        writer: OrderWriter::new(store.clone(), wake),
        store,
        log,
    });
    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    info!("Order service listening on http://{}", config.addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::shutdown::on_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = tokio::join!(relay_task, finalizer_task);
    info!("Order service stopped");

    Ok(())
}
