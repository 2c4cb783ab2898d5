use env_logger::Env;
use liberation::config::LiberationConfig;
use liberation::notify::PgNotifier;
use liberation::store::{PgStore, run_migrations};
use liberation::worker::LiberationWorker;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    log::info!("starting liberation worker");

    let config = LiberationConfig::from_env();
    std::fs::create_dir_all(&config.export_root).expect("failed to create export root");
    log::info!("export root initialized at {}", config.export_root.display());

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(6)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    run_migrations(&pool).await.expect("database migrations failed");

    let store = Arc::new(PgStore::new(pool.clone()));
    let notifier = Arc::new(PgNotifier::new(pool));

    LiberationWorker::new(store, notifier, config).run().await
}
