use std::sync::Arc;

use futures_util::future::join_all;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use sijadin::{
    ai::{GeminiClient, Retrying},
    config::AppConfig,
    db,
    state::AppState,
    storage::S3Storage,
    store::PgStore,
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket_uploads,
        gemini_model = %config.gemini.model,
        embedding_model = %config.gemini.embedding_model,
        concurrency = config.worker_concurrency,
        "loaded worker configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    {
        let mut conn = pool.get()?;
        db::run_migrations(&mut conn)?;
    }

    let store = Arc::new(PgStore::new(pool));
    let storage = Arc::new(S3Storage::from_config(&config).await);
    let gemini = Arc::new(Retrying::new(GeminiClient::new(&config.gemini), config.retry));

    let concurrency = config.worker_concurrency;
    let poll_interval = config.worker_poll_interval;
    let state = AppState::new(config, store, storage, gemini.clone(), gemini);
    let runner = Arc::new(state.runner());

    let workers: Vec<Worker> = (0..concurrency)
        .map(|id| Worker::new(id, runner.clone(), poll_interval))
        .collect();

    tokio::select! {
        _ = join_all(workers.iter().map(Worker::run)) => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
