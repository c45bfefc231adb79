use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sijadin::{
    ai::{GeminiClient, Retrying},
    config::AppConfig,
    db::{self, PgPool},
    jobs,
    models::ReportFile,
    schema::report_files,
    state::AppState,
    storage::{ObjectStorage, S3Storage},
    store::PgStore,
};

const USAGE: &str = "Usage: enqueue <queue|run> <report-id>\n       enqueue status <job-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    let (command, id) = match (args.next(), args.next()) {
        (Some(command), Some(id)) => (command, id),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };
    let id = Uuid::parse_str(&id).with_context(|| format!("invalid id: {id}"))?;

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "enqueue",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket_uploads,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;

    match command.as_str() {
        "queue" => {
            let job_id = queue(&pool, &config, id).await?;
            println!("Queued job run {job_id} for report {id}.");
        }
        "run" => {
            let job_id = queue(&pool, &config, id).await?;
            run_inline(pool, config, job_id).await?;
        }
        "status" => print_status(&pool, id)?,
        other => {
            eprintln!("Unknown command: {other}\n{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Checks that every uploaded file is present in the bucket, then creates a QUEUED run.
async fn queue(pool: &PgPool, config: &AppConfig, report_id: Uuid) -> Result<Uuid> {
    let mut conn = pool.get().context("failed to get database connection")?;
    let files: Vec<ReportFile> = report_files::table
        .filter(report_files::report_id.eq(report_id))
        .load(&mut conn)
        .context("failed to load report files")?;
    if files.is_empty() {
        bail!("report {report_id} has no uploaded files");
    }

    let storage = S3Storage::from_config(config).await;
    for file in &files {
        if !storage.object_exists(&file.storage_key).await? {
            eprintln!(
                "Warning: {} ({}) is missing from storage and will be skipped.",
                file.filename, file.storage_key
            );
        }
    }

    let run = jobs::enqueue_job_run(&mut conn, report_id)?;
    Ok(run.id)
}

async fn run_inline(pool: PgPool, config: AppConfig, job_id: Uuid) -> Result<()> {
    let storage = Arc::new(S3Storage::from_config(&config).await);
    let gemini = Arc::new(Retrying::new(GeminiClient::new(&config.gemini), config.retry));
    let state = AppState::new(
        config,
        Arc::new(PgStore::new(pool)),
        storage,
        gemini.clone(),
        gemini,
    );

    match state.runner().run(job_id).await {
        Ok(run) => {
            println!("Job run {} finished with status {}.", run.id, run.status);
            Ok(())
        }
        Err(err) => bail!("job run {job_id} failed: {err}"),
    }
}

fn print_status(pool: &PgPool, job_id: Uuid) -> Result<()> {
    let mut conn = pool.get().context("failed to get database connection")?;
    let run = jobs::find_job_run(&mut conn, job_id)?;
    println!("{}", serde_json::to_string_pretty(&run)?);
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
