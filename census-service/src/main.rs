use census_service::config::CensusConfig;
use census_service::models::RawMember;
use census_service::services::{CensusDb, CensusStore, SyncContext};
use census_service::workers::{BulkJob, BulkSyncEngine, SyncTarget};
use clap::{Parser, Subcommand};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "census-service", version, about = "Synchronize organization members into voting censuses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import members from a JSON array of member records
    Import {
        #[arg(long, env = "CENSUS_ORG_ID")]
        org: String,
        /// Also register every member as a participant of this census
        #[arg(long, conflicts_with = "group")]
        census: Option<String>,
        /// Also add every member to this group
        #[arg(long)]
        group: Option<String>,
        members: PathBuf,
    },
    /// Register every member of a group as a participant of a census
    Publish {
        #[arg(long, env = "CENSUS_ORG_ID")]
        org: String,
        #[arg(long)]
        census: String,
        #[arg(long)]
        group: String,
    },
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = CensusConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.common.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )
    .map_err(|e| std::io::Error::other(format!("Tracing initialization error: {}", e)))?;

    let db = CensusDb::connect(&config.mongodb.uri, &config.mongodb.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            std::io::Error::other(format!("Database connection error: {}", e))
        })?;

    db.health_check().await.map_err(|e| {
        std::io::Error::other(format!("Database health check failed: {}", e))
    })?;

    db.initialize_indexes().await.map_err(|e| {
        tracing::error!("Failed to initialize database indexes: {}", e);
        std::io::Error::other(format!("Database initialization error: {}", e))
    })?;

    let store: Arc<dyn CensusStore> = Arc::new(db);
    let engine = BulkSyncEngine::new(SyncContext::new(store, config.sync.clone()));

    let started = match cli.command {
        Command::Import {
            org,
            census,
            group,
            members,
        } => {
            let records = read_members(&members).await?;
            let target = match (census, group) {
                (Some(census), _) => SyncTarget::Census(census),
                (None, Some(group)) => SyncTarget::Group(group),
                (None, None) => SyncTarget::MemberPool,
            };
            tracing::info!(
                org_id = %org,
                target = target.kind(),
                records = records.len(),
                "Starting member import"
            );
            engine
                .start_bulk_sync(&org, &config.salt, target, records)
                .await
        }
        Command::Publish { org, census, group } => {
            engine.publish_group_to_census(&org, &census, &group).await
        }
    };

    let job = started.map_err(|e| {
        let err = AppError::from(e);
        tracing::error!(code = err.code(), "Bulk job rejected: {}", err);
        std::io::Error::other(err.to_string())
    })?;

    run_to_completion(job).await
}

async fn read_members(path: &PathBuf) -> std::io::Result<Vec<RawMember>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        tracing::error!("Failed to read {}: {}", path.display(), e);
        e
    })?;
    serde_json::from_str(&content).map_err(|e| {
        tracing::error!("Failed to parse {}: {}", path.display(), e);
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })
}

async fn run_to_completion(job: BulkJob) -> std::io::Result<()> {
    let cancel = job.cancellation_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current chunk");
            cancel.cancel();
        }
    });

    let (mut progress, handle) = job.split();
    while let Some(status) = progress.next().await {
        tracing::info!(
            processed = status.processed,
            total = status.total,
            added = status.added,
            percent = status.progress(),
            "Import progress"
        );
    }

    let report = handle
        .wait()
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    tracing::info!(summary = %report.summary(), "Import finished");

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| std::io::Error::other(format!("Failed to render report: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
