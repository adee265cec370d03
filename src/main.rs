use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diary_grade_notifier::config::RunConfig;
use diary_grade_notifier::db::{self, PgDirectory, PgOutbox};
use diary_grade_notifier::diary::DiaryClient;
use diary_grade_notifier::engine::{Collaborators, NotificationEngine};
use diary_grade_notifier::providers::OperatorSink;
use diary_grade_notifier::scheduler::Notifier;
use diary_grade_notifier::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "diary-grade-notifier")]
#[command(about = "Notifies subscribers about grade changes in the school diary", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import owners and subscribed children from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Poll the diary and queue grade notifications until interrupted
    Run(RunConfig),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diary_grade_notifier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            info!("schema ready");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            info!("inserted {inserted} subscriptions from {}", csv.display());
        }
        Commands::Run(config) => run(pool, config).await?,
    }

    Ok(())
}

async fn run(pool: PgPool, config: RunConfig) -> anyhow::Result<()> {
    config.validate()?;

    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let outbox = Arc::new(PgOutbox::new(pool, config.operator_peer));
    let client = DiaryClient::new(&config.diary_base_url, config.fetch_timeout())?;

    let collaborators = Collaborators {
        sessions: directory.clone(),
        fetcher: Arc::new(client),
        dispatch: outbox.clone(),
        reauth: directory.clone(),
        operator: outbox.clone(),
    };
    let engine = NotificationEngine::new(SnapshotStore::new(), collaborators, config.fetch_timeout());
    let mut notifier = Notifier::new(Arc::new(engine), directory, config.max_concurrent_checks);

    let enrolled = notifier.enroll_all(&config.tiers).await;
    outbox
        .notify_operator(&format!(
            "Grade notifications started.\nEnrolled children: {enrolled}"
        ))
        .await;

    notifier.start(&config.tiers);
    for tier in &config.tiers {
        info!(
            tier = %tier.name,
            cadence_secs = tier.cadence.as_secs(),
            "tier scheduled"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, draining in-flight cycles");
    notifier.stop().await;
    notifier.engine().store().clear();

    Ok(())
}
