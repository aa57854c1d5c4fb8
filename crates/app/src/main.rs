use std::sync::Arc;

use clap::Parser;
use engine::{
    AccountType, Aggregator, Categorizer, Category, Engine, NewRule, RuleAction, SandboxAggregator,
    SyncWorker,
};
use migration::{Migrator, MigratorTrait};
use settings::AggregatorMode;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod settings;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "roundup")]
#[command(about = "Syncs linked bank items and runs savings rules in the background")]
struct Cli {
    /// Settings file (TOML). Without it `settings.toml` is read when present.
    #[arg(long, env = "ROUNDUP_SETTINGS")]
    settings: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let settings = settings::Settings::load(cli.settings.as_deref())?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "roundup={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let database = connect(&settings.database).await?;
    let aggregator: Arc<dyn Aggregator> = match settings.aggregator.mode {
        AggregatorMode::Sandbox => {
            tracing::info!("using the sandbox aggregator");
            Arc::new(SandboxAggregator::new())
        }
    };
    let engine = Engine::builder()
        .database(database)
        .aggregator(aggregator)
        .categorizer(Categorizer::new(settings.categorizer.to_config()))
        .build()
        .await?;

    if let Some(user_id) = settings.aggregator.demo_user {
        if let Err(err) = seed_demo(&engine, user_id).await {
            tracing::error!("failed to seed the demo item: {err}");
        }
    }

    let shutdown = CancellationToken::new();
    if settings.worker.enabled {
        let worker = SyncWorker::new(engine.clone(), settings.worker.to_config());
        let token = shutdown.clone();
        tasks.spawn(async move { worker.run(token).await });
    } else {
        tracing::info!("sync worker disabled");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::error!("task failed during shutdown: {err}");
        }
    }

    Ok(())
}

async fn connect(config: &settings::Database) -> Result<sea_orm::DatabaseConnection, BoxError> {
    let database = sea_orm::Database::connect(config.url()).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}

/// Links a sandbox item, adds a dining rule saving one dollar per purchase,
/// then refreshes the feed so the rule has something to act on.
async fn seed_demo(engine: &Engine, user_id: Uuid) -> Result<(), BoxError> {
    let linked = engine.link_item(user_id, "public-sandbox-demo").await?;
    let item_id = linked.item.id;
    let savings = linked
        .accounts
        .iter()
        .find(|account| account.account_type == AccountType::Savings)
        .map(|account| account.id)
        .ok_or("the sandbox item has no savings account")?;
    let synced = linked.initial_sync.wait().await?;
    tracing::info!(%item_id, synced, "demo item linked");

    let rule = engine
        .create_rule(NewRule::new(
            user_id,
            "Coffee round-up",
            Category::Dining,
            RuleAction::Fixed { dollars: 1.0 },
            savings,
        ))
        .await?;
    tracing::info!(rule_id = %rule.id, "demo rule created");

    let synced = engine.refresh_item(user_id, item_id).await?.wait().await?;
    tracing::info!(%item_id, synced, "demo item refreshed");
    Ok(())
}
