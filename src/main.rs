use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tg_postbot::compose::Composer;
use tg_postbot::delivery::Delivery;
use tg_postbot::draft::DraftSessions;
use tg_postbot::handlers::{self, AppState};
use tg_postbot::scheduler::{Scheduler, SchedulerSettings};
use tg_postbot::telegram::TelegramClient;
use tg_postbot::{config, db};
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let client = Arc::new(TelegramClient::new(bot.clone()));
    let delivery = Delivery::new(pool.clone(), client);

    let scheduler = Arc::new(Scheduler::polling(
        pool.clone(),
        delivery.clone(),
        SchedulerSettings::from(&cfg),
    ));
    scheduler.start();

    let composer = Composer::new(
        pool,
        DraftSessions::in_memory(cfg.session_ttl()),
        delivery,
        cfg.local_offset(),
    )
    .with_scheduler(scheduler.clone());
    let state = Arc::new(AppState {
        composer,
        admin_id: cfg.telegram.admin_user_id,
    });

    handlers::run(bot, state).await;

    info!("shutting down");
    scheduler.stop().await;
    Ok(())
}
