use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

use tg_postbot::config;
use tg_postbot::db;
use tg_postbot::delivery::Delivery;
use tg_postbot::scheduler::{Scheduler, SchedulerSettings};
use tg_postbot::telegram::TelegramClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Deliver every due scheduled post once and exit"
)]
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
    let delivery = Delivery::new(pool.clone(), Arc::new(TelegramClient::new(bot)));
    let scheduler = Scheduler::polling(pool, delivery, SchedulerSettings::from(&cfg));

    let report = scheduler.trigger().await;
    info!(%report, "publishing run finished");
    println!("{}", report);
    Ok(())
}
