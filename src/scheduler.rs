//! Scheduler loop: finds due schedules on a fixed interval and hands them to
//! the delivery engine one at a time.
//!
//! Due items come from a [`DueSource`]; the default [`PollingDueSource`]
//! scans the schedules table. A single process must run at most one
//! scheduler against a database.
use crate::config;
use crate::db::{schedules, DueSchedule, Pool};
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::model::{Actor, ScheduleStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Supplier of schedules whose target time has passed.
#[async_trait]
pub trait DueSource: Send + Sync {
    /// PENDING schedules due at or before `now`, oldest first.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DueSchedule>>;
}

pub struct PollingDueSource {
    pool: Pool,
}

impl PollingDueSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DueSource for PollingDueSource {
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<DueSchedule>> {
        schedules::list_due(&self.pool, now).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub max_attempts: i64,
    pub fail_fast_on_permanent: bool,
}

impl From<&config::Config> for SchedulerSettings {
    fn from(cfg: &config::Config) -> Self {
        Self {
            interval: cfg.poll_interval(),
            max_attempts: cfg.scheduler.max_attempts,
            fail_fast_on_permanent: cfg.scheduler.fail_fast_on_permanent,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: 3,
            fail_fast_on_permanent: true,
        }
    }
}

/// Counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub published: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Items whose bookkeeping could not be written; they stay due.
    pub errors: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "due: {}, published: {}, retrying: {}, failed: {}, errors: {}",
            self.due, self.published, self.retrying, self.failed, self.errors
        )
    }
}

enum ItemResult {
    Published,
    Retrying,
    Failed,
}

struct Inner {
    pool: Pool,
    delivery: Delivery,
    source: Arc<dyn DueSource>,
    settings: SchedulerSettings,
    /// Serialises the interval loop and manual triggers.
    tick_lock: Mutex<()>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    running: StdMutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl Scheduler {
    pub fn new(
        pool: Pool,
        delivery: Delivery,
        source: Arc<dyn DueSource>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                delivery,
                source,
                settings,
                tick_lock: Mutex::new(()),
            }),
            running: StdMutex::new(None),
        }
    }

    pub fn polling(pool: Pool, delivery: Delivery, settings: SchedulerSettings) -> Self {
        let source = Arc::new(PollingDueSource::new(pool.clone()));
        Self::new(pool, delivery, source, settings)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// Start the interval loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            error!("scheduler state lock poisoned");
            return false;
        };
        if running.is_some() {
            warn!("scheduler already running");
            return false;
        }
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.settings.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = inner.settings.interval.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = inner.tick(Utc::now()).await;
                        if report.due > 0 {
                            info!(%report, "scheduler tick");
                        }
                    }
                }
            }
            info!("scheduler stopped");
        });
        *running = Some((handle, token));
        true
    }

    /// Stop the interval loop. A tick in progress runs to completion first.
    pub async fn stop(&self) {
        let taken = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => None,
        };
        if let Some((handle, token)) = taken {
            token.cancel();
            if let Err(err) = handle.await {
                error!(?err, "scheduler task ended abnormally");
            }
        }
    }

    /// Run one tick now, outside the interval.
    pub async fn trigger(&self) -> TickReport {
        self.tick(Utc::now()).await
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.inner.tick(now).await
    }
}

impl Inner {
    #[instrument(skip(self))]
    async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let mut report = TickReport::default();
        let due = match self.source.due(now).await {
            Ok(due) => due,
            Err(err) => {
                error!(?err, "failed to query due schedules");
                report.errors += 1;
                return report;
            }
        };
        report.due = due.len();
        for item in &due {
            match self.process(item).await {
                Ok(ItemResult::Published) => report.published += 1,
                Ok(ItemResult::Retrying) => report.retrying += 1,
                Ok(ItemResult::Failed) => report.failed += 1,
                Err(err) => {
                    error!(
                        ?err,
                        schedule_id = item.schedule_id,
                        post_id = item.post_id,
                        "failed to process due schedule"
                    );
                    report.errors += 1;
                }
            }
        }
        report
    }

    async fn process(&self, item: &DueSchedule) -> Result<ItemResult> {
        match self.delivery.publish(item.post_id).await {
            DeliveryOutcome::Delivered { message_id } => {
                schedules::record_delivery(
                    &self.pool,
                    item.schedule_id,
                    item.post_id,
                    message_id,
                    Utc::now(),
                    Actor::Scheduler,
                )
                .await?;
                Ok(ItemResult::Published)
            }
            DeliveryOutcome::Failed(err) => {
                let give_up = self.settings.fail_fast_on_permanent && err.is_permanent();
                let record = schedules::record_failure(
                    &self.pool,
                    item.schedule_id,
                    &err.to_string(),
                    self.settings.max_attempts,
                    give_up,
                    Actor::Scheduler,
                )
                .await?;
                if record.status == ScheduleStatus::Failed {
                    warn!(
                        schedule_id = item.schedule_id,
                        post_id = item.post_id,
                        attempts = record.attempts,
                        %err,
                        "schedule failed permanently"
                    );
                    Ok(ItemResult::Failed)
                } else {
                    info!(
                        schedule_id = item.schedule_id,
                        attempts = record.attempts,
                        "delivery will be retried next tick"
                    );
                    Ok(ItemResult::Retrying)
                }
            }
        }
    }
}
