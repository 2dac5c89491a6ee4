use super::model::{DueSchedule, Schedule, ScheduleEntry};
use super::{posts, Pool};
use crate::audit;
use crate::model::{Actor, PostStatus, ScheduleStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

const COLUMNS: &str = "id, post_id, scheduled_at, status, attempts, last_error, published_at";

fn from_row(row: &SqliteRow) -> Result<Schedule> {
    let status: String = row.get("status");
    let id: i64 = row.get("id");
    Ok(Schedule {
        id,
        post_id: row.get("post_id"),
        scheduled_at: row.get("scheduled_at"),
        status: ScheduleStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("schedule {} has unknown status {}", id, status))?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        published_at: row.get("published_at"),
    })
}

/// Result of recording a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub attempts: i64,
    pub status: ScheduleStatus,
}

/// Create a PENDING schedule for a post. A post owns at most one schedule:
/// an existing record is re-targeted and its attempt bookkeeping reset.
#[instrument(skip_all)]
pub async fn create(pool: &Pool, post_id: i64, at: DateTime<Utc>, actor: Actor) -> Result<Schedule> {
    let mut tx = pool.begin().await?;
    let id = upsert_pending_tx(&mut tx, post_id, at).await?;
    sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(PostStatus::Scheduled.as_str())
        .bind(Utc::now())
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM schedules WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    audit::record("schedule", "create", id, actor);
    from_row(&row)
}

pub(crate) async fn upsert_pending_tx(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    at: DateTime<Utc>,
) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO schedules (post_id, scheduled_at, status, attempts, created_at, updated_at) \
         VALUES (?, ?, ?, 0, ?, ?) \
         ON CONFLICT(post_id) DO UPDATE SET \
           scheduled_at = excluded.scheduled_at, status = excluded.status, attempts = 0, \
           last_error = NULL, published_at = NULL, updated_at = excluded.updated_at \
         RETURNING id",
    )
    .bind(post_id)
    .bind(at)
    .bind(ScheduleStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("failed to schedule post {}", post_id))?;
    Ok(id)
}

pub(crate) async fn cancel_pending_tx(tx: &mut Transaction<'_, Sqlite>, post_id: i64) -> Result<()> {
    sqlx::query("UPDATE schedules SET status = ?, updated_at = ? WHERE post_id = ? AND status = ?")
        .bind(ScheduleStatus::Cancelled.as_str())
        .bind(Utc::now())
        .bind(post_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(&mut **tx)
        .await
        .context("failed to cancel schedule")?;
    Ok(())
}

/// Cancel a pending schedule and return its post to DRAFT.
#[instrument(skip_all)]
pub async fn cancel(pool: &Pool, post_id: i64, actor: Actor) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let pending: Option<i64> =
        sqlx::query_scalar("SELECT id FROM schedules WHERE post_id = ? AND status = ?")
            .bind(post_id)
            .bind(ScheduleStatus::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await?;
    let Some(schedule_id) = pending else {
        return Ok(false);
    };
    cancel_pending_tx(&mut tx, post_id).await?;
    sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(PostStatus::Draft.as_str())
        .bind(Utc::now())
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    audit::record("schedule", "cancel", schedule_id, actor);
    Ok(true)
}

pub async fn get_for_post(pool: &Pool, post_id: i64) -> Result<Option<Schedule>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM schedules WHERE post_id = ?"))
        .bind(post_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// PENDING schedules due at or before `now`, oldest first.
#[instrument(skip_all)]
pub async fn list_due(pool: &Pool, now: DateTime<Utc>) -> Result<Vec<DueSchedule>> {
    let rows = sqlx::query(
        "SELECT id, post_id, scheduled_at, attempts FROM schedules \
         WHERE status = ? AND scheduled_at <= ? ORDER BY scheduled_at ASC, id ASC",
    )
    .bind(ScheduleStatus::Pending.as_str())
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| DueSchedule {
            schedule_id: row.get("id"),
            post_id: row.get("post_id"),
            scheduled_at: row.get("scheduled_at"),
            attempts: row.get("attempts"),
        })
        .collect())
}

/// Schedules of any status whose target lies in `[from, to)`, ascending.
pub async fn list_between(
    pool: &Pool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ScheduleEntry>> {
    let rows = sqlx::query(
        "SELECT s.id, s.post_id, s.scheduled_at, s.status, s.attempts, c.title, p.text \
         FROM schedules s \
         JOIN posts p ON p.id = s.post_id \
         JOIN channels c ON c.id = p.channel_id \
         WHERE s.scheduled_at >= ? AND s.scheduled_at < ? \
         ORDER BY s.scheduled_at ASC, s.id ASC",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let status: String = row.get("status");
            let schedule_id: i64 = row.get("id");
            Ok(ScheduleEntry {
                schedule_id,
                post_id: row.get("post_id"),
                scheduled_at: row.get("scheduled_at"),
                status: ScheduleStatus::parse_status(&status).ok_or_else(|| {
                    anyhow!("schedule {} has unknown status {}", schedule_id, status)
                })?,
                attempts: row.get("attempts"),
                channel_title: row.get("title"),
                text: row.get("text"),
            })
        })
        .collect()
}

/// Record a successful scheduled delivery: schedule and post become
/// PUBLISHED, the remote message id is stored and statistics are created.
#[instrument(skip_all)]
pub async fn record_delivery(
    pool: &Pool,
    schedule_id: i64,
    post_id: i64,
    remote_message_id: i32,
    at: DateTime<Utc>,
    actor: Actor,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE schedules SET status = ?, published_at = ?, last_error = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(ScheduleStatus::Published.as_str())
    .bind(at)
    .bind(at)
    .bind(schedule_id)
    .execute(&mut *tx)
    .await
    .context("failed to mark schedule published")?;
    posts::mark_published_tx(&mut tx, post_id, remote_message_id, at).await?;
    tx.commit().await?;
    audit::record("schedule", "publish", schedule_id, actor);
    audit::record("post", "publish", post_id, actor);
    Ok(())
}

/// Count one failed attempt. The schedule (and its post) fail permanently once
/// `max_attempts` is reached, or immediately when `give_up` is set.
#[instrument(skip_all)]
pub async fn record_failure(
    pool: &Pool,
    schedule_id: i64,
    error: &str,
    max_attempts: i64,
    give_up: bool,
    actor: Actor,
) -> Result<FailureRecord> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query("SELECT post_id, attempts, status FROM schedules WHERE id = ?")
        .bind(schedule_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("schedule {} not found", schedule_id));
    };
    let post_id: i64 = row.get("post_id");
    let status: String = row.get("status");
    if status != ScheduleStatus::Pending.as_str() {
        return Err(anyhow!(
            "schedule {} is {} and cannot record a failure",
            schedule_id,
            status
        ));
    }

    let attempts = row.get::<i64, _>("attempts") + 1;
    let status = if give_up || attempts >= max_attempts {
        ScheduleStatus::Failed
    } else {
        ScheduleStatus::Pending
    };
    sqlx::query(
        "UPDATE schedules SET attempts = ?, status = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(status.as_str())
    .bind(error)
    .bind(Utc::now())
    .bind(schedule_id)
    .execute(&mut *tx)
    .await
    .context("failed to record delivery failure")?;
    if status == ScheduleStatus::Failed {
        sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(PostStatus::Failed.as_str())
            .bind(Utc::now())
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    audit::record("schedule", "attempt_failed", schedule_id, actor);
    if status == ScheduleStatus::Failed {
        audit::record("post", "fail", post_id, actor);
    }
    Ok(FailureRecord { attempts, status })
}
