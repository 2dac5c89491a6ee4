use super::model::Channel;
use super::Pool;
use crate::audit;
use crate::model::Actor;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

const COLUMNS: &str = "id, tg_chat_id, title, username, is_active";

fn from_row(row: &SqliteRow) -> Channel {
    Channel {
        id: row.get("id"),
        tg_chat_id: row.get("tg_chat_id"),
        title: row.get("title"),
        username: row.get("username"),
        is_active: row.get::<i64, _>("is_active") != 0,
    }
}

/// Register a channel or refresh and reactivate an existing registration.
#[instrument(skip_all)]
pub async fn upsert(
    pool: &Pool,
    tg_chat_id: i64,
    title: &str,
    username: Option<&str>,
    actor: Actor,
) -> Result<Channel> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO channels (tg_chat_id, title, username, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, 1, ?, ?) \
         ON CONFLICT(tg_chat_id) DO UPDATE SET \
           title = excluded.title, username = excluded.username, is_active = 1, updated_at = excluded.updated_at \
         RETURNING {COLUMNS}"
    ))
    .bind(tg_chat_id)
    .bind(title)
    .bind(username)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to register channel")?;
    let channel = from_row(&row);
    audit::record("channel", "upsert", channel.id, actor);
    Ok(channel)
}

pub async fn get(pool: &Pool, id: i64) -> Result<Option<Channel>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM channels WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(from_row))
}

/// Active channel by id; deactivated channels read as absent.
pub async fn get_active(pool: &Pool, id: i64) -> Result<Option<Channel>> {
    Ok(get(pool, id).await?.filter(|c| c.is_active))
}

pub async fn list_active(pool: &Pool) -> Result<Vec<Channel>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM channels WHERE is_active = 1 ORDER BY title COLLATE NOCASE, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(from_row).collect())
}

/// Soft delete. Returns false when no active channel had that id.
#[instrument(skip_all)]
pub async fn deactivate(pool: &Pool, id: i64, actor: Actor) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE channels SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to deactivate channel")?;
    let changed = res.rows_affected() > 0;
    if changed {
        audit::record("channel", "deactivate", id, actor);
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn upsert_reactivates_and_refreshes() {
        let pool = memory_pool().await.unwrap();
        let ch = upsert(&pool, -1001, "News", Some("news"), Actor::System)
            .await
            .unwrap();
        assert!(ch.is_active);

        assert!(deactivate(&pool, ch.id, Actor::System).await.unwrap());
        assert!(!deactivate(&pool, ch.id, Actor::System).await.unwrap());
        assert!(get_active(&pool, ch.id).await.unwrap().is_none());
        assert!(get(&pool, ch.id).await.unwrap().is_some());
        assert!(list_active(&pool).await.unwrap().is_empty());

        let again = upsert(&pool, -1001, "News Feed", None, Actor::System)
            .await
            .unwrap();
        assert_eq!(again.id, ch.id);
        assert_eq!(again.title, "News Feed");
        assert!(again.is_active);
        assert_eq!(list_active(&pool).await.unwrap().len(), 1);
    }
}
