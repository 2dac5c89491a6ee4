use super::model::{
    Button, Media, NewButton, NewMedia, NewPost, Post, PostUpdate, PostWithRelations, Schedule,
    Statistics,
};
use super::{channels, schedules, Pool};
use crate::audit;
use crate::model::{Actor, MediaKind, PostStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

const POST_COLUMNS: &str =
    "id, channel_id, text, status, remote_message_id, published_at, created_at, updated_at";
const MEDIA_COLUMNS: &str = "id, post_id, file_id, kind, file_size, caption, position";
const BUTTON_COLUMNS: &str = "id, post_id, label, url, row_index, position";

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let status: String = row.get("status");
    let id: i64 = row.get("id");
    Ok(Post {
        id,
        channel_id: row.get("channel_id"),
        text: row.get("text"),
        status: PostStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("post {} has unknown status {}", id, status))?,
        remote_message_id: row.get("remote_message_id"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn media_from_row(row: &SqliteRow) -> Result<Media> {
    let kind: String = row.get("kind");
    let id: i64 = row.get("id");
    Ok(Media {
        id,
        post_id: row.get("post_id"),
        file_id: row.get("file_id"),
        kind: MediaKind::parse_kind(&kind)
            .ok_or_else(|| anyhow!("media {} has unknown kind {}", id, kind))?,
        file_size: row.get("file_size"),
        caption: row.get("caption"),
        position: row.get("position"),
    })
}

fn button_from_row(row: &SqliteRow) -> Button {
    Button {
        id: row.get("id"),
        post_id: row.get("post_id"),
        label: row.get("label"),
        url: row.get("url"),
        row_index: row.get("row_index"),
        position: row.get("position"),
    }
}

#[instrument(skip_all)]
pub async fn create(
    pool: &Pool,
    channel_id: i64,
    text: &str,
    status: PostStatus,
    actor: Actor,
) -> Result<Post> {
    let mut tx = pool.begin().await?;
    let post = insert_post_tx(&mut tx, channel_id, text, status).await?;
    tx.commit().await?;
    audit::record("post", "create", post.id, actor);
    Ok(post)
}

async fn insert_post_tx(
    tx: &mut Transaction<'_, Sqlite>,
    channel_id: i64,
    text: &str,
    status: PostStatus,
) -> Result<Post> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO posts (channel_id, text, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING {POST_COLUMNS}"
    ))
    .bind(channel_id)
    .bind(text)
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(&mut **tx)
    .await
    .context("failed to insert post")?;
    post_from_row(&row)
}

/// Write a post with its media, buttons and optional pending schedule in one
/// transaction. Media positions follow the order of `new.media`.
#[instrument(skip_all)]
pub async fn create_with_content(pool: &Pool, new: &NewPost, actor: Actor) -> Result<Post> {
    let mut tx = pool.begin().await?;
    let post = insert_post_tx(&mut tx, new.channel_id, &new.text, new.status).await?;
    for m in &new.media {
        insert_media_tx(&mut tx, post.id, m).await?;
    }
    for b in &new.buttons {
        insert_button_tx(&mut tx, post.id, b).await?;
    }
    let schedule_id = match new.schedule_at {
        Some(at) => Some(schedules::upsert_pending_tx(&mut tx, post.id, at).await?),
        None => None,
    };
    tx.commit().await?;
    audit::record("post", "create", post.id, actor);
    if let Some(id) = schedule_id {
        audit::record("schedule", "create", id, actor);
    }
    Ok(post)
}

pub async fn get_post(pool: &Pool, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(post_from_row).transpose()
}

/// Load a post with channel, ordered media, ordered buttons, schedule and statistics.
#[instrument(skip_all)]
pub async fn get(pool: &Pool, id: i64) -> Result<Option<PostWithRelations>> {
    let Some(post) = get_post(pool, id).await? else {
        return Ok(None);
    };
    let channel = channels::get(pool, post.channel_id)
        .await?
        .ok_or_else(|| anyhow!("post {} references missing channel {}", id, post.channel_id))?;
    let media = media_for(pool, id).await?;
    let buttons = buttons_for(pool, id).await?;
    let schedule: Option<Schedule> = schedules::get_for_post(pool, id).await?;
    let statistics = statistics_for(pool, id).await?;
    Ok(Some(PostWithRelations {
        post,
        channel,
        media,
        buttons,
        schedule,
        statistics,
    }))
}

pub async fn media_for(pool: &Pool, post_id: i64) -> Result<Vec<Media>> {
    let rows = sqlx::query(&format!(
        "SELECT {MEDIA_COLUMNS} FROM media WHERE post_id = ? ORDER BY position ASC"
    ))
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(media_from_row).collect()
}

pub async fn buttons_for(pool: &Pool, post_id: i64) -> Result<Vec<Button>> {
    let rows = sqlx::query(&format!(
        "SELECT {BUTTON_COLUMNS} FROM buttons WHERE post_id = ? ORDER BY row_index ASC, position ASC, id ASC"
    ))
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(button_from_row).collect())
}

pub async fn statistics_for(pool: &Pool, post_id: i64) -> Result<Option<Statistics>> {
    let row = sqlx::query(
        "SELECT id, post_id, views, forwards, reactions, updated_at FROM statistics WHERE post_id = ?",
    )
    .bind(post_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| Statistics {
        id: row.get("id"),
        post_id: row.get("post_id"),
        views: row.get("views"),
        forwards: row.get("forwards"),
        reactions: row.get("reactions"),
        updated_at: row.get("updated_at"),
    }))
}

#[instrument(skip_all)]
pub async fn update(pool: &Pool, id: i64, changes: &PostUpdate, actor: Actor) -> Result<Post> {
    let row = sqlx::query(&format!(
        "UPDATE posts SET \
           channel_id = COALESCE(?, channel_id), \
           text = COALESCE(?, text), \
           updated_at = ? \
         WHERE id = ? RETURNING {POST_COLUMNS}"
    ))
    .bind(changes.channel_id)
    .bind(changes.text.as_deref())
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to update post")?;
    let Some(row) = row else {
        return Err(anyhow!("post {} not found", id));
    };
    audit::record("post", "update", id, actor);
    post_from_row(&row)
}

/// Irreversible delete; media, buttons, schedule and statistics cascade.
#[instrument(skip_all)]
pub async fn delete(pool: &Pool, id: i64, actor: Actor) -> Result<bool> {
    let res = sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete post")?;
    let deleted = res.rows_affected() > 0;
    if deleted {
        audit::record("post", "delete", id, actor);
    }
    Ok(deleted)
}

/// Newest first.
pub async fn list_by_status(pool: &Pool, status: PostStatus, limit: i64) -> Result<Vec<Post>> {
    let rows = sqlx::query(&format!(
        "SELECT {POST_COLUMNS} FROM posts WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(post_from_row).collect()
}

/// Append a media item at the next free position of the post.
#[instrument(skip_all)]
pub async fn add_media(pool: &Pool, post_id: i64, media: &NewMedia, actor: Actor) -> Result<Media> {
    let mut tx = pool.begin().await?;
    let created = insert_media_tx(&mut tx, post_id, media).await?;
    tx.commit().await?;
    audit::record("media", "create", created.id, actor);
    Ok(created)
}

async fn insert_media_tx(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    media: &NewMedia,
) -> Result<Media> {
    let row = sqlx::query(&format!(
        "INSERT INTO media (post_id, file_id, kind, file_size, caption, position) \
         VALUES (?, ?, ?, ?, ?, (SELECT COALESCE(MAX(position) + 1, 0) FROM media WHERE post_id = ?)) \
         RETURNING {MEDIA_COLUMNS}"
    ))
    .bind(post_id)
    .bind(&media.file_id)
    .bind(media.kind.as_str())
    .bind(media.file_size)
    .bind(media.caption.as_deref())
    .bind(post_id)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("failed to add media to post {}", post_id))?;
    media_from_row(&row)
}

#[instrument(skip_all)]
pub async fn add_button(
    pool: &Pool,
    post_id: i64,
    label: &str,
    url: &str,
    row_index: i64,
    position: i64,
    actor: Actor,
) -> Result<Button> {
    let mut tx = pool.begin().await?;
    let button = insert_button_tx(
        &mut tx,
        post_id,
        &NewButton {
            label: label.to_string(),
            url: url.to_string(),
            row_index,
            position,
        },
    )
    .await?;
    tx.commit().await?;
    audit::record("button", "create", button.id, actor);
    Ok(button)
}

async fn insert_button_tx(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    button: &NewButton,
) -> Result<Button> {
    let row = sqlx::query(&format!(
        "INSERT INTO buttons (post_id, label, url, row_index, position) VALUES (?, ?, ?, ?, ?) RETURNING {BUTTON_COLUMNS}"
    ))
    .bind(post_id)
    .bind(&button.label)
    .bind(&button.url)
    .bind(button.row_index)
    .bind(button.position)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("failed to add button to post {}", post_id))?;
    Ok(button_from_row(&row))
}

/// Rewrite a post's content from an edit session: channel and text are
/// updated, media and buttons replaced wholesale, status set to `status`.
#[instrument(skip_all)]
pub async fn replace_content(
    pool: &Pool,
    post_id: i64,
    new: &NewPost,
    actor: Actor,
) -> Result<Post> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(&format!(
        "UPDATE posts SET channel_id = ?, text = ?, status = ?, updated_at = ? WHERE id = ? RETURNING {POST_COLUMNS}"
    ))
    .bind(new.channel_id)
    .bind(&new.text)
    .bind(new.status.as_str())
    .bind(Utc::now())
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to update post content")?;
    let Some(row) = row else {
        return Err(anyhow!("post {} not found", post_id));
    };
    let post = post_from_row(&row)?;

    sqlx::query("DELETE FROM media WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM buttons WHERE post_id = ?")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    for m in &new.media {
        insert_media_tx(&mut tx, post_id, m).await?;
    }
    for b in &new.buttons {
        insert_button_tx(&mut tx, post_id, b).await?;
    }
    match new.schedule_at {
        Some(at) => {
            schedules::upsert_pending_tx(&mut tx, post_id, at).await?;
        }
        None => schedules::cancel_pending_tx(&mut tx, post_id).await?,
    }
    tx.commit().await?;
    audit::record("post", "replace_content", post_id, actor);
    Ok(post)
}

/// Copy text, media and buttons into a new DRAFT post. Schedule, statistics
/// and the remote message id are never carried over.
#[instrument(skip_all)]
pub async fn duplicate(pool: &Pool, post_id: i64, actor: Actor) -> Result<Post> {
    let source = get_post(pool, post_id)
        .await?
        .ok_or_else(|| anyhow!("post {} not found", post_id))?;
    let media = media_for(pool, post_id).await?;
    let buttons = buttons_for(pool, post_id).await?;

    let mut tx = pool.begin().await?;
    let copy = insert_post_tx(&mut tx, source.channel_id, &source.text, PostStatus::Draft).await?;
    for m in &media {
        sqlx::query(
            "INSERT INTO media (post_id, file_id, kind, file_size, caption, position) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(copy.id)
        .bind(&m.file_id)
        .bind(m.kind.as_str())
        .bind(m.file_size)
        .bind(m.caption.as_deref())
        .bind(m.position)
        .execute(&mut *tx)
        .await?;
    }
    for b in &buttons {
        insert_button_tx(
            &mut tx,
            copy.id,
            &NewButton {
                label: b.label.clone(),
                url: b.url.clone(),
                row_index: b.row_index,
                position: b.position,
            },
        )
        .await?;
    }
    tx.commit().await?;
    audit::record("post", "duplicate", copy.id, actor);
    Ok(copy)
}

/// Mark a post delivered outside of any schedule (immediate publish).
pub async fn mark_published(
    pool: &Pool,
    post_id: i64,
    remote_message_id: i32,
    at: DateTime<Utc>,
    actor: Actor,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    mark_published_tx(&mut tx, post_id, remote_message_id, at).await?;
    tx.commit().await?;
    audit::record("post", "publish", post_id, actor);
    Ok(())
}

pub(crate) async fn mark_published_tx(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: i64,
    remote_message_id: i32,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE posts SET status = ?, remote_message_id = ?, published_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(PostStatus::Published.as_str())
    .bind(remote_message_id)
    .bind(at)
    .bind(at)
    .bind(post_id)
    .execute(&mut **tx)
    .await
    .context("failed to mark post published")?;
    sqlx::query(
        "INSERT INTO statistics (post_id, views, forwards, reactions, updated_at) VALUES (?, 0, 0, 0, ?) \
         ON CONFLICT(post_id) DO UPDATE SET views = 0, forwards = 0, reactions = 0, updated_at = excluded.updated_at",
    )
    .bind(post_id)
    .bind(at)
    .execute(&mut **tx)
    .await
    .context("failed to create statistics")?;
    Ok(())
}

pub async fn mark_failed(pool: &Pool, post_id: i64, actor: Actor) -> Result<()> {
    sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(PostStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(post_id)
        .execute(pool)
        .await
        .context("failed to mark post failed")?;
    audit::record("post", "fail", post_id, actor);
    Ok(())
}

/// Return a retracted post to DRAFT, dropping its remote reference.
pub async fn mark_retracted(pool: &Pool, post_id: i64, actor: Actor) -> Result<()> {
    sqlx::query(
        "UPDATE posts SET status = ?, remote_message_id = NULL, published_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(PostStatus::Draft.as_str())
    .bind(Utc::now())
    .bind(post_id)
    .execute(pool)
    .await
    .context("failed to mark post retracted")?;
    audit::record("post", "retract", post_id, actor);
    Ok(())
}
